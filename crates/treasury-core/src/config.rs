//! Treasury rule table and persistence settings.

use crate::allocation::AllocationTable;
use crate::error::{TreasuryError, TreasuryResult};
use crate::storage::StorageConfig;
use crate::types::{Amount, BasisPoints, BPS_DENOMINATOR};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreasuryConfig {
    /// Share of the total that can never be withdrawn.
    pub reserve_fraction_bps: BasisPoints,
    /// Largest single distribution, as a share of the total.
    pub payout_cap_bps: BasisPoints,
    /// Distributions strictly above this amount are deferred.
    pub large_transaction_threshold: Amount,
    pub min_approval_delay_secs: u64,
    pub max_daily_distributions: u32,
    pub allocation: AllocationTable,
    pub storage: StorageConfig,
}

impl Default for TreasuryConfig {
    fn default() -> Self {
        Self {
            reserve_fraction_bps: BasisPoints::percent(20),
            payout_cap_bps: BasisPoints::percent(7),
            large_transaction_threshold: Amount::from_units(1_000),
            min_approval_delay_secs: 24 * 60 * 60,
            max_daily_distributions: 10,
            allocation: AllocationTable::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl TreasuryConfig {
    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    pub fn min_approval_delay(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.min_approval_delay_secs).unwrap_or(i64::MAX))
    }

    pub fn validate(&self) -> TreasuryResult<()> {
        let mut fractions = vec![
            ("reserve_fraction_bps", self.reserve_fraction_bps),
            ("payout_cap_bps", self.payout_cap_bps),
        ];
        let rates = &self.allocation.category_rates;
        fractions.extend([
            ("allocation.category_rates.emergency", rates.emergency),
            ("allocation.category_rates.bills", rates.bills),
            ("allocation.category_rates.utilities", rates.utilities),
            ("allocation.category_rates.education", rates.education),
            ("allocation.category_rates.general", rates.general),
        ]);
        let multipliers = &self.allocation.priority_multipliers;
        fractions.extend([
            ("allocation.priority_multipliers.urgent", multipliers.urgent),
            ("allocation.priority_multipliers.high", multipliers.high),
            ("allocation.priority_multipliers.normal", multipliers.normal),
            ("allocation.priority_multipliers.low", multipliers.low),
        ]);

        for (field, value) in fractions {
            if value.get() > BPS_DENOMINATOR {
                return Err(TreasuryError::Config(format!(
                    "{field} must be at most 100% ({BPS_DENOMINATOR} bps), got {value}"
                )));
            }
        }

        // Chrono durations are bounded well below i64::MAX seconds.
        if self.min_approval_delay_secs > 100 * 365 * 24 * 60 * 60 {
            return Err(TreasuryError::Config(format!(
                "min_approval_delay_secs is unreasonably large: {}",
                self.min_approval_delay_secs
            )));
        }

        Ok(())
    }
}
