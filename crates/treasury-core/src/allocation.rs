//! Allocation calculator.
//!
//! Pure functions of the current [`Balance`] and a beneficiary's classification.
//! Nothing here mutates state, allocates ids, or applies execution gates.

use crate::ledger::Balance;
use crate::registry::Beneficiary;
use crate::types::{Amount, BasisPoints, Category, Priority, BPS_DENOMINATOR};
use serde::{Deserialize, Serialize};

/// Base share of the total balance per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryRates {
    pub emergency: BasisPoints,
    pub bills: BasisPoints,
    pub utilities: BasisPoints,
    pub education: BasisPoints,
    pub general: BasisPoints,
}

impl Default for CategoryRates {
    fn default() -> Self {
        Self {
            emergency: BasisPoints::percent(5),
            bills: BasisPoints::percent(4),
            utilities: BasisPoints::percent(3),
            education: BasisPoints::percent(3),
            general: BasisPoints::percent(2),
        }
    }
}

impl CategoryRates {
    pub fn rate(&self, category: Category) -> BasisPoints {
        match category {
            Category::Emergency => self.emergency,
            Category::Bills => self.bills,
            Category::Utilities => self.utilities,
            Category::Education => self.education,
            Category::General => self.general,
        }
    }
}

/// Multiplier applied to the category base per priority tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityMultipliers {
    pub urgent: BasisPoints,
    pub high: BasisPoints,
    pub normal: BasisPoints,
    pub low: BasisPoints,
}

impl Default for PriorityMultipliers {
    fn default() -> Self {
        Self {
            urgent: BasisPoints::full(),
            high: BasisPoints::new(7_500),
            normal: BasisPoints::new(5_000),
            low: BasisPoints::new(2_500),
        }
    }
}

impl PriorityMultipliers {
    pub fn multiplier(&self, priority: Priority) -> BasisPoints {
        match priority {
            Priority::Urgent => self.urgent,
            Priority::High => self.high,
            Priority::Normal => self.normal,
            Priority::Low => self.low,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationTable {
    pub category_rates: CategoryRates,
    pub priority_multipliers: PriorityMultipliers,
}

/// Recommendation for a single beneficiary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub beneficiary_id: String,
    pub priority: Priority,
    pub category: Category,
    pub base_rate: BasisPoints,
    pub multiplier: BasisPoints,
    /// `total × base_rate × multiplier` before clamping.
    pub unclamped: Amount,
    /// Clamped to both the per-payout cap and the available balance.
    pub recommended: Amount,
}

/// One line of a batch proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedAllocation {
    pub beneficiary_id: String,
    pub name: String,
    pub priority: Priority,
    pub category: Category,
    pub recommended: Amount,
    /// Amount left after earlier (higher-priority) lines consumed the available balance.
    pub proposed: Amount,
    pub truncated: bool,
}

/// Advisory batch proposal. Executing it is a separate, gated step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionProposal {
    pub balance: Balance,
    pub items: Vec<ProposedAllocation>,
    pub total_proposed: Amount,
    pub remaining_available: Amount,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationCalculator {
    table: AllocationTable,
}

impl AllocationCalculator {
    pub fn new(table: AllocationTable) -> Self {
        Self { table }
    }

    /// Recommended payout for a classification against `balance`.
    pub fn recommend(&self, balance: &Balance, priority: Priority, category: Category) -> Amount {
        self.unclamped(balance, priority, category)
            .min(balance.max_single_payout)
            .min(balance.available)
    }

    pub fn calculate(&self, balance: &Balance, beneficiary: &Beneficiary) -> Allocation {
        Allocation {
            beneficiary_id: beneficiary.id.clone(),
            priority: beneficiary.priority,
            category: beneficiary.category,
            base_rate: self.table.category_rates.rate(beneficiary.category),
            multiplier: self.table.priority_multipliers.multiplier(beneficiary.priority),
            unclamped: self.unclamped(balance, beneficiary.priority, beneficiary.category),
            recommended: self.recommend(balance, beneficiary.priority, beneficiary.category),
        }
    }

    /// Priority-ordered greedy proposal over `beneficiaries`.
    ///
    /// Lines are stable-sorted by tier (urgent first; input order within a tier) and
    /// consume the available balance in that order. Once it runs out, later lines are
    /// truncated, down to zero.
    pub fn propose(&self, balance: &Balance, beneficiaries: &[Beneficiary]) -> DistributionProposal {
        let mut ordered: Vec<&Beneficiary> = beneficiaries.iter().collect();
        ordered.sort_by_key(|beneficiary| beneficiary.priority);

        let mut remaining = balance.available;
        let mut items = Vec::with_capacity(ordered.len());
        for beneficiary in ordered {
            let recommended = self.recommend(balance, beneficiary.priority, beneficiary.category);
            let proposed = recommended.min(remaining);
            remaining = remaining.saturating_sub(proposed);
            items.push(ProposedAllocation {
                beneficiary_id: beneficiary.id.clone(),
                name: beneficiary.name.clone(),
                priority: beneficiary.priority,
                category: beneficiary.category,
                recommended,
                proposed,
                truncated: proposed < recommended,
            });
        }

        DistributionProposal {
            balance: *balance,
            total_proposed: balance.available.saturating_sub(remaining),
            remaining_available: remaining,
            items,
        }
    }

    fn unclamped(&self, balance: &Balance, priority: Priority, category: Category) -> Amount {
        let base = u128::from(self.table.category_rates.rate(category).get());
        let multiplier = u128::from(self.table.priority_multipliers.multiplier(priority).get());
        let denominator = u128::from(BPS_DENOMINATOR) * u128::from(BPS_DENOMINATOR);
        let scaled = u128::from(balance.total.minor()) * base * multiplier / denominator;
        Amount::from_minor(u64::try_from(scaled).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BeneficiaryKind, Metadata};
    use chrono::Utc;

    fn balance(units: u64) -> Balance {
        Balance::compute(
            Amount::from_units(units),
            BasisPoints::percent(20),
            BasisPoints::percent(7),
        )
    }

    fn beneficiary(id: &str, priority: Priority, category: Category) -> Beneficiary {
        let now = Utc::now();
        Beneficiary {
            id: id.to_string(),
            name: id.to_uppercase(),
            kind: BeneficiaryKind::Individual,
            priority,
            category,
            created_at: now,
            updated_at: now,
            total_received: Amount::zero(),
            distribution_count: 0,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn default_table_rates() {
        let calc = AllocationCalculator::default();
        let b = balance(10_000);

        assert_eq!(
            calc.recommend(&b, Priority::Urgent, Category::Emergency),
            Amount::from_units(500)
        );
        assert_eq!(
            calc.recommend(&b, Priority::High, Category::Bills),
            Amount::from_units(300)
        );
        assert_eq!(
            calc.recommend(&b, Priority::Normal, Category::Utilities),
            Amount::from_units(150)
        );
        assert_eq!(
            calc.recommend(&b, Priority::Low, Category::General),
            Amount::from_units(50)
        );
    }

    #[test]
    fn clamps_to_payout_cap() {
        let table = AllocationTable {
            category_rates: CategoryRates {
                emergency: BasisPoints::percent(50),
                ..CategoryRates::default()
            },
            ..AllocationTable::default()
        };
        let calc = AllocationCalculator::new(table);
        let b = balance(10_000);
        let allocation = calc.calculate(&b, &beneficiary("x", Priority::Urgent, Category::Emergency));

        assert_eq!(allocation.unclamped, Amount::from_units(5_000));
        assert_eq!(allocation.recommended, Amount::from_units(700));
    }

    #[test]
    fn calculation_is_idempotent() {
        let calc = AllocationCalculator::default();
        let b = balance(12_345);
        let target = beneficiary("x", Priority::High, Category::Education);
        assert_eq!(calc.calculate(&b, &target), calc.calculate(&b, &target));
    }

    #[test]
    fn proposal_orders_by_priority_and_truncates_greedily() {
        let calc = AllocationCalculator::default();
        // available = 800, max single payout = 70.
        let b = balance(1_000);
        let beneficiaries: Vec<Beneficiary> = (0..14)
            .map(|i| {
                let priority = if i % 2 == 0 { Priority::Low } else { Priority::Urgent };
                beneficiary(&format!("b{i:02}"), priority, Category::Emergency)
            })
            .collect();

        let proposal = calc.propose(&b, &beneficiaries);

        // Urgent lines first, input order preserved within the tier.
        let first: Vec<&str> = proposal.items[..3]
            .iter()
            .map(|item| item.beneficiary_id.as_str())
            .collect();
        assert_eq!(first, vec!["b01", "b03", "b05"]);
        assert!(proposal.items[..7]
            .iter()
            .all(|item| item.priority == Priority::Urgent));

        // 7 urgent lines × 50 = 350, leaving 450 for seven low lines × 12.50.
        assert!(proposal.items.iter().all(|item| !item.truncated));
        assert_eq!(proposal.total_proposed, Amount::from_minor(35_000 + 7 * 1_250));
    }

    #[test]
    fn proposal_truncates_to_zero_once_exhausted() {
        let table = AllocationTable {
            category_rates: CategoryRates {
                general: BasisPoints::percent(7),
                ..CategoryRates::default()
            },
            ..AllocationTable::default()
        };
        let calc = AllocationCalculator::new(table);
        // available = 8,000, every urgent/general line recommends 700.
        let b = balance(10_000);
        let beneficiaries: Vec<Beneficiary> = (0..13)
            .map(|i| beneficiary(&format!("b{i:02}"), Priority::Urgent, Category::General))
            .collect();

        let proposal = calc.propose(&b, &beneficiaries);
        let proposed: Vec<Amount> = proposal.items.iter().map(|item| item.proposed).collect();

        assert!(proposed[..11].iter().all(|a| *a == Amount::from_units(700)));
        assert_eq!(proposed[11], Amount::from_units(300));
        assert_eq!(proposed[12], Amount::zero());
        assert!(proposal.items[11].truncated);
        assert_eq!(proposal.remaining_available, Amount::zero());
        assert_eq!(proposal.total_proposed, Amount::from_units(8_000));
    }
}
