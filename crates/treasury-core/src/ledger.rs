use crate::clock::Clock;
use crate::error::{TreasuryError, TreasuryResult};
use crate::governance::{DecisionOutcome, DecisionRequest, DecisionType, GovernanceLog};
use crate::storage::{AppendStore, Record};
use crate::types::{Amount, BasisPoints, Metadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Ledger entry types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryKind {
    Deposit,
    Withdrawal,
}

/// Immutable, content-hashed balance mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: String,
    pub index: u64,
    pub kind: LedgerEntryKind,
    pub amount: Amount,
    /// Deposit source or withdrawal destination.
    pub counterparty: String,
    pub approver: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub balance_before: Amount,
    pub balance_after: Amount,
    pub metadata: Metadata,
    pub entry_hash: String,
}

impl LedgerEntry {
    pub fn compute_hash(&self) -> String {
        compute_entry_hash(
            &self.entry_id,
            self.index,
            self.kind,
            self.amount,
            &self.counterparty,
            self.approver.as_deref(),
            self.timestamp,
            self.balance_before,
            self.balance_after,
            &self.metadata,
        )
    }

    pub fn hash_matches(&self) -> bool {
        self.entry_hash == self.compute_hash()
    }
}

impl Record for LedgerEntry {
    fn record_id(&self) -> &str {
        &self.entry_id
    }

    fn recorded_at(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Derived balance view. Never stored; recomputed from the ledger total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub total: Amount,
    pub reserved: Amount,
    pub available: Amount,
    pub max_single_payout: Amount,
}

impl Balance {
    pub fn compute(total: Amount, reserve_fraction: BasisPoints, payout_cap: BasisPoints) -> Self {
        let reserved = total.apply_bps(reserve_fraction);
        Self {
            total,
            reserved,
            available: total.saturating_sub(reserved),
            max_single_payout: total.apply_bps(payout_cap),
        }
    }
}

/// Ledger entry annotated with its tamper check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditedEntry {
    pub entry: LedgerEntry,
    pub hash_valid: bool,
}

/// Result of re-verifying every stored ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerIntegrity {
    pub total_entries: usize,
    pub valid_count: usize,
    pub invalid_entry_ids: Vec<String>,
    /// Indices whose `balance_before` does not match the preceding `balance_after`.
    pub continuity_breaks: Vec<u64>,
}

impl LedgerIntegrity {
    pub fn is_intact(&self) -> bool {
        self.invalid_entry_ids.is_empty() && self.continuity_breaks.is_empty()
    }
}

/// Authoritative fund balance and its append-only mutation history.
///
/// Every mutation validates first, persists the entry, and then appends the matching
/// governance decision before returning. Once the entry is persisted the mutation is
/// committed: a failed decision append is reported through
/// [`GovernanceLog::unrecorded`], never as an error.
pub struct Ledger {
    store: Box<dyn AppendStore<LedgerEntry>>,
    reserve_fraction: BasisPoints,
    payout_cap: BasisPoints,
    clock: Arc<dyn Clock>,
    total: Amount,
}

impl Ledger {
    /// Build a ledger over `store`, taking the running total from the last stored entry.
    pub fn new(
        store: Box<dyn AppendStore<LedgerEntry>>,
        reserve_fraction: BasisPoints,
        payout_cap: BasisPoints,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let total = store
            .last()
            .map(|entry| entry.balance_after)
            .unwrap_or_default();

        Self {
            store,
            reserve_fraction,
            payout_cap,
            clock,
            total,
        }
    }

    pub fn balance(&self) -> Balance {
        Balance::compute(self.total, self.reserve_fraction, self.payout_cap)
    }

    pub fn total(&self) -> Amount {
        self.total
    }

    pub fn deposit(
        &mut self,
        amount: Amount,
        source: &str,
        metadata: Metadata,
        governance: &mut GovernanceLog,
    ) -> TreasuryResult<LedgerEntry> {
        if amount.is_zero() {
            return Err(TreasuryError::InvalidAmount(amount));
        }
        let balance_after = self
            .total
            .checked_add(amount)
            .ok_or(TreasuryError::InvalidAmount(amount))?;

        let entry = self.build_entry(
            LedgerEntryKind::Deposit,
            amount,
            source,
            None,
            balance_after,
            metadata,
        );
        self.commit(entry.clone())?;

        info!(
            entry_id = %entry.entry_id,
            amount = %amount,
            source,
            total = %self.total,
            "Deposit committed"
        );

        governance.log_committed(
            DecisionRequest::new(
                DecisionType::TreasuryDeposit,
                format!("Deposit of {amount} from {source}"),
                source,
                DecisionOutcome::Executed,
            )
            .with_metadata("ledger_entry_id", entry.entry_id.clone())
            .with_metadata("entry_hash", entry.entry_hash.clone())
            .with_metadata("amount_minor", amount.minor().to_string()),
        );

        Ok(entry)
    }

    /// Check a withdrawal against the current total without mutating anything.
    pub fn check_withdrawal(&self, amount: Amount) -> TreasuryResult<()> {
        if amount.is_zero() {
            return Err(TreasuryError::InvalidAmount(amount));
        }
        if amount > self.total {
            return Err(TreasuryError::InsufficientFunds {
                requested: amount,
                total: self.total,
            });
        }

        // Reserve is measured against the pre-withdrawal total.
        let reserved = self.total.apply_bps(self.reserve_fraction);
        let remaining = self.total.saturating_sub(amount);
        if remaining < reserved {
            return Err(TreasuryError::ReserveBreach {
                requested: amount,
                remaining,
                reserved,
            });
        }

        Ok(())
    }

    pub fn withdraw(
        &mut self,
        amount: Amount,
        destination: &str,
        approver: &str,
        metadata: Metadata,
        governance: &mut GovernanceLog,
    ) -> TreasuryResult<LedgerEntry> {
        if let Err(err) = self.check_withdrawal(amount) {
            warn!(
                amount = %amount,
                destination,
                approver,
                total = %self.total,
                code = err.code(),
                "Withdrawal rejected"
            );
            return Err(err);
        }

        let balance_after = self.total.saturating_sub(amount);
        let entry = self.build_entry(
            LedgerEntryKind::Withdrawal,
            amount,
            destination,
            Some(approver.to_string()),
            balance_after,
            metadata,
        );
        self.commit(entry.clone())?;

        info!(
            entry_id = %entry.entry_id,
            amount = %amount,
            destination,
            approver,
            total = %self.total,
            "Withdrawal committed"
        );

        governance.log_committed(
            DecisionRequest::new(
                DecisionType::TreasuryWithdrawal,
                format!("Withdrawal of {amount} to {destination}"),
                approver,
                DecisionOutcome::Executed,
            )
            .with_approver(approver)
            .with_metadata("ledger_entry_id", entry.entry_id.clone())
            .with_metadata("entry_hash", entry.entry_hash.clone())
            .with_metadata("amount_minor", amount.minor().to_string()),
        );

        Ok(entry)
    }

    /// Entries in the inclusive time window, each with its recomputed-hash check.
    pub fn audit_trail(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Vec<AuditedEntry> {
        self.store
            .range(from, to)
            .into_iter()
            .map(|entry| AuditedEntry {
                hash_valid: entry.hash_matches(),
                entry: entry.clone(),
            })
            .collect()
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        self.store.all()
    }

    pub fn entry(&self, entry_id: &str) -> Option<&LedgerEntry> {
        self.store.get(entry_id)
    }

    /// Most recent entry whose metadata maps `key` to `value`.
    pub fn find_by_metadata(&self, key: &str, value: &str) -> Option<&LedgerEntry> {
        self.store
            .all()
            .iter()
            .rev()
            .find(|entry| entry.metadata.get(key).map(String::as_str) == Some(value))
    }

    pub fn verify_entries(&self) -> LedgerIntegrity {
        let mut invalid_entry_ids = Vec::new();
        let mut continuity_breaks = Vec::new();
        let mut previous_after: Option<Amount> = None;

        for entry in self.store.all() {
            if !entry.hash_matches() {
                invalid_entry_ids.push(entry.entry_id.clone());
            }
            let expected_before = previous_after.unwrap_or_default();
            if entry.balance_before != expected_before {
                continuity_breaks.push(entry.index);
            }
            previous_after = Some(entry.balance_after);
        }

        if !invalid_entry_ids.is_empty() || !continuity_breaks.is_empty() {
            warn!(
                invalid = invalid_entry_ids.len(),
                continuity_breaks = continuity_breaks.len(),
                "Ledger entries failed integrity verification"
            );
        }

        let total_entries = self.store.len();
        LedgerIntegrity {
            total_entries,
            valid_count: total_entries - invalid_entry_ids.len(),
            invalid_entry_ids,
            continuity_breaks,
        }
    }

    fn build_entry(
        &self,
        kind: LedgerEntryKind,
        amount: Amount,
        counterparty: &str,
        approver: Option<String>,
        balance_after: Amount,
        metadata: Metadata,
    ) -> LedgerEntry {
        let entry_id = Uuid::new_v4().to_string();
        let index = self.store.len() as u64;
        let timestamp = self.clock.now();
        let entry_hash = compute_entry_hash(
            &entry_id,
            index,
            kind,
            amount,
            counterparty,
            approver.as_deref(),
            timestamp,
            self.total,
            balance_after,
            &metadata,
        );

        LedgerEntry {
            entry_id,
            index,
            kind,
            amount,
            counterparty: counterparty.to_string(),
            approver,
            timestamp,
            balance_before: self.total,
            balance_after,
            metadata,
            entry_hash,
        }
    }

    /// Persist first, then move the in-memory total.
    fn commit(&mut self, entry: LedgerEntry) -> TreasuryResult<()> {
        let balance_after = entry.balance_after;
        self.store.append(entry)?;
        self.total = balance_after;
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn compute_entry_hash(
    entry_id: &str,
    index: u64,
    kind: LedgerEntryKind,
    amount: Amount,
    counterparty: &str,
    approver: Option<&str>,
    timestamp: DateTime<Utc>,
    balance_before: Amount,
    balance_after: Amount,
    metadata: &Metadata,
) -> String {
    let material = serde_json::json!({
        "entry_id": entry_id,
        "index": index,
        "kind": kind,
        "amount": amount,
        "counterparty": counterparty,
        "approver": approver,
        "timestamp": timestamp,
        "balance_before": balance_before,
        "balance_after": balance_after,
        "metadata": metadata,
    });

    let bytes = serde_json::to_vec(&material).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::governance::GovernanceDecision;
    use crate::storage::testing::FaultyAppendStore;
    use crate::storage::MemoryAppendStore;
    use chrono::{Duration, TimeZone};

    fn setup() -> (Ledger, GovernanceLog, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 2, 2, 8, 0, 0).unwrap());
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let ledger = Ledger::new(
            Box::new(MemoryAppendStore::new()),
            BasisPoints::percent(20),
            BasisPoints::percent(7),
            shared.clone(),
        );
        let governance = GovernanceLog::new(Box::new(MemoryAppendStore::new()), shared);
        (ledger, governance, clock)
    }

    #[test]
    fn deposit_updates_balance_and_logs_decision() {
        let (mut ledger, mut governance, _) = setup();

        let entry = ledger
            .deposit(Amount::from_units(10_000), "donor-1", Metadata::new(), &mut governance)
            .unwrap();

        assert_eq!(entry.balance_before, Amount::zero());
        assert_eq!(entry.balance_after, Amount::from_units(10_000));
        assert!(entry.hash_matches());

        let balance = ledger.balance();
        assert_eq!(balance.reserved, Amount::from_units(2_000));
        assert_eq!(balance.available, Amount::from_units(8_000));
        assert_eq!(balance.max_single_payout, Amount::from_units(700));

        let decisions = governance.decisions();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].decision_type, DecisionType::TreasuryDeposit);
        assert_eq!(
            decisions[0].metadata.get("ledger_entry_id"),
            Some(&entry.entry_id)
        );
    }

    #[test]
    fn rejects_non_positive_amounts() {
        let (mut ledger, mut governance, _) = setup();
        assert!(matches!(
            ledger.deposit(Amount::zero(), "donor", Metadata::new(), &mut governance),
            Err(TreasuryError::InvalidAmount(_))
        ));
        assert!(matches!(
            ledger.withdraw(Amount::zero(), "dest", "ops", Metadata::new(), &mut governance),
            Err(TreasuryError::InvalidAmount(_))
        ));
        assert!(ledger.entries().is_empty());
        assert!(governance.is_empty());
    }

    #[test]
    fn withdrawal_cannot_exceed_total() {
        let (mut ledger, mut governance, _) = setup();
        ledger
            .deposit(Amount::from_units(100), "donor", Metadata::new(), &mut governance)
            .unwrap();

        let err = ledger
            .withdraw(Amount::from_units(101), "dest", "ops", Metadata::new(), &mut governance)
            .unwrap_err();
        assert!(matches!(err, TreasuryError::InsufficientFunds { .. }));
        assert_eq!(ledger.total(), Amount::from_units(100));
    }

    #[test]
    fn reserve_is_measured_against_pre_withdrawal_total() {
        let (mut ledger, mut governance, _) = setup();
        ledger
            .deposit(Amount::from_units(10_000), "donor", Metadata::new(), &mut governance)
            .unwrap();

        // 10,000 - 8,001 = 1,999 < 2,000 reserve.
        let err = ledger
            .withdraw(Amount::from_units(8_001), "dest", "ops", Metadata::new(), &mut governance)
            .unwrap_err();
        assert!(matches!(err, TreasuryError::ReserveBreach { .. }));
        assert_eq!(ledger.total(), Amount::from_units(10_000));
        assert_eq!(governance.len(), 1);

        let entry = ledger
            .withdraw(Amount::from_units(8_000), "dest", "ops", Metadata::new(), &mut governance)
            .unwrap();
        assert_eq!(entry.balance_after, Amount::from_units(2_000));
        assert_eq!(entry.approver.as_deref(), Some("ops"));
        assert_eq!(governance.len(), 2);
    }

    #[test]
    fn audit_trail_filters_by_time_and_flags_tampering() {
        let (mut ledger, mut governance, clock) = setup();
        let start = clock.now();
        for units in [100, 200, 300] {
            ledger
                .deposit(Amount::from_units(units), "donor", Metadata::new(), &mut governance)
                .unwrap();
            clock.advance(Duration::minutes(10));
        }

        let window = ledger.audit_trail(Some(start + Duration::minutes(10)), None);
        assert_eq!(window.len(), 2);
        assert!(window.iter().all(|audited| audited.hash_valid));

        let mut stored = ledger.entries().to_vec();
        stored[1].counterparty = "someone-else".to_string();
        let mut tampered_store = MemoryAppendStore::new();
        for entry in stored {
            tampered_store.append(entry).unwrap();
        }
        let tampered = Ledger::new(
            Box::new(tampered_store),
            BasisPoints::percent(20),
            BasisPoints::percent(7),
            Arc::new(clock.clone()),
        );

        let trail = tampered.audit_trail(None, None);
        let flags: Vec<bool> = trail.iter().map(|audited| audited.hash_valid).collect();
        assert_eq!(flags, vec![true, false, true]);

        let integrity = tampered.verify_entries();
        assert_eq!(integrity.invalid_entry_ids.len(), 1);
        assert!(integrity.continuity_breaks.is_empty());
        assert_eq!(tampered.total(), Amount::from_units(600));
    }

    #[test]
    fn committed_mutations_stand_when_governance_store_fails() {
        let (mut ledger, _, clock) = setup();
        let store = FaultyAppendStore::<GovernanceDecision>::new();
        let faults = store.switch();
        let mut governance = GovernanceLog::new(Box::new(store), Arc::new(clock));

        faults.fail_writes(true);
        let entry = ledger
            .deposit(Amount::from_units(500), "donor", Metadata::new(), &mut governance)
            .unwrap();
        ledger
            .withdraw(Amount::from_units(100), "dest", "ops", Metadata::new(), &mut governance)
            .unwrap();

        assert_eq!(ledger.total(), Amount::from_units(400));
        assert_eq!(ledger.entries().len(), 2);
        assert_eq!(ledger.entry(&entry.entry_id), Some(&entry));
        assert!(governance.is_empty());
        assert_eq!(governance.unrecorded(), 2);
    }

    #[test]
    fn entries_are_found_by_metadata() {
        let (mut ledger, mut governance, _) = setup();
        ledger
            .deposit(Amount::from_units(1_000), "donor", Metadata::new(), &mut governance)
            .unwrap();
        let mut metadata = Metadata::new();
        metadata.insert("pending_id".to_string(), "p-1".to_string());
        let entry = ledger
            .withdraw(Amount::from_units(10), "dest", "ops", metadata, &mut governance)
            .unwrap();

        assert_eq!(ledger.find_by_metadata("pending_id", "p-1"), Some(&entry));
        assert!(ledger.find_by_metadata("pending_id", "p-2").is_none());
    }
}
