//! Governance log: the append-only, hash-chained record of every ledger mutation
//! and every explicitly logged decision.
//!
//! The log never rejects or blocks an operation. It only records what already
//! happened, and [`GovernanceLog::verify_integrity`] is the sole tamper check.

use crate::clock::Clock;
use crate::error::TreasuryResult;
use crate::storage::{in_window, AppendStore, Record};
use crate::types::Metadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Decision type tag. Known tags serialize as their SCREAMING_SNAKE name; anything
/// else is carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DecisionType {
    TreasuryDeposit,
    TreasuryWithdrawal,
    DistributionCompleted,
    DistributionDeferred,
    DistributionFailed,
    BeneficiaryRegistered,
    BeneficiaryUpdated,
    Custom(String),
}

impl DecisionType {
    pub fn custom(tag: impl Into<String>) -> Self {
        Self::from(tag.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::TreasuryDeposit => "TREASURY_DEPOSIT",
            Self::TreasuryWithdrawal => "TREASURY_WITHDRAWAL",
            Self::DistributionCompleted => "DISTRIBUTION_COMPLETED",
            Self::DistributionDeferred => "DISTRIBUTION_DEFERRED",
            Self::DistributionFailed => "DISTRIBUTION_FAILED",
            Self::BeneficiaryRegistered => "BENEFICIARY_REGISTERED",
            Self::BeneficiaryUpdated => "BENEFICIARY_UPDATED",
            Self::Custom(tag) => tag,
        }
    }
}

impl From<String> for DecisionType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "TREASURY_DEPOSIT" => Self::TreasuryDeposit,
            "TREASURY_WITHDRAWAL" => Self::TreasuryWithdrawal,
            "DISTRIBUTION_COMPLETED" => Self::DistributionCompleted,
            "DISTRIBUTION_DEFERRED" => Self::DistributionDeferred,
            "DISTRIBUTION_FAILED" => Self::DistributionFailed,
            "BENEFICIARY_REGISTERED" => Self::BeneficiaryRegistered,
            "BENEFICIARY_UPDATED" => Self::BeneficiaryUpdated,
            _ => Self::Custom(tag),
        }
    }
}

impl From<DecisionType> for String {
    fn from(value: DecisionType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Approved,
    Rejected,
    Executed,
    Deferred,
    Failed,
    Recorded,
}

/// Immutable, hash-linked governance record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceDecision {
    pub decision_id: String,
    pub index: u64,
    pub decision_type: DecisionType,
    pub description: String,
    pub proposer: String,
    pub approvers: Vec<String>,
    pub outcome: DecisionOutcome,
    pub timestamp: DateTime<Utc>,
    pub metadata: Metadata,
    pub previous_hash: Option<String>,
    pub decision_hash: String,
}

impl GovernanceDecision {
    /// Recompute the content hash from the stored fields.
    pub fn compute_hash(&self) -> String {
        let material = serde_json::json!({
            "decision_id": self.decision_id,
            "index": self.index,
            "decision_type": self.decision_type,
            "description": self.description,
            "proposer": self.proposer,
            "approvers": self.approvers,
            "outcome": self.outcome,
            "timestamp": self.timestamp,
            "metadata": self.metadata,
            "previous_hash": self.previous_hash,
        });

        let bytes = serde_json::to_vec(&material).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }

    pub fn hash_matches(&self) -> bool {
        self.decision_hash == self.compute_hash()
    }
}

impl Record for GovernanceDecision {
    fn record_id(&self) -> &str {
        &self.decision_id
    }

    fn recorded_at(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Input for [`GovernanceLog::log_decision`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub decision_type: DecisionType,
    pub description: String,
    pub proposer: String,
    #[serde(default)]
    pub approvers: Vec<String>,
    pub outcome: DecisionOutcome,
    #[serde(default)]
    pub metadata: Metadata,
}

impl DecisionRequest {
    pub fn new(
        decision_type: DecisionType,
        description: impl Into<String>,
        proposer: impl Into<String>,
        outcome: DecisionOutcome,
    ) -> Self {
        Self {
            decision_type,
            description: description.into(),
            proposer: proposer.into(),
            approvers: Vec::new(),
            outcome,
            metadata: Metadata::new(),
        }
    }

    pub fn with_approver(mut self, approver: impl Into<String>) -> Self {
        self.approvers.push(approver.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata_map(mut self, metadata: &Metadata) -> Self {
        self.metadata
            .extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }
}

/// Query filter for [`GovernanceLog::get_decisions`]. Time bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionFilter {
    pub decision_type: Option<DecisionType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DecisionFilter {
    pub fn of_type(decision_type: DecisionType) -> Self {
        Self {
            decision_type: Some(decision_type),
            ..Self::default()
        }
    }

    pub fn matches(&self, decision: &GovernanceDecision) -> bool {
        self.decision_type
            .as_ref()
            .map_or(true, |wanted| *wanted == decision.decision_type)
            && in_window(decision.timestamp, self.from, self.to)
    }
}

/// Verification result for one stored decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryVerification {
    pub decision_id: String,
    pub index: u64,
    /// Recomputed hash equals the stored hash.
    pub hash_valid: bool,
    /// Stored `previous_hash` equals the preceding decision's stored hash. A break
    /// means a neighbouring line was edited, removed, or reordered.
    pub link_valid: bool,
}

impl EntryVerification {
    pub fn is_valid(&self) -> bool {
        self.hash_valid && self.link_valid
    }
}

/// `invalid_count` counts decisions whose own content no longer matches their hash,
/// so editing one stored decision flags exactly that decision. Chain breaks are
/// counted separately in `broken_links`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub total: usize,
    pub valid_count: usize,
    pub invalid_count: usize,
    pub broken_links: usize,
    pub entries: Vec<EntryVerification>,
}

impl IntegrityReport {
    pub fn is_intact(&self) -> bool {
        self.invalid_count == 0 && self.broken_links == 0
    }

    /// Ids of decisions whose recomputed hash does not match.
    pub fn invalid_ids(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|entry| !entry.hash_valid)
            .map(|entry| entry.decision_id.as_str())
            .collect()
    }
}

pub struct GovernanceLog {
    store: Box<dyn AppendStore<GovernanceDecision>>,
    clock: Arc<dyn Clock>,
    unrecorded: u64,
}

impl GovernanceLog {
    pub fn new(store: Box<dyn AppendStore<GovernanceDecision>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            unrecorded: 0,
        }
    }

    /// Append a decision. Business rules never apply here; only storage can fail.
    pub fn log_decision(&mut self, request: DecisionRequest) -> TreasuryResult<GovernanceDecision> {
        let previous_hash = self.store.last().map(|d| d.decision_hash.clone());
        let mut decision = GovernanceDecision {
            decision_id: Uuid::new_v4().to_string(),
            index: self.store.len() as u64,
            decision_type: request.decision_type,
            description: request.description,
            proposer: request.proposer,
            approvers: request.approvers,
            outcome: request.outcome,
            timestamp: self.clock.now(),
            metadata: request.metadata,
            previous_hash,
            decision_hash: String::new(),
        };
        decision.decision_hash = decision.compute_hash();

        self.store.append(decision.clone())?;

        info!(
            decision_id = %decision.decision_id,
            decision_type = %decision.decision_type,
            proposer = %decision.proposer,
            "Governance decision logged"
        );

        Ok(decision)
    }

    /// Log a decision for a state change that has already been committed.
    ///
    /// The change stands either way. A storage failure is logged at `error` level and
    /// counted in [`GovernanceLog::unrecorded`] instead of being returned.
    pub fn log_committed(&mut self, request: DecisionRequest) -> Option<GovernanceDecision> {
        let decision_type = request.decision_type.clone();
        match self.log_decision(request) {
            Ok(decision) => Some(decision),
            Err(err) => {
                self.unrecorded += 1;
                error!(
                    decision_type = %decision_type,
                    error = %err,
                    unrecorded = self.unrecorded,
                    "Committed change has no governance decision"
                );
                None
            }
        }
    }

    /// Committed changes since startup whose decision could not be stored.
    pub fn unrecorded(&self) -> u64 {
        self.unrecorded
    }

    pub fn get_decisions(&self, filter: &DecisionFilter) -> Vec<GovernanceDecision> {
        self.store
            .all()
            .iter()
            .filter(|decision| filter.matches(decision))
            .cloned()
            .collect()
    }

    pub fn decisions(&self) -> &[GovernanceDecision] {
        self.store.all()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Recompute every stored hash and chain link.
    ///
    /// A mismatch is a finding, not an error: it is reported and logged, and the
    /// treasury keeps operating.
    pub fn verify_integrity(&self) -> IntegrityReport {
        let mut previous_hash: Option<&str> = None;
        let mut entries = Vec::with_capacity(self.store.len());

        for decision in self.store.all() {
            let hash_valid = decision.hash_matches();
            let link_valid = decision.previous_hash.as_deref() == previous_hash;
            if !hash_valid || !link_valid {
                warn!(
                    decision_id = %decision.decision_id,
                    index = decision.index,
                    hash_valid,
                    link_valid,
                    "Governance decision failed integrity verification"
                );
            }
            entries.push(EntryVerification {
                decision_id: decision.decision_id.clone(),
                index: decision.index,
                hash_valid,
                link_valid,
            });
            previous_hash = Some(decision.decision_hash.as_str());
        }

        let invalid_count = entries.iter().filter(|e| !e.hash_valid).count();
        let broken_links = entries.iter().filter(|e| !e.link_valid).count();
        IntegrityReport {
            total: entries.len(),
            valid_count: entries.len() - invalid_count,
            invalid_count,
            broken_links,
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::testing::FaultyAppendStore;
    use crate::storage::MemoryAppendStore;
    use chrono::{Duration, TimeZone};

    fn log_with_clock() -> (GovernanceLog, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap());
        let log = GovernanceLog::new(Box::new(MemoryAppendStore::new()), Arc::new(clock.clone()));
        (log, clock)
    }

    fn request(tag: DecisionType, description: &str) -> DecisionRequest {
        DecisionRequest::new(tag, description, "council", DecisionOutcome::Approved)
            .with_approver("alice")
            .with_metadata("ref", description)
    }

    #[test]
    fn decisions_are_hash_chained() {
        let (mut log, _) = log_with_clock();
        let first = log
            .log_decision(request(DecisionType::custom("POLICY_CHANGE"), "raise reserve"))
            .unwrap();
        let second = log
            .log_decision(request(DecisionType::TreasuryDeposit, "donation"))
            .unwrap();

        assert_eq!(first.index, 0);
        assert!(first.previous_hash.is_none());
        assert_eq!(second.previous_hash.as_deref(), Some(first.decision_hash.as_str()));
        assert!(log.verify_integrity().is_intact());
    }

    #[test]
    fn filters_by_type_and_window() {
        let (mut log, clock) = log_with_clock();
        let start = clock.now();
        log.log_decision(request(DecisionType::TreasuryDeposit, "d1"))
            .unwrap();
        clock.advance(Duration::hours(1));
        log.log_decision(request(DecisionType::TreasuryWithdrawal, "w1"))
            .unwrap();
        clock.advance(Duration::hours(1));
        log.log_decision(request(DecisionType::TreasuryDeposit, "d2"))
            .unwrap();

        let deposits = log.get_decisions(&DecisionFilter::of_type(DecisionType::TreasuryDeposit));
        assert_eq!(deposits.len(), 2);

        let windowed = log.get_decisions(&DecisionFilter {
            decision_type: None,
            from: Some(start + Duration::minutes(30)),
            to: Some(start + Duration::hours(2)),
        });
        let descriptions: Vec<&str> = windowed.iter().map(|d| d.description.as_str()).collect();
        assert_eq!(descriptions, vec!["w1", "d2"]);
    }

    #[test]
    fn tampering_flags_exactly_one_entry() {
        let (mut log, _) = log_with_clock();
        for i in 0..4 {
            log.log_decision(request(DecisionType::custom("VOTE"), &format!("motion {i}")))
                .unwrap();
        }

        let mut stored = log.decisions().to_vec();
        stored[2].description = "motion rewritten".to_string();

        let mut tampered_store = MemoryAppendStore::new();
        for decision in stored {
            tampered_store.append(decision).unwrap();
        }
        let clock = ManualClock::new(Utc::now());
        let tampered = GovernanceLog::new(Box::new(tampered_store), Arc::new(clock));

        let report = tampered.verify_integrity();
        assert_eq!(report.total, 4);
        assert_eq!(report.invalid_count, 1);
        assert_eq!(report.valid_count, 3);
        assert!(!report.entries[2].hash_valid);
        assert!(report.entries[3].link_valid);
        assert_eq!(report.broken_links, 0);
        assert_eq!(report.invalid_ids(), vec![stored_id(&tampered, 2)]);
    }

    fn stored_id(log: &GovernanceLog, index: usize) -> &str {
        log.decisions()[index].decision_id.as_str()
    }

    fn rebuild(decisions: Vec<GovernanceDecision>) -> GovernanceLog {
        let mut store = MemoryAppendStore::new();
        for decision in decisions {
            store.append(decision).unwrap();
        }
        GovernanceLog::new(Box::new(store), Arc::new(ManualClock::new(Utc::now())))
    }

    #[test]
    fn rewritten_hash_fails_only_its_own_entry() {
        let (mut log, _) = log_with_clock();
        for i in 0..4 {
            log.log_decision(request(DecisionType::custom("VOTE"), &format!("motion {i}")))
                .unwrap();
        }

        let mut stored = log.decisions().to_vec();
        stored[1].decision_hash = "0".repeat(64);
        let report = rebuild(stored).verify_integrity();

        assert_eq!(report.invalid_count, 1);
        assert_eq!(report.valid_count, 3);
        assert!(!report.entries[1].hash_valid);
        assert!(report.entries[2].hash_valid);
        assert!(!report.entries[2].link_valid);
        assert_eq!(report.broken_links, 1);
        assert!(!report.is_intact());
    }

    #[test]
    fn removed_decision_breaks_the_chain() {
        let (mut log, _) = log_with_clock();
        for i in 0..3 {
            log.log_decision(request(DecisionType::custom("VOTE"), &format!("motion {i}")))
                .unwrap();
        }

        let mut stored = log.decisions().to_vec();
        stored.remove(1);
        let report = rebuild(stored).verify_integrity();

        assert_eq!(report.total, 2);
        assert_eq!(report.invalid_count, 0);
        assert_eq!(report.broken_links, 1);
        assert!(!report.entries[1].link_valid);
        assert!(!report.is_intact());
    }

    #[test]
    fn committed_changes_survive_a_failing_store() {
        let store = FaultyAppendStore::<GovernanceDecision>::new();
        let faults = store.switch();
        let mut log = GovernanceLog::new(
            Box::new(store),
            Arc::new(ManualClock::new(Utc::now())),
        );

        faults.fail_writes(true);
        assert!(log
            .log_committed(request(DecisionType::TreasuryDeposit, "lost"))
            .is_none());
        assert_eq!(log.unrecorded(), 1);
        assert!(log.is_empty());

        faults.fail_writes(false);
        assert!(log
            .log_committed(request(DecisionType::TreasuryDeposit, "kept"))
            .is_some());
        assert_eq!(log.len(), 1);
        assert_eq!(log.unrecorded(), 1);
    }

    #[test]
    fn decision_type_round_trips_through_json() {
        let known = serde_json::to_string(&DecisionType::DistributionCompleted).unwrap();
        assert_eq!(known, "\"DISTRIBUTION_COMPLETED\"");
        let custom: DecisionType = serde_json::from_str("\"CHARTER_AMENDMENT\"").unwrap();
        assert_eq!(custom, DecisionType::Custom("CHARTER_AMENDMENT".to_string()));
    }
}
