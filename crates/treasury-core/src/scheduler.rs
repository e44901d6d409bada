//! Distribution scheduler.
//!
//! Turns payout requests into ledger withdrawals behind the safety gates:
//!
//! 1. beneficiary must exist and the amount must be positive
//! 2. daily count cap (UTC calendar day)
//! 3. per-payout cap against the current total
//! 4. large amounts are deferred until `execute_after`
//! 5. everything else executes immediately
//!
//! Deferred requests are finalized by [`DistributionScheduler::process_pending`], which
//! the caller drives. Nothing here runs on its own.
//!
//! A payout is committed once its ledger withdrawal is persisted. Bookkeeping writes
//! after that point (pending status, receipt, completed record, governance decision)
//! are logged and counted when they fail, never returned as errors. Released
//! withdrawals carry their `pending_id`, so a release whose status write was lost is
//! reconciled against the ledger instead of being paid again.

use crate::clock::Clock;
use crate::error::{TreasuryError, TreasuryResult};
use crate::governance::{DecisionOutcome, DecisionRequest, DecisionType, GovernanceLog};
use crate::ledger::{Ledger, LedgerEntry};
use crate::registry::BeneficiaryRegistry;
use crate::storage::{AppendStore, Record, SnapshotStore};
use crate::types::{Amount, Metadata};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::fmt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    Pending,
    Executed,
    Failed,
}

impl PendingStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A large distribution waiting out its approval delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDistribution {
    pub id: String,
    pub beneficiary_id: String,
    pub amount: Amount,
    pub requested_by: String,
    pub created_at: DateTime<Utc>,
    pub execute_after: DateTime<Utc>,
    pub status: PendingStatus,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ledger_entry_id: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl PendingDistribution {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.execute_after <= now
    }
}

impl Record for PendingDistribution {
    fn record_id(&self) -> &str {
        &self.id
    }

    fn recorded_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Immutable record of a payout that reached the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedDistribution {
    pub id: String,
    pub beneficiary_id: String,
    pub amount: Amount,
    pub ledger_entry_id: String,
    pub approver: String,
    pub completed_at: DateTime<Utc>,
    /// Set when the payout was released from the pending queue.
    #[serde(default)]
    pub pending_id: Option<String>,
}

impl Record for CompletedDistribution {
    fn record_id(&self) -> &str {
        &self.id
    }

    fn recorded_at(&self) -> DateTime<Utc> {
        self.completed_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionRequest {
    pub beneficiary_id: String,
    pub amount: Amount,
    pub approver: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl DistributionRequest {
    pub fn new(
        beneficiary_id: impl Into<String>,
        amount: Amount,
        approver: impl Into<String>,
    ) -> Self {
        Self {
            beneficiary_id: beneficiary_id.into(),
            amount,
            approver: approver.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "distribution", rename_all = "snake_case")]
pub enum DistributionOutcome {
    Completed(CompletedDistribution),
    Pending(PendingDistribution),
}

impl DistributionOutcome {
    pub fn completed(&self) -> Option<&CompletedDistribution> {
        match self {
            Self::Completed(completed) => Some(completed),
            Self::Pending(_) => None,
        }
    }

    pub fn pending(&self) -> Option<&PendingDistribution> {
        match self {
            Self::Pending(pending) => Some(pending),
            Self::Completed(_) => None,
        }
    }
}

/// Result of one `process_pending` pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub swept_at: DateTime<Utc>,
    pub executed: Vec<CompletedDistribution>,
    pub failed: Vec<PendingDistribution>,
    /// Entries already paid by an earlier sweep whose status write was lost.
    #[serde(default)]
    pub reconciled: Vec<PendingDistribution>,
    /// Pending entries whose delay has not yet elapsed.
    pub waiting: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.executed.is_empty() && self.failed.is_empty() && self.reconciled.is_empty()
    }
}

/// Scheduler rules taken from the treasury configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerRules {
    pub large_transaction_threshold: Amount,
    pub min_approval_delay: Duration,
    pub max_daily_distributions: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DailyCounter {
    day: NaiveDate,
    completed: u32,
}

impl DailyCounter {
    fn roll(&mut self, today: NaiveDate) {
        if self.day != today {
            debug!(previous = %self.day, today = %today, "Daily distribution counter reset");
            self.day = today;
            self.completed = 0;
        }
    }
}

/// Payout about to be executed against the ledger.
struct Payout {
    beneficiary_id: String,
    amount: Amount,
    approver: String,
    metadata: Metadata,
    release: Option<PendingDistribution>,
}

pub struct DistributionScheduler {
    pending: Box<dyn SnapshotStore<PendingDistribution>>,
    completed: Box<dyn AppendStore<CompletedDistribution>>,
    rules: SchedulerRules,
    clock: Arc<dyn Clock>,
    daily: DailyCounter,
    bookkeeping_faults: u64,
}

impl DistributionScheduler {
    /// Build a scheduler, counting today's completed distributions from `completed`.
    pub fn new(
        pending: Box<dyn SnapshotStore<PendingDistribution>>,
        completed: Box<dyn AppendStore<CompletedDistribution>>,
        rules: SchedulerRules,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let today = clock.now().date_naive();
        let completed_today = completed
            .all()
            .iter()
            .filter(|distribution| distribution.completed_at.date_naive() == today)
            .count();

        Self {
            pending,
            completed,
            rules,
            clock,
            daily: DailyCounter {
                day: today,
                completed: u32::try_from(completed_today).unwrap_or(u32::MAX),
            },
            bookkeeping_faults: 0,
        }
    }

    pub fn rules(&self) -> &SchedulerRules {
        &self.rules
    }

    pub fn execute_distribution(
        &mut self,
        ledger: &mut Ledger,
        registry: &mut BeneficiaryRegistry,
        governance: &mut GovernanceLog,
        request: DistributionRequest,
    ) -> TreasuryResult<DistributionOutcome> {
        if !registry.contains(&request.beneficiary_id) {
            return Err(TreasuryError::beneficiary_not_found(&request.beneficiary_id));
        }
        if request.amount.is_zero() {
            return Err(TreasuryError::InvalidAmount(request.amount));
        }

        let now = self.clock.now();
        self.daily.roll(now.date_naive());
        if self.daily.completed >= self.rules.max_daily_distributions {
            warn!(
                beneficiary_id = %request.beneficiary_id,
                completed = self.daily.completed,
                limit = self.rules.max_daily_distributions,
                "Distribution rejected: daily cap reached"
            );
            return Err(TreasuryError::DailyCapExceeded {
                completed: self.daily.completed,
                limit: self.rules.max_daily_distributions,
            });
        }

        let balance = ledger.balance();
        if request.amount > balance.max_single_payout {
            warn!(
                beneficiary_id = %request.beneficiary_id,
                amount = %request.amount,
                max_single_payout = %balance.max_single_payout,
                "Distribution rejected: payout cap exceeded"
            );
            return Err(TreasuryError::CapExceeded {
                requested: request.amount,
                max_single_payout: balance.max_single_payout,
            });
        }

        if request.amount > self.rules.large_transaction_threshold {
            let pending = self.defer(governance, request, now)?;
            return Ok(DistributionOutcome::Pending(pending));
        }

        let completed = self.pay(
            ledger,
            registry,
            governance,
            Payout {
                beneficiary_id: request.beneficiary_id,
                amount: request.amount,
                approver: request.approver,
                metadata: request.metadata,
                release: None,
            },
        )?;
        Ok(DistributionOutcome::Completed(completed))
    }

    /// Release every due pending distribution, oldest first.
    ///
    /// Only the ledger gates apply at release time. A ledger rejection marks the
    /// entry `failed`. Storage errors before any money moves abort the sweep and leave
    /// the entry pending.
    pub fn process_pending(
        &mut self,
        ledger: &mut Ledger,
        registry: &mut BeneficiaryRegistry,
        governance: &mut GovernanceLog,
        approver: &str,
    ) -> TreasuryResult<SweepReport> {
        let now = self.clock.now();
        self.daily.roll(now.date_naive());

        let mut due: Vec<PendingDistribution> = Vec::new();
        let mut waiting = 0;
        for pending in self.pending.list() {
            if pending.is_due(now) {
                due.push(pending.clone());
            } else if pending.status == PendingStatus::Pending {
                waiting += 1;
            }
        }
        due.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));

        let mut report = SweepReport {
            swept_at: now,
            executed: Vec::new(),
            failed: Vec::new(),
            reconciled: Vec::new(),
            waiting,
        };

        for pending in due {
            if let Some(entry) = ledger.find_by_metadata("pending_id", &pending.id) {
                let resolved = self.reconcile(pending, entry.clone(), now)?;
                report.reconciled.push(resolved);
                continue;
            }

            let mut metadata = pending.metadata.clone();
            metadata.insert("requested_by".to_string(), pending.requested_by.clone());
            let payout = Payout {
                beneficiary_id: pending.beneficiary_id.clone(),
                amount: pending.amount,
                approver: approver.to_string(),
                metadata,
                release: Some(pending.clone()),
            };

            match self.pay(ledger, registry, governance, payout) {
                Ok(completed) => report.executed.push(completed),
                Err(err @ TreasuryError::Storage(_)) => return Err(err),
                Err(err) => {
                    let pending = self.fail(governance, pending, approver, &err, now)?;
                    report.failed.push(pending);
                }
            }
        }

        if !report.is_empty() {
            info!(
                executed = report.executed.len(),
                failed = report.failed.len(),
                reconciled = report.reconciled.len(),
                waiting = report.waiting,
                "Pending distributions swept"
            );
        }

        Ok(report)
    }

    pub fn pending(&self, id: &str) -> TreasuryResult<PendingDistribution> {
        self.pending
            .get(id)
            .cloned()
            .ok_or_else(|| TreasuryError::pending_not_found(id))
    }

    /// Pending-queue entries in creation order, optionally restricted to one status.
    pub fn list_pending(&self, status: Option<PendingStatus>) -> Vec<PendingDistribution> {
        let mut entries: Vec<PendingDistribution> = self
            .pending
            .list()
            .into_iter()
            .filter(|pending| status.map_or(true, |status| pending.status == status))
            .cloned()
            .collect();
        entries.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        entries
    }

    pub fn list_completed(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Vec<CompletedDistribution> {
        self.completed.range(from, to).into_iter().cloned().collect()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Distributions completed so far on the current UTC day.
    pub fn daily_completed(&self) -> u32 {
        if self.daily.day == self.clock.now().date_naive() {
            self.daily.completed
        } else {
            0
        }
    }

    pub fn daily_remaining(&self) -> u32 {
        self.rules
            .max_daily_distributions
            .saturating_sub(self.daily_completed())
    }

    /// Post-withdrawal writes that failed since startup.
    pub fn bookkeeping_faults(&self) -> u64 {
        self.bookkeeping_faults
    }

    fn defer(
        &mut self,
        governance: &mut GovernanceLog,
        request: DistributionRequest,
        now: DateTime<Utc>,
    ) -> TreasuryResult<PendingDistribution> {
        let pending = PendingDistribution {
            id: Uuid::new_v4().to_string(),
            beneficiary_id: request.beneficiary_id,
            amount: request.amount,
            requested_by: request.approver,
            created_at: now,
            execute_after: now + self.rules.min_approval_delay,
            status: PendingStatus::Pending,
            metadata: request.metadata,
            resolved_at: None,
            ledger_entry_id: None,
            failure_reason: None,
        };
        self.pending.put(pending.clone())?;

        info!(
            pending_id = %pending.id,
            beneficiary_id = %pending.beneficiary_id,
            amount = %pending.amount,
            execute_after = %pending.execute_after,
            "Large distribution deferred"
        );

        governance.log_committed(
            DecisionRequest::new(
                DecisionType::DistributionDeferred,
                format!(
                    "Distribution of {} to {} deferred until {}",
                    pending.amount, pending.beneficiary_id, pending.execute_after
                ),
                pending.requested_by.clone(),
                DecisionOutcome::Deferred,
            )
            .with_approver(pending.requested_by.clone())
            .with_metadata_map(&pending.metadata)
            .with_metadata("pending_id", pending.id.clone())
            .with_metadata("beneficiary_id", pending.beneficiary_id.clone())
            .with_metadata("amount_minor", pending.amount.minor().to_string())
            .with_metadata("execute_after", pending.execute_after.to_rfc3339()),
        );

        Ok(pending)
    }

    /// Withdraw, then mark, credit, record, count, log. Validation happens inside the
    /// ledger. Nothing after the withdrawal can fail the payout.
    fn pay(
        &mut self,
        ledger: &mut Ledger,
        registry: &mut BeneficiaryRegistry,
        governance: &mut GovernanceLog,
        payout: Payout,
    ) -> TreasuryResult<CompletedDistribution> {
        if !registry.contains(&payout.beneficiary_id) {
            return Err(TreasuryError::beneficiary_not_found(&payout.beneficiary_id));
        }

        let distribution_id = Uuid::new_v4().to_string();
        let mut withdrawal_metadata = payout.metadata.clone();
        withdrawal_metadata.insert("distribution_id".to_string(), distribution_id.clone());
        withdrawal_metadata.insert("beneficiary_id".to_string(), payout.beneficiary_id.clone());
        if let Some(pending) = &payout.release {
            withdrawal_metadata.insert("pending_id".to_string(), pending.id.clone());
        }

        let entry = ledger.withdraw(
            payout.amount,
            &payout.beneficiary_id,
            &payout.approver,
            withdrawal_metadata,
            governance,
        )?;
        let now = self.clock.now();

        if let Some(pending) = &payout.release {
            let mut executed = pending.clone();
            executed.status = PendingStatus::Executed;
            executed.resolved_at = Some(now);
            executed.ledger_entry_id = Some(entry.entry_id.clone());
            if let Err(err) = self.pending.put(executed) {
                self.bookkeeping_fault("pending status", &entry.entry_id, err);
            }
        }

        let total_received =
            match registry.record_receipt(&payout.beneficiary_id, payout.amount, &entry.entry_id) {
                Ok(receipt) => Some(receipt.total_received),
                Err(err) => {
                    self.bookkeeping_fault("beneficiary receipt", &entry.entry_id, err);
                    None
                }
            };

        let completed = CompletedDistribution {
            id: distribution_id,
            beneficiary_id: payout.beneficiary_id,
            amount: payout.amount,
            ledger_entry_id: entry.entry_id,
            approver: payout.approver,
            completed_at: now,
            pending_id: payout.release.as_ref().map(|pending| pending.id.clone()),
        };
        if let Err(err) = self.completed.append(completed.clone()) {
            self.bookkeeping_fault("completed record", &completed.ledger_entry_id, err);
        }
        self.daily.completed = self.daily.completed.saturating_add(1);

        info!(
            distribution_id = %completed.id,
            beneficiary_id = %completed.beneficiary_id,
            amount = %completed.amount,
            completed_today = self.daily.completed,
            "Distribution completed"
        );

        let mut decision = DecisionRequest::new(
            DecisionType::DistributionCompleted,
            format!(
                "Distribution of {} to {}",
                completed.amount, completed.beneficiary_id
            ),
            completed.approver.clone(),
            DecisionOutcome::Executed,
        );
        if let Some(pending) = &payout.release {
            decision = decision
                .with_approver(pending.requested_by.clone())
                .with_metadata("pending_id", pending.id.clone());
        }
        if !decision.approvers.contains(&completed.approver) {
            decision = decision.with_approver(completed.approver.clone());
        }
        decision = decision
            .with_metadata_map(&payout.metadata)
            .with_metadata("distribution_id", completed.id.clone())
            .with_metadata("ledger_entry_id", completed.ledger_entry_id.clone())
            .with_metadata("beneficiary_id", completed.beneficiary_id.clone())
            .with_metadata("amount_minor", completed.amount.minor().to_string());
        if let Some(total_received) = total_received {
            decision = decision.with_metadata(
                "beneficiary_total_received_minor",
                total_received.minor().to_string(),
            );
        }
        governance.log_committed(decision);

        Ok(completed)
    }

    /// Resolve a pending entry whose withdrawal is already on the ledger.
    fn reconcile(
        &mut self,
        mut pending: PendingDistribution,
        entry: LedgerEntry,
        now: DateTime<Utc>,
    ) -> TreasuryResult<PendingDistribution> {
        warn!(
            pending_id = %pending.id,
            ledger_entry_id = %entry.entry_id,
            "Pending distribution already paid, marking executed"
        );

        let recorded = self
            .completed
            .all()
            .iter()
            .any(|completed| completed.pending_id.as_deref() == Some(pending.id.as_str()));
        if !recorded {
            let id = entry
                .metadata
                .get("distribution_id")
                .cloned()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            self.completed.append(CompletedDistribution {
                id,
                beneficiary_id: pending.beneficiary_id.clone(),
                amount: entry.amount,
                ledger_entry_id: entry.entry_id.clone(),
                approver: entry.approver.clone().unwrap_or_default(),
                completed_at: entry.timestamp,
                pending_id: Some(pending.id.clone()),
            })?;
        }

        pending.status = PendingStatus::Executed;
        pending.resolved_at = Some(now);
        pending.ledger_entry_id = Some(entry.entry_id);
        self.pending.put(pending.clone())?;
        Ok(pending)
    }

    fn bookkeeping_fault(&mut self, write: &str, ledger_entry_id: &str, err: impl fmt::Display) {
        self.bookkeeping_faults += 1;
        error!(
            write,
            ledger_entry_id,
            error = %err,
            faults = self.bookkeeping_faults,
            "Write after committed withdrawal failed"
        );
    }

    fn fail(
        &mut self,
        governance: &mut GovernanceLog,
        mut pending: PendingDistribution,
        approver: &str,
        err: &TreasuryError,
        now: DateTime<Utc>,
    ) -> TreasuryResult<PendingDistribution> {
        pending.status = PendingStatus::Failed;
        pending.resolved_at = Some(now);
        pending.failure_reason = Some(err.to_string());
        self.pending.put(pending.clone())?;

        warn!(
            pending_id = %pending.id,
            beneficiary_id = %pending.beneficiary_id,
            amount = %pending.amount,
            code = err.code(),
            "Pending distribution failed"
        );

        governance.log_committed(
            DecisionRequest::new(
                DecisionType::DistributionFailed,
                format!(
                    "Pending distribution of {} to {} failed: {err}",
                    pending.amount, pending.beneficiary_id
                ),
                approver,
                DecisionOutcome::Failed,
            )
            .with_approver(approver)
            .with_metadata("pending_id", pending.id.clone())
            .with_metadata("beneficiary_id", pending.beneficiary_id.clone())
            .with_metadata("amount_minor", pending.amount.minor().to_string())
            .with_metadata("error_code", err.code()),
        );

        Ok(pending)
    }
}
