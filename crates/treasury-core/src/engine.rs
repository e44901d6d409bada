//! Treasury engine facade.
//!
//! Owns every component behind a single `tokio::sync::RwLock`. Mutations hold the
//! write guard for their whole validate → mutate → log sequence, so balance checks,
//! the daily counter, and the governance chain always observe committed state.

use crate::allocation::{Allocation, AllocationCalculator, DistributionProposal};
use crate::clock::Clock;
use crate::config::TreasuryConfig;
use crate::error::{TreasuryError, TreasuryResult};
use crate::governance::{
    DecisionFilter, DecisionOutcome, DecisionRequest, DecisionType, GovernanceDecision,
    GovernanceLog, IntegrityReport,
};
use crate::ledger::{AuditedEntry, Balance, Ledger, LedgerEntry, LedgerIntegrity};
use crate::registry::{Beneficiary, BeneficiaryRegistry, BeneficiaryUpdate, NewBeneficiary};
use crate::scheduler::{
    CompletedDistribution, DistributionOutcome, DistributionRequest, DistributionScheduler,
    PendingDistribution, PendingStatus, SchedulerRules, SweepReport,
};
use crate::types::{Amount, Category, Metadata, Priority};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

const LEDGER_LOG: &str = "ledger";
const GOVERNANCE_LOG: &str = "governance";
const BENEFICIARIES: &str = "beneficiaries";
const PENDING_DISTRIBUTIONS: &str = "pending_distributions";
const COMPLETED_DISTRIBUTIONS: &str = "completed_distributions";

struct TreasuryState {
    ledger: Ledger,
    registry: BeneficiaryRegistry,
    governance: GovernanceLog,
    scheduler: DistributionScheduler,
    calculator: AllocationCalculator,
}

/// Point-in-time operator view of the treasury.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub generated_at: DateTime<Utc>,
    pub storage_backend: String,
    pub balance: Balance,
    pub beneficiary_count: usize,
    pub beneficiaries_by_category: BTreeMap<Category, usize>,
    pub beneficiaries_by_priority: BTreeMap<Priority, usize>,
    pub pending_count: usize,
    pub completed_count: usize,
    pub daily_completed: u32,
    pub daily_limit: u32,
    pub daily_remaining: u32,
    /// Writes after a committed payout that failed since startup.
    pub bookkeeping_faults: u64,
    pub governance: GovernanceStatus,
    pub ledger: LedgerStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceStatus {
    pub decisions: usize,
    pub intact: bool,
    pub invalid_count: usize,
    pub broken_links: usize,
    /// Committed changes since startup whose decision could not be stored.
    pub unrecorded: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStatus {
    pub entries: usize,
    pub intact: bool,
    pub invalid_count: usize,
    pub continuity_breaks: usize,
}

pub struct TreasuryEngine {
    state: RwLock<TreasuryState>,
    config: TreasuryConfig,
    clock: Arc<dyn Clock>,
}

impl TreasuryEngine {
    /// Validate `config`, open its storage, and hydrate every component.
    pub fn bootstrap(config: TreasuryConfig, clock: Arc<dyn Clock>) -> TreasuryResult<Self> {
        config.validate()?;
        let storage = &config.storage;

        let ledger = Ledger::new(
            storage.open_append(LEDGER_LOG)?,
            config.reserve_fraction_bps,
            config.payout_cap_bps,
            clock.clone(),
        );
        let governance = GovernanceLog::new(storage.open_append(GOVERNANCE_LOG)?, clock.clone());
        let registry = BeneficiaryRegistry::new(storage.open_snapshot(BENEFICIARIES)?, clock.clone());
        let scheduler = DistributionScheduler::new(
            storage.open_snapshot(PENDING_DISTRIBUTIONS)?,
            storage.open_append(COMPLETED_DISTRIBUTIONS)?,
            SchedulerRules {
                large_transaction_threshold: config.large_transaction_threshold,
                min_approval_delay: config.min_approval_delay(),
                max_daily_distributions: config.max_daily_distributions,
            },
            clock.clone(),
        );

        info!(
            storage = storage.label(),
            total = %ledger.total(),
            ledger_entries = ledger.entries().len(),
            decisions = governance.len(),
            beneficiaries = registry.len(),
            completed_today = scheduler.daily_completed(),
            "Treasury engine bootstrapped"
        );

        Ok(Self {
            state: RwLock::new(TreasuryState {
                ledger,
                registry,
                governance,
                scheduler,
                calculator: AllocationCalculator::new(config.allocation),
            }),
            config,
            clock,
        })
    }

    pub fn config(&self) -> &TreasuryConfig {
        &self.config
    }

    // Ledger

    pub async fn deposit(
        &self,
        amount: Amount,
        source: &str,
        metadata: Metadata,
    ) -> TreasuryResult<LedgerEntry> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        state
            .ledger
            .deposit(amount, source, metadata, &mut state.governance)
    }

    pub async fn withdraw(
        &self,
        amount: Amount,
        destination: &str,
        approver: &str,
        metadata: Metadata,
    ) -> TreasuryResult<LedgerEntry> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        state
            .ledger
            .withdraw(amount, destination, approver, metadata, &mut state.governance)
    }

    pub async fn balance(&self) -> Balance {
        self.state.read().await.ledger.balance()
    }

    pub async fn audit_trail(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Vec<AuditedEntry> {
        self.state.read().await.ledger.audit_trail(from, to)
    }

    pub async fn verify_ledger(&self) -> LedgerIntegrity {
        self.state.read().await.ledger.verify_entries()
    }

    // Beneficiaries

    pub async fn register_beneficiary(&self, request: NewBeneficiary) -> TreasuryResult<Beneficiary> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let beneficiary = state.registry.register(request)?;

        state.governance.log_committed(
            DecisionRequest::new(
                DecisionType::BeneficiaryRegistered,
                format!("Registered beneficiary {} ({})", beneficiary.id, beneficiary.name),
                "registry",
                DecisionOutcome::Recorded,
            )
            .with_metadata("beneficiary_id", beneficiary.id.clone())
            .with_metadata("priority", beneficiary.priority.as_str())
            .with_metadata("category", beneficiary.category.as_str()),
        );

        Ok(beneficiary)
    }

    pub async fn update_beneficiary(
        &self,
        id: &str,
        update: BeneficiaryUpdate,
    ) -> TreasuryResult<Beneficiary> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let changed: Vec<&str> = [
            ("name", update.name.is_some()),
            ("kind", update.kind.is_some()),
            ("priority", update.priority.is_some()),
            ("category", update.category.is_some()),
            ("metadata", update.metadata.is_some()),
        ]
        .into_iter()
        .filter_map(|(field, present)| present.then_some(field))
        .collect();

        let beneficiary = state.registry.update(id, update)?;

        state.governance.log_committed(
            DecisionRequest::new(
                DecisionType::BeneficiaryUpdated,
                format!("Updated beneficiary {}", beneficiary.id),
                "registry",
                DecisionOutcome::Recorded,
            )
            .with_metadata("beneficiary_id", beneficiary.id.clone())
            .with_metadata("fields", changed.join(",")),
        );

        Ok(beneficiary)
    }

    pub async fn get_beneficiary(&self, id: &str) -> Option<Beneficiary> {
        self.state.read().await.registry.get(id)
    }

    pub async fn list_beneficiaries(&self) -> Vec<Beneficiary> {
        self.state.read().await.registry.list()
    }

    // Allocation

    pub async fn calculate_allocation(&self, beneficiary_id: &str) -> TreasuryResult<Allocation> {
        let state = self.state.read().await;
        let beneficiary = state
            .registry
            .get(beneficiary_id)
            .ok_or_else(|| TreasuryError::beneficiary_not_found(beneficiary_id))?;
        Ok(state.calculator.calculate(&state.ledger.balance(), &beneficiary))
    }

    /// Advisory batch proposal over `beneficiary_ids` (every beneficiary when `None`).
    pub async fn propose_distribution(
        &self,
        beneficiary_ids: Option<&[String]>,
    ) -> TreasuryResult<DistributionProposal> {
        let state = self.state.read().await;
        let beneficiaries = match beneficiary_ids {
            None => state.registry.list(),
            Some(ids) => ids
                .iter()
                .map(|id| {
                    state
                        .registry
                        .get(id)
                        .ok_or_else(|| TreasuryError::beneficiary_not_found(id))
                })
                .collect::<TreasuryResult<Vec<_>>>()?,
        };
        Ok(state
            .calculator
            .propose(&state.ledger.balance(), &beneficiaries))
    }

    // Distributions

    pub async fn execute_distribution(
        &self,
        request: DistributionRequest,
    ) -> TreasuryResult<DistributionOutcome> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        state.scheduler.execute_distribution(
            &mut state.ledger,
            &mut state.registry,
            &mut state.governance,
            request,
        )
    }

    pub async fn process_pending(&self, approver: &str) -> TreasuryResult<SweepReport> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        state.scheduler.process_pending(
            &mut state.ledger,
            &mut state.registry,
            &mut state.governance,
            approver,
        )
    }

    pub async fn list_pending_distributions(
        &self,
        status: Option<PendingStatus>,
    ) -> Vec<PendingDistribution> {
        self.state.read().await.scheduler.list_pending(status)
    }

    pub async fn get_pending_distribution(&self, id: &str) -> TreasuryResult<PendingDistribution> {
        self.state.read().await.scheduler.pending(id)
    }

    pub async fn list_completed_distributions(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Vec<CompletedDistribution> {
        self.state.read().await.scheduler.list_completed(from, to)
    }

    // Governance

    pub async fn log_governance_decision(
        &self,
        request: DecisionRequest,
    ) -> TreasuryResult<GovernanceDecision> {
        self.state.write().await.governance.log_decision(request)
    }

    pub async fn query_governance_decisions(
        &self,
        filter: &DecisionFilter,
    ) -> Vec<GovernanceDecision> {
        self.state.read().await.governance.get_decisions(filter)
    }

    pub async fn verify_governance_integrity(&self) -> IntegrityReport {
        self.state.read().await.governance.verify_integrity()
    }

    pub async fn get_system_status(&self) -> SystemStatus {
        let state = self.state.read().await;
        let governance = state.governance.verify_integrity();
        let ledger = state.ledger.verify_entries();

        SystemStatus {
            generated_at: self.clock.now(),
            storage_backend: self.config.storage.label().to_string(),
            balance: state.ledger.balance(),
            beneficiary_count: state.registry.len(),
            beneficiaries_by_category: state.registry.counts_by_category(),
            beneficiaries_by_priority: state.registry.counts_by_priority(),
            pending_count: state
                .scheduler
                .list_pending(Some(PendingStatus::Pending))
                .len(),
            completed_count: state.scheduler.completed_count(),
            daily_completed: state.scheduler.daily_completed(),
            daily_limit: self.config.max_daily_distributions,
            daily_remaining: state.scheduler.daily_remaining(),
            bookkeeping_faults: state.scheduler.bookkeeping_faults(),
            governance: GovernanceStatus {
                decisions: governance.total,
                intact: governance.is_intact(),
                invalid_count: governance.invalid_count,
                broken_links: governance.broken_links,
                unrecorded: state.governance.unrecorded(),
            },
            ledger: LedgerStatus {
                entries: ledger.total_entries,
                intact: ledger.is_intact(),
                invalid_count: ledger.invalid_entry_ids.len(),
                continuity_breaks: ledger.continuity_breaks.len(),
            },
        }
    }
}
