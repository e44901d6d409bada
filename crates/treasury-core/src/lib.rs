//! Treasury and distribution ledger.
//!
//! Tracks a shared fund's balance, protects a reserve floor, gates payouts to
//! registered beneficiaries, and keeps a hash-chained governance log of every
//! financial and administrative decision.

#![deny(unsafe_code)]

pub mod allocation;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod governance;
pub mod ledger;
pub mod registry;
pub mod scheduler;
pub mod storage;
pub mod types;

pub use allocation::{
    Allocation, AllocationCalculator, AllocationTable, CategoryRates, DistributionProposal,
    PriorityMultipliers, ProposedAllocation,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TreasuryConfig;
pub use engine::{GovernanceStatus, LedgerStatus, SystemStatus, TreasuryEngine};
pub use error::{TreasuryError, TreasuryResult};
pub use governance::{
    DecisionFilter, DecisionOutcome, DecisionRequest, DecisionType, EntryVerification,
    GovernanceDecision, GovernanceLog, IntegrityReport,
};
pub use ledger::{AuditedEntry, Balance, Ledger, LedgerEntry, LedgerEntryKind, LedgerIntegrity};
pub use registry::{
    Beneficiary, BeneficiaryRegistry, BeneficiaryUpdate, DistributionRecord, NewBeneficiary,
};
pub use scheduler::{
    CompletedDistribution, DistributionOutcome, DistributionRequest, DistributionScheduler,
    PendingDistribution, PendingStatus, SchedulerRules, SweepReport,
};
pub use storage::{
    AppendStore, JsonSnapshotStore, JsonlAppendStore, MemoryAppendStore, MemorySnapshotStore,
    Record, SnapshotStore, StorageConfig, StorageError, StorageResult,
};
pub use types::{
    Amount, BasisPoints, BeneficiaryKind, Category, Metadata, ParseAmountError, Priority,
};
