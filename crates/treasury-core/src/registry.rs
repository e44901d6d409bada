//! Beneficiary registry: parties eligible to receive distributions.

use crate::clock::Clock;
use crate::error::{TreasuryError, TreasuryResult};
use crate::storage::{Record, SnapshotStore};
use crate::types::{Amount, BeneficiaryKind, Category, Metadata, Priority};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// A registered beneficiary. Never hard-deleted so history stays attributable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beneficiary {
    pub id: String,
    pub name: String,
    pub kind: BeneficiaryKind,
    pub priority: Priority,
    pub category: Category,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub total_received: Amount,
    pub distribution_count: u64,
    pub metadata: Metadata,
}

impl Record for Beneficiary {
    fn record_id(&self) -> &str {
        &self.id
    }

    fn recorded_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Registration input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBeneficiary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub kind: BeneficiaryKind,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub metadata: Metadata,
}

impl NewBeneficiary {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: BeneficiaryKind::default(),
            priority: Priority::default(),
            category: Category::default(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_kind(mut self, kind: BeneficiaryKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_classification(mut self, priority: Priority, category: Category) -> Self {
        self.priority = priority;
        self.category = category;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Partial update. Only `Some` fields are applied; metadata keys are merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeneficiaryUpdate {
    pub name: Option<String>,
    pub kind: Option<BeneficiaryKind>,
    pub priority: Option<Priority>,
    pub category: Option<Category>,
    pub metadata: Option<Metadata>,
}

impl BeneficiaryUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.kind.is_none()
            && self.priority.is_none()
            && self.category.is_none()
            && self.metadata.is_none()
    }
}

/// Receipt produced when a completed distribution is credited to a beneficiary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionRecord {
    pub beneficiary_id: String,
    pub amount: Amount,
    pub ledger_entry_id: String,
    pub recorded_at: DateTime<Utc>,
    pub total_received: Amount,
    pub distribution_count: u64,
}

pub struct BeneficiaryRegistry {
    store: Box<dyn SnapshotStore<Beneficiary>>,
    clock: Arc<dyn Clock>,
}

impl BeneficiaryRegistry {
    pub fn new(store: Box<dyn SnapshotStore<Beneficiary>>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn register(&mut self, request: NewBeneficiary) -> TreasuryResult<Beneficiary> {
        if self.store.contains(&request.id) {
            return Err(TreasuryError::DuplicateId {
                entity: "beneficiary",
                id: request.id,
            });
        }

        let now = self.clock.now();
        let beneficiary = Beneficiary {
            id: request.id,
            name: request.name,
            kind: request.kind,
            priority: request.priority,
            category: request.category,
            created_at: now,
            updated_at: now,
            total_received: Amount::zero(),
            distribution_count: 0,
            metadata: request.metadata,
        };
        self.store.put(beneficiary.clone())?;

        info!(
            beneficiary_id = %beneficiary.id,
            priority = %beneficiary.priority,
            category = %beneficiary.category,
            "Beneficiary registered"
        );

        Ok(beneficiary)
    }

    pub fn update(&mut self, id: &str, update: BeneficiaryUpdate) -> TreasuryResult<Beneficiary> {
        let mut beneficiary = self
            .store
            .get(id)
            .cloned()
            .ok_or_else(|| TreasuryError::beneficiary_not_found(id))?;

        if let Some(name) = update.name {
            beneficiary.name = name;
        }
        if let Some(kind) = update.kind {
            beneficiary.kind = kind;
        }
        if let Some(priority) = update.priority {
            beneficiary.priority = priority;
        }
        if let Some(category) = update.category {
            beneficiary.category = category;
        }
        if let Some(metadata) = update.metadata {
            beneficiary.metadata.extend(metadata);
        }
        beneficiary.updated_at = self.clock.now();

        self.store.put(beneficiary.clone())?;
        Ok(beneficiary)
    }

    pub fn get(&self, id: &str) -> Option<Beneficiary> {
        self.store.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.store.contains(id)
    }

    /// All beneficiaries ordered by id.
    pub fn list(&self) -> Vec<Beneficiary> {
        self.store.list().into_iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Credit a completed payout. Only called after the ledger withdrawal committed.
    pub fn record_receipt(
        &mut self,
        id: &str,
        amount: Amount,
        ledger_entry_id: &str,
    ) -> TreasuryResult<DistributionRecord> {
        let mut beneficiary = self
            .store
            .get(id)
            .cloned()
            .ok_or_else(|| TreasuryError::beneficiary_not_found(id))?;

        let now = self.clock.now();
        beneficiary.total_received = beneficiary.total_received.saturating_add(amount);
        beneficiary.distribution_count += 1;
        beneficiary.updated_at = now;
        self.store.put(beneficiary.clone())?;

        Ok(DistributionRecord {
            beneficiary_id: beneficiary.id,
            amount,
            ledger_entry_id: ledger_entry_id.to_string(),
            recorded_at: now,
            total_received: beneficiary.total_received,
            distribution_count: beneficiary.distribution_count,
        })
    }

    pub fn counts_by_category(&self) -> BTreeMap<Category, usize> {
        let mut counts: BTreeMap<Category, usize> =
            Category::ALL.into_iter().map(|c| (c, 0)).collect();
        for beneficiary in self.store.list() {
            *counts.entry(beneficiary.category).or_default() += 1;
        }
        counts
    }

    pub fn counts_by_priority(&self) -> BTreeMap<Priority, usize> {
        let mut counts: BTreeMap<Priority, usize> =
            Priority::ALL.into_iter().map(|p| (p, 0)).collect();
        for beneficiary in self.store.list() {
            *counts.entry(beneficiary.priority).or_default() += 1;
        }
        counts
    }
}
