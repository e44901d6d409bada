use crate::storage::StorageError;
use crate::types::Amount;
use thiserror::Error;

/// Treasury errors.
///
/// Every business variant is a local validation failure raised before any state is
/// touched, so callers never observe a partially applied operation.
#[derive(Debug, Error)]
pub enum TreasuryError {
    #[error("invalid amount {0}: amounts must be positive")]
    InvalidAmount(Amount),

    #[error("insufficient funds: requested {requested}, total balance {total}")]
    InsufficientFunds { requested: Amount, total: Amount },

    #[error(
        "reserve breach: withdrawing {requested} would leave {remaining}, below reserve {reserved}"
    )]
    ReserveBreach {
        requested: Amount,
        remaining: Amount,
        reserved: Amount,
    },

    #[error("payout cap exceeded: requested {requested}, max single payout {max_single_payout}")]
    CapExceeded {
        requested: Amount,
        max_single_payout: Amount,
    },

    #[error("daily distribution cap reached: {completed} of {limit} completed today")]
    DailyCapExceeded { completed: u32, limit: u32 },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} '{id}' already exists")]
    DuplicateId { entity: &'static str, id: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl TreasuryError {
    pub fn beneficiary_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "beneficiary",
            id: id.into(),
        }
    }

    pub fn pending_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "pending distribution",
            id: id.into(),
        }
    }

    /// Short machine-readable code, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAmount(_) => "INVALID_AMOUNT",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::ReserveBreach { .. } => "RESERVE_BREACH",
            Self::CapExceeded { .. } => "CAP_EXCEEDED",
            Self::DailyCapExceeded { .. } => "DAILY_CAP_EXCEEDED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::DuplicateId { .. } => "DUPLICATE_ID",
            Self::Config(_) => "CONFIG",
            Self::Storage(_) => "STORAGE",
        }
    }
}

pub type TreasuryResult<T> = Result<T, TreasuryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_breach_display() {
        let err = TreasuryError::ReserveBreach {
            requested: Amount::from_units(9_000),
            remaining: Amount::from_units(1_000),
            reserved: Amount::from_units(2_000),
        };
        let s = err.to_string();
        assert!(s.contains("9000.00"));
        assert!(s.contains("2000.00"));
        assert_eq!(err.code(), "RESERVE_BREACH");
    }

    #[test]
    fn not_found_names_entity() {
        let err = TreasuryError::beneficiary_not_found("b-1");
        assert_eq!(err.to_string(), "beneficiary 'b-1' not found");
    }
}
