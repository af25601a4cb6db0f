//! Error taxonomy surfaced by the loyalty services.
//!
//! Storage backends speak [`StorageError`]; services translate it into
//! [`LoyaltyError`], whose variants decide how the webhook boundary and the
//! reply templates react:
//!
//! | Variant | Meaning | Mutation performed |
//! |---------|---------|--------------------|
//! | `Validation` | malformed text, payload or argument | none |
//! | `NotFound` | tenant/branch/customer/reward lookup miss | none |
//! | `Authorization` | bad approver PIN or webhook credential | none |
//! | `State` | non-active or expired code, active-card cap | none |
//! | `Transient` | storage unavailable or timed out | none committed |

use crate::storage::StorageError;

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, LoyaltyError>;

/// Errors returned by the ledger, reward and routing services.
#[derive(Debug, thiserror::Error)]
pub enum LoyaltyError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Invalid state: {0}")]
    State(String),

    #[error("Storage unavailable: {0}")]
    Transient(String),
}

impl LoyaltyError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        LoyaltyError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// True when retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, LoyaltyError::Transient(_))
    }
}

impl From<StorageError> for LoyaltyError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::LedgerNotFound {
                customer_id,
                tenant_id,
            } => LoyaltyError::not_found(
                "ledger entry",
                format!("customer={customer_id}, tenant={tenant_id}"),
            ),
            StorageError::RewardNotFound(id) => LoyaltyError::not_found("reward code", id),
            e @ StorageError::Overdraft { .. } => LoyaltyError::State(e.to_string()),
            e @ StorageError::InsufficientPoints { .. } => LoyaltyError::State(e.to_string()),
            e @ StorageError::ActiveCardCap { .. } => LoyaltyError::State(e.to_string()),
            e @ StorageError::InvalidTransition { .. } => LoyaltyError::State(e.to_string()),
            e @ StorageError::PastExpiry { .. } => LoyaltyError::State(e.to_string()),
            // Collisions only escape the engine once its retry budget is spent.
            e @ StorageError::CodeCollision(_) => LoyaltyError::Transient(e.to_string()),
            StorageError::Unavailable(reason) => LoyaltyError::Transient(reason),
            e => LoyaltyError::Transient(e.to_string()),
        }
    }
}
