//! Ledger error types.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by wallet, withdrawal and refund operations
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Request rejected before any state change
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Invalid amount (must be positive)
    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    /// Not enough spendable funds
    #[error("Insufficient balance in {wallet}: available {available}, required {required} (short by {})", .required - .available)]
    InsufficientBalance {
        wallet: String,
        available: i64,
        required: i64,
    },

    /// Not enough pending funds on a shop wallet
    #[error("Insufficient pending balance for shop {shop_id}: pending {pending}, required {required} (short by {})", .required - .pending)]
    InsufficientPendingBalance {
        shop_id: i64,
        pending: i64,
        required: i64,
    },

    /// Unknown wallet, request or order
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// Request is not in the state the operation requires
    #[error("{entity} {id} is {current}, expected {expected}")]
    IllegalStateTransition {
        entity: &'static str,
        id: i64,
        current: String,
        expected: String,
    },

    /// Duplicate transaction
    #[error("Duplicate transaction: {0}")]
    DuplicateTransaction(String),

    /// Balance arithmetic overflowed
    #[error("Balance overflow")]
    BalanceOverflow,

    /// Bank transfer reported a failure
    #[error("External transfer failed: {0}")]
    ExternalTransferFailure(String),

    /// A compensating step could not be applied
    #[error("Compensation failed during {operation}: {reason}")]
    CompensationFailed { operation: String, reason: String },

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

impl LedgerError {
    /// Get a client-safe error message that doesn't leak sensitive information
    ///
    /// Database and migration errors are replaced with a generic message.
    pub fn client_message(&self) -> String {
        match self {
            LedgerError::Database(_) | LedgerError::Migration(_) => {
                "Internal server error".to_string()
            }
            LedgerError::CompensationFailed { operation, .. } => {
                format!("Operation {operation} could not be reverted; operator attention required")
            }
            _ => self.to_string(),
        }
    }

    /// Whether the error is a state conflict rather than bad input
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            LedgerError::IllegalStateTransition { .. } | LedgerError::DuplicateTransaction(_)
        )
    }

    pub(crate) fn illegal_state(
        entity: &'static str,
        id: i64,
        current: impl ToString,
        expected: impl ToString,
    ) -> Self {
        LedgerError::IllegalStateTransition {
            entity,
            id,
            current: current.to_string(),
            expected: expected.to_string(),
        }
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
