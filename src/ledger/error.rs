//! Ledger Errors

use uuid::Uuid;

use crate::domain::{AmountError, DomainError};
use crate::outbox::OutboxError;

/// Errors raised by the ledger engine and its repository.
///
/// Business rejections (insufficient funds, unknown accounts) are not
/// errors; they come back as a Failed outcome.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Amount error: {0}")]
    Amount(#[from] AmountError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row that does not map back to a domain value
    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("Customer not found: {0}")]
    CustomerNotFound(Uuid),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(Uuid),

    #[error("Account number already in use: {0}")]
    DuplicateAccountNumber(String),

    /// The locked transaction record refused the outcome write
    #[error("Transaction record changed under lock: {0}")]
    RecordConflict(Uuid),
}

impl LedgerError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::AccountNotFound(_) | Self::CustomerNotFound(_) | Self::TransactionNotFound(_)
        )
    }
}
