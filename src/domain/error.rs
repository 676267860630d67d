//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use thiserror::Error;

use super::TransactionStatus;

/// Request validation failures and domain invariant violations.
///
/// Business outcomes of a ledger operation (insufficient funds, missing
/// accounts) are not errors; they are recorded as a Failed transaction.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Invalid amount (zero, negative, too precise or too large)
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Transfer requires a destination account")]
    MissingDestination,

    #[error("Only transfers may name a destination account")]
    UnexpectedDestination,

    #[error("Cannot transfer to the same account")]
    SameAccountTransfer,

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// Stored or submitted text that does not map to a known value
    #[error("Unknown {kind}: {value}")]
    UnknownValue { kind: &'static str, value: String },
}

impl DomainError {
    /// Check if this is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidAmount(_)
                | Self::MissingDestination
                | Self::UnexpectedDestination
                | Self::SameAccountTransfer
        )
    }
}
