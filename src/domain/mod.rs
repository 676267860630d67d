//! Domain module
//!
//! Core domain types and business logic.

pub mod account;
pub mod amount;
pub mod context;
pub mod error;
pub mod events;
pub mod transaction;

pub use account::{Account, Customer};
pub use amount::{Amount, AmountError, Balance};
pub use context::OperationContext;
pub use error::DomainError;
pub use events::{DecodeError, Event, NotificationType};
pub use transaction::{
    FailureReason, Transaction, TransactionChannel, TransactionRequest, TransactionStatus,
    TransactionType,
};
