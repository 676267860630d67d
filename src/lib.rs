//! bank_ledger Library
//!
//! Re-exports modules for integration testing and external use.

pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod jobs;
pub mod ledger;
pub mod messaging;
pub mod outbox;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use domain::{Amount, AmountError, Balance, DomainError, Event, OperationContext, Transaction};
pub use ledger::{LedgerEngine, LedgerError, LedgerOutcome};
pub use outbox::{OutboxError, OutboxRelay, OutboxStore, PgOutboxStore};
