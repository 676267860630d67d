//! Ledger
//!
//! Balance mutation for deposits, withdrawals and transfers, with the
//! outbox events that announce them.

pub mod engine;
pub mod error;
pub mod fraud;
pub mod posting;
pub mod repository;

pub use engine::{LedgerEngine, LedgerOutcome};
pub use error::LedgerError;
pub use fraud::{FraudAssessment, FraudScreen};
pub use posting::{BalanceChange, Posting};
