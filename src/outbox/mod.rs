//! Transactional Outbox
//!
//! Events are staged in the same database transaction as the balance
//! change that produced them, then relayed to the broker with retry and
//! exponential backoff. Delivery is at-least-once.

pub mod error;
pub mod memory;
pub mod message;
pub mod relay;
pub mod store;

pub use error::OutboxError;
pub use memory::InMemoryOutboxStore;
pub use message::{OutboxMessage, OutboxStats};
pub use relay::{BatchReport, OutboxRelay, RetryPolicy, DEFAULT_MAX_RETRIES, DEFAULT_PUBLISH_TIMEOUT};
pub use store::{stage, OutboxStore, PgOutboxStore};
