//! Event publisher abstraction
//!
//! The relay only needs "publish this event or fail"; broker specifics live
//! behind [`EventPublisher`].

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::Event;

/// Name of the topic exchange every event is published to
pub const DEFAULT_EXCHANGE: &str = "bank_events";

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Broker error: {0}")]
    Broker(#[from] lapin::Error),

    /// The broker refused the message (negative publisher confirm)
    #[error("Broker rejected message for {0}")]
    Rejected(String),

    #[error("Publish timed out after {0:?}")]
    Timeout(Duration),

    #[error("Broker unavailable: {0}")]
    Unavailable(String),
}

/// Publishes one event to the broker.
///
/// `Ok` means the broker accepted the message. Delivery is at-least-once:
/// the same event may be published more than once and carries its event id
/// for consumer-side deduplication.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &Event) -> Result<(), PublishError>;
}

#[async_trait]
impl<T: EventPublisher + ?Sized> EventPublisher for Arc<T> {
    async fn publish(&self, event: &Event) -> Result<(), PublishError> {
        (**self).publish(event).await
    }
}

/// Routing key for an event tag: the tag without its `Event` suffix,
/// lowercased. `TransactionCreatedEvent` routes as `transactioncreated`.
pub fn routing_key(event_type: &str) -> String {
    event_type
        .strip_suffix("Event")
        .unwrap_or(event_type)
        .to_lowercase()
}

/// Registry tag whose routing key is `key`
pub fn tag_for_routing_key(key: &str) -> Option<&'static str> {
    Event::known_types().find(|tag| routing_key(tag) == key)
}

/// Durable queue bound to a routing key
pub fn queue_name(routing_key: &str) -> String {
    format!("queue_{}", routing_key)
}
