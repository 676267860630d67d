//! Messaging
//!
//! Broker-facing side of the outbox: the publisher the relay calls, the
//! consumer that feeds event handlers, and in-memory stand-ins for tests.

pub mod amqp;
pub mod handlers;
pub mod memory;
pub mod publisher;

pub use amqp::{AmqpConsumer, AmqpPublisher};
pub use handlers::{EventHandler, HandlerError, NotificationHandler, NotificationPreferences};
pub use memory::{InMemoryPublisher, PublishedMessage};
pub use publisher::{
    queue_name, routing_key, tag_for_routing_key, EventPublisher, PublishError, DEFAULT_EXCHANGE,
};
