//! AMQP transport
//!
//! Topic exchange `bank_events` (configurable). The publisher runs with
//! publisher confirms so `Ok` means the broker took the message; the
//! consumer acks manually once every handler succeeded.

use async_trait::async_trait;
use futures_util::stream::{select_all, StreamExt};
use lapin::{
    message::Delivery,
    options::{
        BasicConsumeOptions, BasicNackOptions, BasicAckOptions, BasicPublishOptions, BasicQosOptions,
        ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{FieldTable, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;

use crate::domain::{DecodeError, Event};

use super::{queue_name, routing_key, tag_for_routing_key, EventHandler, EventPublisher, PublishError};

/// Persistent delivery mode
const PERSISTENT: u8 = 2;

/// Unacked deliveries per consumer channel
const PREFETCH: u16 = 16;

async fn open_channel(url: &str, exchange: &str) -> Result<(Connection, Channel), lapin::Error> {
    let connection = Connection::connect(url, ConnectionProperties::default()).await?;
    let channel = connection.create_channel().await?;

    channel
        .exchange_declare(
            exchange,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    Ok((connection, channel))
}

/// Publishes events to the topic exchange
pub struct AmqpPublisher {
    connection: Connection,
    channel: Channel,
    exchange: String,
}

impl AmqpPublisher {
    pub async fn connect(url: &str, exchange: &str) -> Result<Self, PublishError> {
        let (connection, channel) = open_channel(url, exchange).await?;
        channel.confirm_select(ConfirmSelectOptions::default()).await?;

        tracing::info!(exchange = %exchange, "AMQP publisher connected");

        Ok(Self {
            connection,
            channel,
            exchange: exchange.to_string(),
        })
    }

    pub async fn close(&self) -> Result<(), PublishError> {
        self.channel.close(200, "shutdown").await?;
        self.connection.close(200, "shutdown").await?;
        tracing::info!("AMQP publisher closed");
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for AmqpPublisher {
    async fn publish(&self, event: &Event) -> Result<(), PublishError> {
        let key = routing_key(event.event_type());
        let body = serde_json::to_vec(&event.to_payload()?)?;

        let properties = BasicProperties::default()
            .with_content_type(ShortString::from("application/json".to_string()))
            .with_delivery_mode(PERSISTENT)
            .with_message_id(ShortString::from(event.id().to_string()))
            .with_type(ShortString::from(event.event_type().to_string()))
            .with_timestamp(event.timestamp().timestamp().max(0) as u64);

        let confirmation = self
            .channel
            .basic_publish(
                &self.exchange,
                &key,
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(PublishError::Rejected(key));
        }

        tracing::debug!(
            event_id = %event.id(),
            routing_key = %key,
            "Event published"
        );

        Ok(())
    }
}

/// Decode a delivery body. The tag comes from the `type` property, falling
/// back to the routing key.
pub fn decode_delivery(kind: Option<&str>, routing_key: &str, body: &[u8]) -> Result<Event, DecodeError> {
    let tag = match kind {
        Some(kind) => kind.to_string(),
        None => tag_for_routing_key(routing_key)
            .ok_or_else(|| DecodeError::UnknownEventType(routing_key.to_string()))?
            .to_string(),
    };

    let payload: Value = serde_json::from_slice(body).map_err(|source| DecodeError::Malformed {
        event_type: tag.clone(),
        source,
    })?;

    Event::decode(&tag, &payload)
}

/// Consumes events from per-routing-key durable queues and dispatches them
/// to registered handlers.
pub struct AmqpConsumer {
    connection: Connection,
    channel: Channel,
    exchange: String,
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl AmqpConsumer {
    pub async fn connect(url: &str, exchange: &str) -> Result<Self, lapin::Error> {
        let (connection, channel) = open_channel(url, exchange).await?;
        channel.basic_qos(PREFETCH, BasicQosOptions::default()).await?;

        tracing::info!(exchange = %exchange, "AMQP consumer connected");

        Ok(Self {
            connection,
            channel,
            exchange: exchange.to_string(),
            handlers: Vec::new(),
        })
    }

    pub fn register(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    fn subscribed_tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<_> = self
            .handlers
            .iter()
            .flat_map(|h| h.event_types().iter().copied())
            .collect();
        tags.sort_unstable();
        tags.dedup();
        tags
    }

    /// Run until `shutdown` flips, then close the channel and connection.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), lapin::Error> {
        let mut consumers = Vec::new();

        for tag in self.subscribed_tags() {
            let key = routing_key(tag);
            let queue = queue_name(&key);

            self.channel
                .queue_declare(
                    &queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await?;
            self.channel
                .queue_bind(
                    &queue,
                    &self.exchange,
                    &key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;

            let consumer = self
                .channel
                .basic_consume(
                    &queue,
                    &format!("bank_ledger.{}", key),
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await?;

            tracing::info!(queue = %queue, routing_key = %key, "Consuming");
            consumers.push(Box::pin(consumer));
        }

        if consumers.is_empty() {
            tracing::warn!("No event handlers registered, consumer idle");
        }

        let mut deliveries = select_all(consumers);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                next = deliveries.next(), if !deliveries.is_empty() => match next {
                    Some(Ok(delivery)) => self.dispatch(delivery).await?,
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Consumer stream failed");
                        return Err(e);
                    }
                    None => break,
                },
            }
        }

        self.channel.close(200, "shutdown").await?;
        self.connection.close(200, "shutdown").await?;
        tracing::info!("AMQP consumer stopped");

        Ok(())
    }

    async fn dispatch(&self, delivery: Delivery) -> Result<(), lapin::Error> {
        let kind = delivery.properties.kind().as_ref().map(|k| k.as_str());
        let event = match decode_delivery(kind, delivery.routing_key.as_str(), &delivery.data) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(
                    routing_key = %delivery.routing_key,
                    error = %e,
                    "Undecodable delivery, dropping"
                );
                delivery
                    .acker
                    .nack(BasicNackOptions {
                        requeue: false,
                        ..Default::default()
                    })
                    .await?;
                return Ok(());
            }
        };

        for handler in self
            .handlers
            .iter()
            .filter(|h| h.event_types().contains(&event.event_type()))
        {
            if let Err(e) = handler.handle(&event).await {
                tracing::warn!(
                    event_id = %event.id(),
                    event_type = event.event_type(),
                    error = %e,
                    "Handler failed, requeueing"
                );
                delivery
                    .acker
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..Default::default()
                    })
                    .await?;
                return Ok(());
            }
        }

        delivery.acker.ack(BasicAckOptions::default()).await?;
        tracing::debug!(event_id = %event.id(), event_type = event.event_type(), "Event handled");

        Ok(())
    }
}
