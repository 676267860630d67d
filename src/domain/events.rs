//! Domain Events
//!
//! Immutable facts announced to external consumers through the outbox.
//! Each variant is stored under a string tag; decoding goes through a
//! closed registry so an unknown tag is an explicit error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{Balance, Transaction};

pub const TRANSACTION_CREATED: &str = "TransactionCreatedEvent";
pub const TRANSACTION_PROCESSED: &str = "TransactionProcessedEvent";
pub const TRANSACTION_FAILED: &str = "TransactionFailedEvent";
pub const BALANCE_UPDATED: &str = "BalanceUpdatedEvent";
pub const FRAUD_ALERT: &str = "FraudAlertEvent";
pub const NOTIFICATION: &str = "NotificationEvent";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionCreated {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub transaction: Transaction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionProcessed {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub transaction: Transaction,
    /// Source account balance after the transaction
    pub new_balance: Balance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionFailed {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub transaction: Transaction,
    pub failure_reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceUpdated {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub account_id: Uuid,
    pub old_balance: Balance,
    pub new_balance: Balance,
    pub transaction_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudAlert {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub transaction: Transaction,
    pub alert_reason: String,
    pub risk_score: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    TransactionCompleted,
    LowBalance,
    FraudAlert,
    FailedTransaction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub customer_id: Uuid,
    pub message: String,
    pub notification_type: NotificationType,
}

/// Every event the ledger can announce.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    TransactionCreated(TransactionCreated),
    TransactionProcessed(TransactionProcessed),
    TransactionFailed(TransactionFailed),
    BalanceUpdated(BalanceUpdated),
    FraudAlert(FraudAlert),
    Notification(Notification),
}

/// Failure to turn a stored (tag, payload) pair back into an [`Event`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Malformed {event_type} payload: {source}")]
    Malformed {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

type Decoder = fn(&Value) -> Result<Event, serde_json::Error>;

const REGISTRY: &[(&str, Decoder)] = &[
    (TRANSACTION_CREATED, |v| {
        TransactionCreated::deserialize(v).map(Event::TransactionCreated)
    }),
    (TRANSACTION_PROCESSED, |v| {
        TransactionProcessed::deserialize(v).map(Event::TransactionProcessed)
    }),
    (TRANSACTION_FAILED, |v| {
        TransactionFailed::deserialize(v).map(Event::TransactionFailed)
    }),
    (BALANCE_UPDATED, |v| {
        BalanceUpdated::deserialize(v).map(Event::BalanceUpdated)
    }),
    (FRAUD_ALERT, |v| FraudAlert::deserialize(v).map(Event::FraudAlert)),
    (NOTIFICATION, |v| {
        Notification::deserialize(v).map(Event::Notification)
    }),
];

impl Event {
    pub fn transaction_created(transaction: Transaction) -> Self {
        Event::TransactionCreated(TransactionCreated {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            transaction,
        })
    }

    pub fn transaction_processed(transaction: Transaction, new_balance: Balance) -> Self {
        Event::TransactionProcessed(TransactionProcessed {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            transaction,
            new_balance,
        })
    }

    pub fn transaction_failed(transaction: Transaction, failure_reason: impl Into<String>) -> Self {
        Event::TransactionFailed(TransactionFailed {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            transaction,
            failure_reason: failure_reason.into(),
        })
    }

    pub fn balance_updated(
        account_id: Uuid,
        old_balance: Balance,
        new_balance: Balance,
        transaction_id: Uuid,
    ) -> Self {
        Event::BalanceUpdated(BalanceUpdated {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            account_id,
            old_balance,
            new_balance,
            transaction_id,
        })
    }

    pub fn fraud_alert(transaction: Transaction, alert_reason: impl Into<String>, risk_score: u8) -> Self {
        Event::FraudAlert(FraudAlert {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            transaction,
            alert_reason: alert_reason.into(),
            risk_score,
        })
    }

    pub fn notification(
        customer_id: Uuid,
        message: impl Into<String>,
        notification_type: NotificationType,
    ) -> Self {
        Event::Notification(Notification {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            customer_id,
            message: message.into(),
            notification_type,
        })
    }

    /// The tag this event is stored and published under
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::TransactionCreated(_) => TRANSACTION_CREATED,
            Event::TransactionProcessed(_) => TRANSACTION_PROCESSED,
            Event::TransactionFailed(_) => TRANSACTION_FAILED,
            Event::BalanceUpdated(_) => BALANCE_UPDATED,
            Event::FraudAlert(_) => FRAUD_ALERT,
            Event::Notification(_) => NOTIFICATION,
        }
    }

    /// Event id; consumers use it as the idempotency key
    pub fn id(&self) -> Uuid {
        match self {
            Event::TransactionCreated(e) => e.id,
            Event::TransactionProcessed(e) => e.id,
            Event::TransactionFailed(e) => e.id,
            Event::BalanceUpdated(e) => e.id,
            Event::FraudAlert(e) => e.id,
            Event::Notification(e) => e.id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::TransactionCreated(e) => e.timestamp,
            Event::TransactionProcessed(e) => e.timestamp,
            Event::TransactionFailed(e) => e.timestamp,
            Event::BalanceUpdated(e) => e.timestamp,
            Event::FraudAlert(e) => e.timestamp,
            Event::Notification(e) => e.timestamp,
        }
    }

    /// Wire form: a JSON object with `id`, `timestamp` and the variant fields.
    pub fn to_payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            Event::TransactionCreated(e) => serde_json::to_value(e),
            Event::TransactionProcessed(e) => serde_json::to_value(e),
            Event::TransactionFailed(e) => serde_json::to_value(e),
            Event::BalanceUpdated(e) => serde_json::to_value(e),
            Event::FraudAlert(e) => serde_json::to_value(e),
            Event::Notification(e) => serde_json::to_value(e),
        }
    }

    /// Rebuild an event from its stored tag and payload.
    pub fn decode(event_type: &str, payload: &Value) -> Result<Self, DecodeError> {
        let (_, decoder) = REGISTRY
            .iter()
            .find(|(tag, _)| *tag == event_type)
            .ok_or_else(|| DecodeError::UnknownEventType(event_type.to_string()))?;

        decoder(payload).map_err(|source| DecodeError::Malformed {
            event_type: event_type.to_string(),
            source,
        })
    }

    /// All tags the registry can decode
    pub fn known_types() -> impl Iterator<Item = &'static str> {
        REGISTRY.iter().map(|(tag, _)| *tag)
    }
}
