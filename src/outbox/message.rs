//! Outbox message record
//!
//! One staged event. Processed iff `processed_at` is set; never deleted.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::{DecodeError, Event};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboxMessage {
    pub id: Uuid,
    /// Registry tag of the staged event
    pub event_type: String,
    pub event_data: Value,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    /// Earliest time the next publish attempt may run
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl OutboxMessage {
    /// A new unprocessed message carrying `event`.
    pub fn from_event(event: &Event) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            event_type: event.event_type().to_string(),
            event_data: event.to_payload()?,
            created_at: Utc::now(),
            processed_at: None,
            retry_count: 0,
            scheduled_at: None,
        })
    }

    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }

    /// Exhausted its retry budget and waits for manual requeue
    pub fn is_parked(&self, max_retries: i32) -> bool {
        !self.is_processed() && self.retry_count >= max_retries
    }

    /// Eligible for the next relay pass at `now`
    pub fn is_due(&self, now: DateTime<Utc>, max_retries: i32) -> bool {
        !self.is_processed()
            && !self.is_parked(max_retries)
            && self.scheduled_at.map_or(true, |at| at <= now)
    }

    pub fn decode(&self) -> Result<Event, DecodeError> {
        Event::decode(&self.event_type, &self.event_data)
    }
}

/// Counts by processing state, for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutboxStats {
    /// Unprocessed and not parked
    pub pending: i64,
    /// Pending and eligible right now
    pub due: i64,
    pub parked: i64,
    pub processed: i64,
}
