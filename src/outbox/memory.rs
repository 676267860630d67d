//! In-memory outbox store
//!
//! Same selection and update rules as the PostgreSQL store, held in a Vec.
//! Cloning shares the underlying rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::domain::Event;

use super::{OutboxError, OutboxMessage, OutboxStats, OutboxStore};

#[derive(Debug, Clone, Default)]
pub struct InMemoryOutboxStore {
    messages: Arc<Mutex<Vec<OutboxMessage>>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> MutexGuard<'_, Vec<OutboxMessage>> {
        // A poisoned lock only means a test panicked mid-update
        self.messages.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, message: OutboxMessage) -> Uuid {
        let id = message.id;
        self.rows().push(message);
        id
    }

    /// Stage an event as a fresh unprocessed message.
    pub fn stage(&self, event: &Event) -> Result<Uuid, OutboxError> {
        let message = OutboxMessage::from_event(event)?;
        Ok(self.insert(message))
    }

    pub fn get(&self, id: Uuid) -> Option<OutboxMessage> {
        self.rows().iter().find(|m| m.id == id).cloned()
    }

    pub fn messages(&self) -> Vec<OutboxMessage> {
        self.rows().clone()
    }
}

fn oldest_first(messages: &mut [OutboxMessage]) {
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn fetch_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        max_retries: i32,
    ) -> Result<Vec<OutboxMessage>, OutboxError> {
        let mut due: Vec<_> = self
            .rows()
            .iter()
            .filter(|m| m.is_due(now, max_retries))
            .cloned()
            .collect();
        oldest_first(&mut due);
        due.truncate(limit);
        Ok(due)
    }

    async fn mark_processed(&self, id: Uuid, processed_at: DateTime<Utc>) -> Result<bool, OutboxError> {
        let mut rows = self.rows();
        match rows.iter_mut().find(|m| m.id == id) {
            Some(message) if message.processed_at.is_none() => {
                message.processed_at = Some(processed_at);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(OutboxError::NotFound(id)),
        }
    }

    async fn record_failure(
        &self,
        id: Uuid,
        retry_count: i32,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<(), OutboxError> {
        let mut rows = self.rows();
        let message = rows
            .iter_mut()
            .find(|m| m.id == id && m.processed_at.is_none())
            .ok_or(OutboxError::NotFound(id))?;

        message.retry_count = retry_count;
        if scheduled_at.is_some() {
            message.scheduled_at = scheduled_at;
        }
        Ok(())
    }

    async fn parked(&self, max_retries: i32, limit: usize) -> Result<Vec<OutboxMessage>, OutboxError> {
        let mut parked: Vec<_> = self
            .rows()
            .iter()
            .filter(|m| m.is_parked(max_retries))
            .cloned()
            .collect();
        oldest_first(&mut parked);
        parked.truncate(limit);
        Ok(parked)
    }

    async fn requeue(&self, id: Uuid) -> Result<bool, OutboxError> {
        let mut rows = self.rows();
        match rows.iter_mut().find(|m| m.id == id && m.processed_at.is_none()) {
            Some(message) => {
                message.retry_count = 0;
                message.scheduled_at = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn stats(&self, now: DateTime<Utc>, max_retries: i32) -> Result<OutboxStats, OutboxError> {
        let rows = self.rows();
        let mut stats = OutboxStats::default();
        for message in rows.iter() {
            if message.is_processed() {
                stats.processed += 1;
            } else if message.is_parked(max_retries) {
                stats.parked += 1;
            } else {
                stats.pending += 1;
                if message.is_due(now, max_retries) {
                    stats.due += 1;
                }
            }
        }
        Ok(stats)
    }
}
