//! In-memory publisher
//!
//! Records what would have gone to the broker. Used by tests and by the
//! relay when no broker is configured.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::domain::Event;

use super::{routing_key, EventPublisher, PublishError};

/// A published event as the broker would have seen it
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub routing_key: String,
    pub event: Event,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryPublisher {
    published: Arc<Mutex<Vec<PublishedMessage>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following publish fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.published.lock().map(|p| p.len()).unwrap_or(0)
    }
}

#[async_trait]
impl EventPublisher for InMemoryPublisher {
    async fn publish(&self, event: &Event) -> Result<(), PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Unavailable("publisher switched off".to_string()));
        }

        let mut published = self
            .published
            .lock()
            .map_err(|_| PublishError::Unavailable("publisher state poisoned".to_string()))?;

        published.push(PublishedMessage {
            routing_key: routing_key(event.event_type()),
            event: event.clone(),
        });

        Ok(())
    }
}
