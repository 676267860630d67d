//! Outbox Errors

use uuid::Uuid;

/// Errors that can occur while staging or relaying outbox messages
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Message not found
    #[error("Outbox message not found: {0}")]
    NotFound(Uuid),
}

impl OutboxError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, OutboxError::Database(_))
    }
}
