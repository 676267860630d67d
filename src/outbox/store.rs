//! Outbox Store
//!
//! Durable storage for staged events. Staging happens inside the caller's
//! unit of work; everything else is used by the relay and the admin API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::Event;

use super::{OutboxError, OutboxMessage, OutboxStats};

/// Row shape shared by every SELECT / RETURNING in this module
type MessageRow = (
    Uuid,
    String,
    Value,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    i32,
    Option<DateTime<Utc>>,
);

const MESSAGE_COLUMNS: &str =
    "id, event_type, event_data, created_at, processed_at, retry_count, scheduled_at";

const CLAIMED_COLUMNS: &str = "o.id, o.event_type, o.event_data, o.created_at, o.processed_at, \
     o.retry_count, o.scheduled_at";

fn from_row(row: MessageRow) -> OutboxMessage {
    let (id, event_type, event_data, created_at, processed_at, retry_count, scheduled_at) = row;
    OutboxMessage {
        id,
        event_type,
        event_data,
        created_at,
        processed_at,
        retry_count,
        scheduled_at,
    }
}

/// Stage an event in the caller's unit of work.
///
/// The row commits or rolls back together with the state change that
/// produced the event. `created_at` comes from the database clock so that
/// rows staged in one unit keep their staging order.
pub async fn stage(tx: &mut Transaction<'_, Postgres>, event: &Event) -> Result<Uuid, OutboxError> {
    let id = Uuid::new_v4();
    let payload = event.to_payload()?;

    sqlx::query(
        r#"
        INSERT INTO outbox_messages (id, event_type, event_data)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(id)
    .bind(event.event_type())
    .bind(&payload)
    .execute(&mut **tx)
    .await?;

    tracing::debug!(outbox_id = %id, event_type = event.event_type(), "Event staged");

    Ok(id)
}

/// Storage operations the relay and the admin surface need.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Up to `limit` due messages, oldest first (created_at, then id).
    ///
    /// Due: unprocessed, `retry_count < max_retries`, and `scheduled_at`
    /// unset or not after `now`.
    async fn fetch_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        max_retries: i32,
    ) -> Result<Vec<OutboxMessage>, OutboxError>;

    /// Set `processed_at`. Returns false if the message was already processed.
    async fn mark_processed(&self, id: Uuid, processed_at: DateTime<Utc>) -> Result<bool, OutboxError>;

    /// Record a failed attempt. `scheduled_at = None` leaves the schedule as is.
    async fn record_failure(
        &self,
        id: Uuid,
        retry_count: i32,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<(), OutboxError>;

    /// Unprocessed messages that exhausted their retries
    async fn parked(&self, max_retries: i32, limit: usize) -> Result<Vec<OutboxMessage>, OutboxError>;

    /// Reset retries and schedule of an unprocessed message.
    /// Returns false if no such unprocessed message exists.
    async fn requeue(&self, id: Uuid) -> Result<bool, OutboxError>;

    async fn stats(&self, now: DateTime<Utc>, max_retries: i32) -> Result<OutboxStats, OutboxError>;
}

/// PostgreSQL-backed outbox store
#[derive(Debug, Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
    claim_lease: Option<Duration>,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            claim_lease: None,
        }
    }

    /// Claim selected rows for `lease` so concurrent relay instances skip them.
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = Some(lease);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        max_retries: i32,
        lease: Duration,
    ) -> Result<Vec<OutboxMessage>, OutboxError> {
        let lease = chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::zero());
        let lease_until = now + lease;

        let query = format!(
            r#"
            UPDATE outbox_messages o
            SET scheduled_at = $4
            FROM (
                SELECT id FROM outbox_messages
                WHERE processed_at IS NULL
                  AND retry_count < $3
                  AND (scheduled_at IS NULL OR scheduled_at <= $1)
                ORDER BY created_at ASC, id ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            ) due
            WHERE o.id = due.id
            RETURNING {}
            "#,
            CLAIMED_COLUMNS
        );

        let rows: Vec<MessageRow> = sqlx::query_as(&query)
            .bind(now)
            .bind(limit)
            .bind(max_retries)
            .bind(lease_until)
            .fetch_all(&self.pool)
            .await?;

        // RETURNING does not preserve the subquery order
        let mut messages: Vec<_> = rows.into_iter().map(from_row).collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(messages)
    }
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn fetch_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        max_retries: i32,
    ) -> Result<Vec<OutboxMessage>, OutboxError> {
        let limit = limit as i64;

        if let Some(lease) = self.claim_lease {
            return self.claim_due(now, limit, max_retries, lease).await;
        }

        let query = format!(
            r#"
            SELECT {}
            FROM outbox_messages
            WHERE processed_at IS NULL
              AND retry_count < $3
              AND (scheduled_at IS NULL OR scheduled_at <= $1)
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#,
            MESSAGE_COLUMNS
        );

        let rows: Vec<MessageRow> = sqlx::query_as(&query)
            .bind(now)
            .bind(limit)
            .bind(max_retries)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(from_row).collect())
    }

    async fn mark_processed(&self, id: Uuid, processed_at: DateTime<Utc>) -> Result<bool, OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET processed_at = $2
            WHERE id = $1 AND processed_at IS NULL
            "#,
        )
        .bind(id)
        .bind(processed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_failure(
        &self,
        id: Uuid,
        retry_count: i32,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<(), OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET retry_count = $2,
                scheduled_at = COALESCE($3, scheduled_at)
            WHERE id = $1 AND processed_at IS NULL
            "#,
        )
        .bind(id)
        .bind(retry_count)
        .bind(scheduled_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::NotFound(id));
        }

        Ok(())
    }

    async fn parked(&self, max_retries: i32, limit: usize) -> Result<Vec<OutboxMessage>, OutboxError> {
        let query = format!(
            r#"
            SELECT {}
            FROM outbox_messages
            WHERE processed_at IS NULL AND retry_count >= $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#,
            MESSAGE_COLUMNS
        );

        let rows: Vec<MessageRow> = sqlx::query_as(&query)
            .bind(max_retries)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(from_row).collect())
    }

    async fn requeue(&self, id: Uuid) -> Result<bool, OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET retry_count = 0, scheduled_at = NULL
            WHERE id = $1 AND processed_at IS NULL
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn stats(&self, now: DateTime<Utc>, max_retries: i32) -> Result<OutboxStats, OutboxError> {
        let (pending, due, parked, processed): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE processed_at IS NULL AND retry_count < $2),
                COUNT(*) FILTER (
                    WHERE processed_at IS NULL AND retry_count < $2
                      AND (scheduled_at IS NULL OR scheduled_at <= $1)
                ),
                COUNT(*) FILTER (WHERE processed_at IS NULL AND retry_count >= $2),
                COUNT(*) FILTER (WHERE processed_at IS NOT NULL)
            FROM outbox_messages
            "#,
        )
        .bind(now)
        .bind(max_retries)
        .fetch_one(&self.pool)
        .await?;

        Ok(OutboxStats {
            pending,
            due,
            parked,
            processed,
        })
    }
}
