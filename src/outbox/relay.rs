//! Outbox Relay
//!
//! Moves staged events from the outbox store to the broker. Each pass takes
//! the oldest due messages, publishes them one by one and records the
//! outcome per message, so one bad message never blocks the rest.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::messaging::{EventPublisher, PublishError};

use super::{OutboxError, OutboxMessage, OutboxStore};

/// Attempts after which a message is parked
pub const DEFAULT_MAX_RETRIES: i32 = 10;

/// Upper bound for one publish call
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Exponential backoff with a hard attempt cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: i32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: i32) -> Self {
        Self { max_retries }
    }

    /// When the next attempt may run after the `failures`-th consecutive
    /// failure: `now + 2^failures` minutes, or `None` once the cap is hit.
    pub fn next_attempt(&self, failures: i32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if failures >= self.max_retries {
            return None;
        }
        // 2^30 minutes is ~2000 years; larger exponents overflow chrono
        let exponent = failures.clamp(0, 30) as u32;
        Some(now + ChronoDuration::minutes(1i64 << exponent))
    }
}

/// What one relay pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Messages selected as due
    pub fetched: usize,
    pub published: usize,
    /// Publish failed, rescheduled with backoff
    pub rescheduled: usize,
    /// Publish failed and the retry budget is spent
    pub parked: usize,
    /// Tag or payload could not be decoded; parked without publishing
    pub undecodable: usize,
    /// Outcome could not be written back to the store
    pub store_errors: usize,
}

/// The relay over a store and a publisher.
pub struct OutboxRelay<S, P> {
    store: S,
    publisher: P,
    policy: RetryPolicy,
    publish_timeout: Duration,
}

impl<S, P> OutboxRelay<S, P>
where
    S: OutboxStore,
    P: EventPublisher,
{
    pub fn new(store: S, publisher: P) -> Self {
        Self {
            store,
            publisher,
            policy: RetryPolicy::default(),
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Process up to `max_size` due messages against the wall clock.
    pub async fn process_batch(&self, max_size: usize) -> Result<BatchReport, OutboxError> {
        self.run_batch(max_size, Utc::now).await
    }

    /// Process a batch with a fixed clock. Selection, `processed_at` and
    /// backoff all use `now`.
    pub async fn process_batch_at(
        &self,
        max_size: usize,
        now: DateTime<Utc>,
    ) -> Result<BatchReport, OutboxError> {
        self.run_batch(max_size, move || now).await
    }

    async fn run_batch<C>(&self, max_size: usize, clock: C) -> Result<BatchReport, OutboxError>
    where
        C: Fn() -> DateTime<Utc> + Send + Sync,
    {
        let messages = self
            .store
            .fetch_due(clock(), max_size, self.policy.max_retries)
            .await?;

        let mut report = BatchReport {
            fetched: messages.len(),
            ..Default::default()
        };

        if messages.is_empty() {
            return Ok(report);
        }

        tracing::debug!(count = messages.len(), "Relaying outbox batch");

        for message in &messages {
            self.relay_one(message, &clock, &mut report).await;
        }

        if report.rescheduled + report.parked + report.undecodable + report.store_errors > 0 {
            tracing::warn!(
                fetched = report.fetched,
                published = report.published,
                rescheduled = report.rescheduled,
                parked = report.parked,
                undecodable = report.undecodable,
                store_errors = report.store_errors,
                "Outbox batch finished with failures"
            );
        } else {
            tracing::info!(published = report.published, "Outbox batch relayed");
        }

        Ok(report)
    }

    async fn relay_one<C>(&self, message: &OutboxMessage, clock: &C, report: &mut BatchReport)
    where
        C: Fn() -> DateTime<Utc> + Send + Sync,
    {
        let event = match message.decode() {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(
                    outbox_id = %message.id,
                    event_type = %message.event_type,
                    error = %e,
                    "Undecodable outbox message, parking"
                );
                report.undecodable += 1;
                let parked_at = message.retry_count.max(self.policy.max_retries);
                if let Err(e) = self.store.record_failure(message.id, parked_at, None).await {
                    tracing::error!(outbox_id = %message.id, error = %e, "Failed to park message");
                    report.store_errors += 1;
                }
                return;
            }
        };

        let outcome = match tokio::time::timeout(self.publish_timeout, self.publisher.publish(&event)).await {
            Ok(result) => result,
            Err(_) => Err(PublishError::Timeout(self.publish_timeout)),
        };

        match outcome {
            Ok(()) => match self.store.mark_processed(message.id, clock()).await {
                Ok(_) => report.published += 1,
                Err(e) => {
                    // Published but not marked: the next pass publishes again
                    tracing::error!(
                        outbox_id = %message.id,
                        error = %e,
                        "Published message could not be marked processed"
                    );
                    report.store_errors += 1;
                }
            },
            Err(publish_error) => {
                let failures = message.retry_count + 1;
                let next = self.policy.next_attempt(failures, clock());

                match next {
                    Some(at) => tracing::warn!(
                        outbox_id = %message.id,
                        event_type = %message.event_type,
                        retry_count = failures,
                        scheduled_at = %at,
                        error = %publish_error,
                        "Publish failed, rescheduled"
                    ),
                    None => tracing::error!(
                        outbox_id = %message.id,
                        event_type = %message.event_type,
                        retry_count = failures,
                        error = %publish_error,
                        "Publish failed, retry budget exhausted; message parked"
                    ),
                }

                match self.store.record_failure(message.id, failures, next).await {
                    Ok(()) if next.is_some() => report.rescheduled += 1,
                    Ok(()) => report.parked += 1,
                    Err(e) => {
                        tracing::error!(outbox_id = %message.id, error = %e, "Failed to record publish failure");
                        report.store_errors += 1;
                    }
                }
            }
        }
    }
}
