//! Scheduled Jobs
//!
//! The outbox relay runs here as a single periodic background task.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::messaging::EventPublisher;
use crate::outbox::{BatchReport, OutboxError, OutboxRelay, OutboxStore};

/// Configuration for the relay scheduler
#[derive(Debug, Clone)]
pub struct RelaySchedulerConfig {
    /// Time between relay passes (default: 5 seconds)
    pub poll_interval: Duration,
    /// Maximum messages per pass (default: 100)
    pub batch_size: usize,
}

impl Default for RelaySchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 100,
        }
    }
}

/// Drives `process_batch` on a fixed interval until shut down.
pub struct RelayScheduler<S, P> {
    relay: Arc<OutboxRelay<S, P>>,
    config: RelaySchedulerConfig,
}

impl<S, P> RelayScheduler<S, P>
where
    S: OutboxStore + 'static,
    P: EventPublisher + 'static,
{
    pub fn new(relay: Arc<OutboxRelay<S, P>>) -> Self {
        Self {
            relay,
            config: RelaySchedulerConfig::default(),
        }
    }

    pub fn with_config(relay: Arc<OutboxRelay<S, P>>, config: RelaySchedulerConfig) -> Self {
        Self { relay, config }
    }

    /// Start in the background. The task finishes its current pass and
    /// exits once `shutdown` changes.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Outbox relay started"
        );

        let mut ticker = interval(self.config.poll_interval);
        // A slow pass delays the next one instead of bunching them up
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(error = %e, "Outbox relay pass failed");
                    }
                }
            }
        }

        tracing::info!("Outbox relay stopped");
    }

    /// Run one relay pass (for manual trigger or testing)
    pub async fn run_once(&self) -> Result<BatchReport, OutboxError> {
        self.relay.process_batch(self.config.batch_size).await
    }
}

// =========================================================================
// Tests
// =========================================================================
