//! bank_ledger - ledger API with a transactional outbox
//!
//! Serves the ledger over HTTP, relays staged events to the AMQP broker and
//! consumes notification events.

use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bank_ledger::api::{self, AppState};
use bank_ledger::config::Config;
use bank_ledger::db;
use bank_ledger::jobs::{RelayScheduler, RelaySchedulerConfig};
use bank_ledger::ledger::{FraudScreen, LedgerEngine};
use bank_ledger::messaging::{AmqpConsumer, AmqpPublisher, NotificationHandler};
use bank_ledger::outbox::{OutboxRelay, PgOutboxStore, RetryPolicy};

/// Initialize tracing/logging
fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "bank_ledger=debug,tower_http=debug,lapin=info".into());

    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    init_tracing(config.json_logs());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(environment = %config.environment, "Starting bank_ledger");
    tracing::info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please apply migrations/.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    tracing::info!("Database connected successfully");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Outbox relay
    let publisher = Arc::new(AmqpPublisher::connect(&config.amqp_url, &config.amqp_exchange).await?);

    let mut store = PgOutboxStore::new(pool.clone());
    if let Some(lease) = config.outbox.claim_lease {
        store = store.with_claim_lease(lease);
    }

    let relay = OutboxRelay::new(store.clone(), publisher.clone())
        .with_policy(RetryPolicy::new(config.outbox.max_retries))
        .with_publish_timeout(config.outbox.publish_timeout);

    let relay_task = RelayScheduler::with_config(
        Arc::new(relay),
        RelaySchedulerConfig {
            poll_interval: config.outbox.poll_interval,
            batch_size: config.outbox.batch_size,
        },
    )
    .start(shutdown_rx.clone());

    // Event consumer
    let consumer = AmqpConsumer::connect(&config.amqp_url, &config.amqp_exchange)
        .await?
        .register(Arc::new(NotificationHandler::new(pool.clone())));

    let consumer_shutdown = shutdown_rx.clone();
    let consumer_task = tokio::spawn(async move {
        if let Err(e) = consumer.run(consumer_shutdown).await {
            tracing::error!(error = %e, "Event consumer stopped");
        }
    });

    // HTTP API
    let engine = LedgerEngine::new(pool.clone())
        .with_fraud_screen(FraudScreen::new(config.fraud_amount_threshold));

    let app = api::build_router(AppState {
        engine,
        outbox: Arc::new(store),
        max_retries: config.outbox.max_retries,
    });

    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    tracing::info!("Server shutting down...");

    let _ = shutdown_tx.send(true);

    if let Err(e) = relay_task.await {
        tracing::error!(error = %e, "Relay task panicked");
    }
    if let Err(e) = consumer_task.await {
        tracing::error!(error = %e, "Consumer task panicked");
    }

    if let Err(e) = publisher.close().await {
        tracing::warn!(error = %e, "Failed to close broker connection");
    }

    pool.close().await;
    tracing::info!("Connections closed. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
