//! API Routes
//!
//! HTTP endpoint definitions. Handlers only translate between HTTP and the
//! ledger engine / outbox store.

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{
    Account, Customer, OperationContext, Transaction, TransactionRequest,
};
use crate::error::AppError;
use crate::ledger::{LedgerEngine, LedgerOutcome};
use crate::outbox::{OutboxMessage, OutboxStats, OutboxStore};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub engine: LedgerEngine,
    pub outbox: Arc<dyn OutboxStore>,
    /// Retry budget the relay runs with; decides what counts as parked
    pub max_retries: i32,
}

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    /// completed, failed or flagged
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub transaction: Transaction,
}

impl From<LedgerOutcome> for TransactionResponse {
    fn from(outcome: LedgerOutcome) -> Self {
        match outcome {
            LedgerOutcome::Completed(transaction) => Self {
                outcome: "completed",
                failure_reason: None,
                transaction,
            },
            LedgerOutcome::Failed(transaction, reason) => Self {
                outcome: "failed",
                failure_reason: Some(reason.to_string()),
                transaction,
            },
            LedgerOutcome::Flagged(transaction) => Self {
                outcome: "flagged",
                failure_reason: None,
                transaction,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct FlagRequest {
    pub reason: String,
    #[serde(default = "default_risk_score")]
    pub risk_score: u8,
}

fn default_risk_score() -> u8 {
    100
}

#[derive(Debug, Deserialize)]
pub struct CreateCustomerRequest {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub opted_for_notifications: bool,
}

#[derive(Debug, Deserialize)]
pub struct OpenAccountRequest {
    pub customer_id: Uuid,
    pub account_number: String,
}

#[derive(Debug, Deserialize)]
pub struct DateRangeQuery {
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct ParkedResponse {
    pub messages: Vec<OutboxMessage>,
    pub max_retries: i32,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        // Transactions
        .route("/transactions", post(submit_transaction))
        .route("/transactions/:transaction_id", get(get_transaction))
        .route("/transactions/:transaction_id/flag", post(flag_transaction))
        // Customers and accounts
        .route("/customers", post(create_customer))
        .route("/accounts", post(open_account))
        .route("/accounts/:account_id", get(get_account))
        .route("/accounts/:account_id/transactions", get(get_account_transactions))
        .route("/accounts/:account_id/lock", post(lock_account))
        .route("/accounts/:account_id/unlock", post(unlock_account))
        // Outbox administration
        .route("/outbox/stats", get(outbox_stats))
        .route("/outbox/parked", get(parked_messages))
        .route("/outbox/:message_id/requeue", post(requeue_message))
}

// =========================================================================
// Transactions
// =========================================================================

/// Validate, screen and apply a transaction.
///
/// 201 for every recorded outcome; a Failed transaction is still a record.
async fn submit_transaction(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<TransactionRequest>,
) -> Result<(StatusCode, Json<TransactionResponse>), AppError> {
    let transaction = request.validate(context)?;
    let outcome = state.engine.submit(transaction).await?;

    Ok((StatusCode::CREATED, Json(outcome.into())))
}

async fn get_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<Transaction>, AppError> {
    Ok(Json(state.engine.get_transaction(transaction_id).await?))
}

async fn flag_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
    Json(request): Json<FlagRequest>,
) -> Result<Json<Transaction>, AppError> {
    if request.reason.trim().is_empty() {
        return Err(AppError::InvalidRequest("reason must not be empty".to_string()));
    }
    if request.risk_score > 100 {
        return Err(AppError::InvalidRequest("risk_score must be between 0 and 100".to_string()));
    }

    let flagged = state
        .engine
        .flag(transaction_id, &request.reason, request.risk_score)
        .await?;

    Ok(Json(flagged))
}

// =========================================================================
// Customers and accounts
// =========================================================================

async fn create_customer(
    State(state): State<AppState>,
    Json(request): Json<CreateCustomerRequest>,
) -> Result<(StatusCode, Json<Customer>), AppError> {
    if request.name.trim().is_empty() || request.email.trim().is_empty() {
        return Err(AppError::InvalidRequest("name and email are required".to_string()));
    }

    let customer = Customer::new(request.name, request.email, request.opted_for_notifications);
    let customer = state.engine.register_customer(customer).await?;

    Ok((StatusCode::CREATED, Json(customer)))
}

async fn open_account(
    State(state): State<AppState>,
    Json(request): Json<OpenAccountRequest>,
) -> Result<(StatusCode, Json<Account>), AppError> {
    let account_number = request.account_number.trim();
    if account_number.is_empty() {
        return Err(AppError::InvalidRequest("account_number is required".to_string()));
    }

    let account = state
        .engine
        .open_account(request.customer_id, account_number)
        .await?;

    Ok((StatusCode::CREATED, Json(account)))
}

async fn get_account(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<Account>, AppError> {
    Ok(Json(state.engine.get_account(account_id).await?))
}

/// Defaults to the last 30 days.
async fn get_account_transactions(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Query(range): Query<DateRangeQuery>,
) -> Result<Json<Vec<Transaction>>, AppError> {
    let to = range.to.unwrap_or_else(Utc::now);
    let from = range.from.unwrap_or(to - Duration::days(30));
    if from > to {
        return Err(AppError::InvalidRequest("from must not be after to".to_string()));
    }

    // Distinguish "no transactions" from "no such account"
    state.engine.get_account(account_id).await?;

    let transactions = state
        .engine
        .account_transactions(account_id, from, to)
        .await?;

    Ok(Json(transactions))
}

async fn lock_account(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<Account>, AppError> {
    Ok(Json(state.engine.lock_account(account_id).await?))
}

async fn unlock_account(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<Account>, AppError> {
    Ok(Json(state.engine.unlock_account(account_id).await?))
}

// =========================================================================
// Outbox administration
// =========================================================================

async fn outbox_stats(State(state): State<AppState>) -> Result<Json<OutboxStats>, AppError> {
    Ok(Json(state.outbox.stats(Utc::now(), state.max_retries).await?))
}

async fn parked_messages(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<ParkedResponse>, AppError> {
    let limit = query.limit.clamp(1, 500);
    let messages = state.outbox.parked(state.max_retries, limit).await?;

    Ok(Json(ParkedResponse {
        messages,
        max_retries: state.max_retries,
    }))
}

async fn requeue_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if !state.outbox.requeue(message_id).await? {
        return Err(AppError::NotFound(format!("unprocessed outbox message {}", message_id)));
    }

    tracing::info!(message_id = %message_id, "Outbox message requeued");

    Ok(StatusCode::NO_CONTENT)
}
