//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::DomainError;
use crate::ledger::LedgerError;
use crate::outbox::OutboxError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Outbox(#[from] OutboxError),

    // Server errors (5xx)
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

fn domain_status(err: &DomainError) -> (StatusCode, &'static str, Option<String>) {
    match err {
        DomainError::InvalidAmount(msg) => (StatusCode::BAD_REQUEST, "invalid_amount", Some(msg.clone())),
        DomainError::MissingDestination => (StatusCode::BAD_REQUEST, "missing_destination", None),
        DomainError::UnexpectedDestination => (StatusCode::BAD_REQUEST, "unexpected_destination", None),
        DomainError::SameAccountTransfer => (StatusCode::BAD_REQUEST, "same_account_transfer", None),
        DomainError::InvalidStatusTransition { .. } => {
            (StatusCode::CONFLICT, "invalid_status_transition", Some(err.to_string()))
        }
        DomainError::UnknownValue { .. } => (StatusCode::BAD_REQUEST, "unknown_value", Some(err.to_string())),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }

            // 404 Not Found
            AppError::NotFound(what) => (StatusCode::NOT_FOUND, "not_found", Some(what.clone())),

            // 409 Conflict
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", Some(msg.clone())),

            AppError::Domain(domain_err) => domain_status(domain_err),

            AppError::Ledger(ledger_err) => match ledger_err {
                LedgerError::Domain(domain_err) => domain_status(domain_err),
                LedgerError::AccountNotFound(id) => {
                    (StatusCode::NOT_FOUND, "account_not_found", Some(id.to_string()))
                }
                LedgerError::CustomerNotFound(id) => {
                    (StatusCode::NOT_FOUND, "customer_not_found", Some(id.to_string()))
                }
                LedgerError::TransactionNotFound(id) => {
                    (StatusCode::NOT_FOUND, "transaction_not_found", Some(id.to_string()))
                }
                LedgerError::DuplicateAccountNumber(number) => {
                    (StatusCode::CONFLICT, "duplicate_account_number", Some(number.clone()))
                }
                other => {
                    tracing::error!("Ledger error: {:?}", other);
                    (StatusCode::INTERNAL_SERVER_ERROR, "ledger_error", None)
                }
            },

            AppError::Outbox(OutboxError::NotFound(id)) => {
                (StatusCode::NOT_FOUND, "outbox_message_not_found", Some(id.to_string()))
            }

            // 500 Internal Server Error
            AppError::Outbox(e) => {
                tracing::error!("Outbox error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "outbox_error", None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
            AppError::Config(e) => {
                tracing::error!("Config error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", None)
            }
        };

        // Infrastructure details stay in the logs
        let error = if status.is_server_error() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error,
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}
