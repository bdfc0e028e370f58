//! # Error Handling
//!
//! Defines the application-level error type and how it is converted to HTTP
//! responses. Domain errors (ledger, catalog, inference, saga) live next to
//! their modules; this type is where they all become status codes and a
//! consistent JSON error body.
//!
//! ## HTTP Mapping:
//! - pre-flight billing refusals map to client errors (402/403/404)
//! - backend propagation failures map to 502 (the fault is downstream)
//! - broken ledger invariants map to 500 and are logged loudly elsewhere

use crate::billing::{CatalogError, LedgerError};
use crate::transcription::TranscriptionError;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (broken invariants, lock poisoning, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Caller identity missing or unparseable
    Unauthorized(String),

    /// The account cannot pay for the requested prediction
    PaymentRequired(String),

    /// The account exists but is deactivated
    Forbidden(String),

    /// Requested resource was not found
    NotFound(String),

    /// A uniqueness constraint was violated (duplicate model name, account)
    Conflict(String),

    /// The inference backend refused an administrative request
    BadGateway(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::PaymentRequired(msg) => write!(f, "Payment required: {}", msg),
            AppError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::BadGateway(msg) => write!(f, "Bad gateway: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;

        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg.clone()),
            AppError::PaymentRequired(msg) => {
                (StatusCode::PAYMENT_REQUIRED, "insufficient_credits", msg.clone())
            }
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "bad_gateway", msg.clone()),
            AppError::ConfigError(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg.clone())
            }
            AppError::ValidationError(msg) => {
                (StatusCode::BAD_REQUEST, "validation_error", msg.clone())
            }
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Ledger refusals as seen from account-facing handlers.
impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match &err {
            LedgerError::UserNotFound(_) => AppError::NotFound(err.to_string()),
            LedgerError::UserInactive(_) => AppError::Forbidden(err.to_string()),
            LedgerError::InsufficientFunds { .. } => AppError::PaymentRequired(err.to_string()),
            LedgerError::AccountExists(_) => AppError::Conflict(err.to_string()),
            // Resolution faults never belong to a request; they are bugs.
            LedgerError::UnknownReservation(_) | LedgerError::InvalidState { .. } => {
                AppError::Internal(err.to_string())
            }
        }
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match &err {
            CatalogError::NotFound(_) => AppError::NotFound(err.to_string()),
            CatalogError::DuplicateName(_) => AppError::Conflict(err.to_string()),
            CatalogError::Validation(_) => AppError::ValidationError(err.to_string()),
            CatalogError::Propagation(_) => AppError::BadGateway(err.to_string()),
        }
    }
}

/// Saga pre-flight refusals. Gateway failures never reach this conversion;
/// they settle into a `failed` outcome inside the saga.
impl From<TranscriptionError> for AppError {
    fn from(err: TranscriptionError) -> Self {
        match err {
            TranscriptionError::ModelNotFound(_) => AppError::NotFound(err.to_string()),
            TranscriptionError::Ledger(inner) => inner.into(),
            TranscriptionError::LedgerViolation(_) => AppError::Internal(err.to_string()),
        }
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_ledger_errors_map_to_client_statuses() {
        let user = Uuid::new_v4();
        assert!(matches!(
            AppError::from(LedgerError::UserNotFound(user)),
            AppError::NotFound(_)
        ));
        assert!(matches!(
            AppError::from(LedgerError::UserInactive(user)),
            AppError::Forbidden(_)
        ));
        assert!(matches!(
            AppError::from(LedgerError::InsufficientFunds {
                required: 3,
                available: 2
            }),
            AppError::PaymentRequired(_)
        ));
    }

    #[test]
    fn test_invariant_faults_map_to_internal() {
        let id = Uuid::new_v4();
        assert!(matches!(
            AppError::from(LedgerError::UnknownReservation(id)),
            AppError::Internal(_)
        ));
        assert!(matches!(
            AppError::from(TranscriptionError::LedgerViolation(
                LedgerError::UnknownReservation(id)
            )),
            AppError::Internal(_)
        ));
    }
}
