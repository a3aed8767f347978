//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pamdes_billing::BillingError;
use serde_json::json;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Identity
    #[error("Authentication required")]
    Unauthorized,
    #[error("Insufficient permissions")]
    Forbidden,

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // Resource errors
    #[error("Resource not found")]
    NotFound,
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Bill {0} already has a pending payment")]
    PaymentPending(String),

    // Gateway errors
    #[error("Payment gateway error: {0}")]
    BadGateway(String),

    // Internal errors
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
    #[error("Service unavailable")]
    ServiceUnavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Identity
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN", self.to_string()),

            // Validation
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),

            // Resources
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            ApiError::PaymentPending(_) => (StatusCode::CONFLICT, "PAYMENT_PENDING", self.to_string()),

            // Gateway
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "GATEWAY_ERROR", msg.clone()),

            // Internal
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR", "Database error".to_string()),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", self.to_string()),
            ApiError::ServiceUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", self.to_string()),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Validation(msg) => ApiError::Validation(msg),
            BillingError::Conflict(msg) => ApiError::Conflict(msg),
            BillingError::AlreadyPending(bill) => ApiError::PaymentPending(bill),
            BillingError::Gateway(msg) => ApiError::BadGateway(msg),
            BillingError::Transport(msg) => {
                tracing::warn!(error = %msg, "Payment gateway unreachable");
                ApiError::BadGateway("payment gateway unreachable".to_string())
            }
            BillingError::SignatureInvalid => {
                ApiError::BadRequest("invalid callback signature".to_string())
            }
            BillingError::NotFound(what) => {
                tracing::debug!(what = %what, "Resource not found");
                ApiError::NotFound
            }
            BillingError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                ApiError::Database(msg)
            }
            BillingError::Config(msg) => {
                tracing::error!(error = %msg, "Billing misconfigured");
                ApiError::ServiceUnavailable
            }
            BillingError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal billing error");
                ApiError::Internal
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::from(err).into()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
