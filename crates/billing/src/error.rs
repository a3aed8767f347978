//! Billing error types

use pamdes_shared::PamdesError;
use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    /// Range conflicts, malformed tier edits, missing fields
    #[error("Validation error: {0}")]
    Validation(String),

    /// Bill already has a pending payment, bundle already paid, etc.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bill {0} already has an outstanding gateway transaction")]
    AlreadyPending(String),

    /// The gateway answered but rejected the request or sent something unreadable
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    /// The gateway could not be reached (connect, timeout, broken body)
    #[error("Payment gateway unreachable: {0}")]
    Transport(String),

    #[error("Callback signature verification failed")]
    SignatureInvalid,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => BillingError::NotFound("row not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
                // Unique violation, e.g. the one-pending-payment-per-bill index
                BillingError::Conflict(db_err.message().to_string())
            }
            _ => BillingError::Database(err.to_string()),
        }
    }
}

impl From<PamdesError> for BillingError {
    fn from(err: PamdesError) -> Self {
        match err {
            PamdesError::NotFound(msg) => BillingError::NotFound(msg),
            PamdesError::Validation(msg) | PamdesError::InvalidValue(msg) => {
                BillingError::Validation(msg)
            }
            PamdesError::Internal(msg) => BillingError::Internal(msg),
        }
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        BillingError::Transport(err.to_string())
    }
}

impl BillingError {
    /// Whether the failure came from the gateway rather than from local state
    pub fn is_gateway_failure(&self) -> bool {
        matches!(self, BillingError::Gateway(_) | BillingError::Transport(_))
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
