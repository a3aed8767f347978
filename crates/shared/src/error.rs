//! Error types shared across PAMDes crates

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PamdesError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
