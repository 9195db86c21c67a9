//! Error types for plan resolution and parameter validation.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised before any side effect takes place.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}
