//! Lifecycle error types.

use habitat_broker_core::CoreError;
use habitat_broker_store::StoreError;
use thiserror::Error;

/// Errors surfaced to the protocol layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error("instance already exists: {0}")]
    InstanceExists(String),

    #[error("binding not found: {0}")]
    BindingNotFound(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("retries exhausted: {0}")]
    RetriesExhausted(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("upstream error: {0}")]
    Upstream(#[from] StoreError),
}

impl From<CoreError> for BrokerError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidPlan(msg) => BrokerError::InvalidPlan(msg),
            CoreError::InvalidParameter(msg) => BrokerError::InvalidParameter(msg),
        }
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;
