//! Broker errors as OSB error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use habitat_broker_lifecycle::BrokerError;
use habitat_broker_store::StoreError;
use serde::Serialize;
use tracing::{error, warn};

/// OSB error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub description: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, description: impl Into<String>) -> Self {
        Self {
            status,
            code,
            description: description.into(),
        }
    }

    pub fn bad_request(description: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BadRequest", description)
    }
}

impl From<BrokerError> for ApiError {
    fn from(e: BrokerError) -> Self {
        let description = e.to_string();
        let (status, code) = match &e {
            BrokerError::InvalidPlan(_) => (StatusCode::BAD_REQUEST, "InvalidPlan"),
            BrokerError::InvalidParameter(_) => (StatusCode::BAD_REQUEST, "InvalidParameter"),
            BrokerError::InstanceNotFound(_) => (StatusCode::NOT_FOUND, "InstanceNotFound"),
            BrokerError::InstanceExists(_) => (StatusCode::CONFLICT, "InstanceExists"),
            BrokerError::BindingNotFound(_) => (StatusCode::GONE, "BindingNotFound"),
            BrokerError::NotImplemented(_) => (StatusCode::NOT_IMPLEMENTED, "NotImplemented"),
            BrokerError::RetriesExhausted(_) => (StatusCode::GATEWAY_TIMEOUT, "RetriesExhausted"),
            BrokerError::Cancelled(_) => (StatusCode::SERVICE_UNAVAILABLE, "Cancelled"),
            BrokerError::Upstream(StoreError::AlreadyExists(_) | StoreError::Conflict(_)) => {
                (StatusCode::CONFLICT, "Conflict")
            }
            BrokerError::Upstream(StoreError::NotFound(_)) => (StatusCode::NOT_FOUND, "NotFound"),
            BrokerError::Upstream(_) => (StatusCode::INTERNAL_SERVER_ERROR, "UpstreamError"),
        };
        Self::new(status, code, description)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, code = self.code, description = %self.description, "request failed");
        } else {
            warn!(status = %self.status, code = self.code, description = %self.description, "request rejected");
        }
        (
            self.status,
            Json(ErrorBody {
                error: self.code.to_string(),
                description: self.description,
            }),
        )
            .into_response()
    }
}
