//! `X-Broker-API-Version` enforcement.

use axum::extract::Request;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;

pub const API_VERSION_HEADER: &str = "x-broker-api-version";
/// Major protocol version this broker speaks.
pub const SUPPORTED_MAJOR: u32 = 2;

/// Major version from a `major.minor` header value.
pub fn parse_major(value: &str) -> Option<u32> {
    let (major, minor) = value.trim().split_once('.')?;
    minor.parse::<u32>().ok()?;
    major.parse().ok()
}

fn check(headers: &HeaderMap) -> Result<(), ApiError> {
    let precondition = |msg: String| ApiError::new(StatusCode::PRECONDITION_FAILED, "PreconditionFailed", msg);

    let value = headers
        .get(API_VERSION_HEADER)
        .ok_or_else(|| precondition("missing X-Broker-API-Version header".to_string()))?
        .to_str()
        .map_err(|_| precondition("X-Broker-API-Version header is not valid text".to_string()))?;

    match parse_major(value) {
        Some(SUPPORTED_MAJOR) => Ok(()),
        _ => Err(precondition(format!(
            "unsupported X-Broker-API-Version {value:?}, expected {SUPPORTED_MAJOR}.x"
        ))),
    }
}

/// Reject requests without a supported protocol version with 412.
pub async fn require_api_version(req: Request, next: Next) -> Response {
    match check(req.headers()) {
        Ok(()) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}
