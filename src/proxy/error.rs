//! Client-facing dispatch errors.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Why a request could not be answered by its backend.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("backend '{0}' is not registered")]
    BackendNotFound(String),

    /// Rejected by the breaker without a network call.
    #[error("circuit breaker for '{0}' is open")]
    CircuitOpen(String),

    #[error("backend '{service}' did not answer within {timeout:?}")]
    UpstreamTimeout { service: String, timeout: Duration },

    #[error("backend '{service}' is unreachable: {reason}")]
    UpstreamUnreachable { service: String, reason: String },

    #[error("forward call to '{0}' panicked")]
    UpstreamPanicked(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Retry backoff interrupted by gateway shutdown.
    #[error("request to '{0}' cancelled by shutdown")]
    Cancelled(String),
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::BackendNotFound(_) => StatusCode::NOT_FOUND,
            DispatchError::CircuitOpen(_) | DispatchError::Cancelled(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            DispatchError::UpstreamTimeout { .. }
            | DispatchError::UpstreamUnreachable { .. }
            | DispatchError::UpstreamPanicked(_) => StatusCode::BAD_GATEWAY,
            DispatchError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Backend the error refers to, if any.
    pub fn service(&self) -> Option<&str> {
        match self {
            DispatchError::BackendNotFound(service)
            | DispatchError::CircuitOpen(service)
            | DispatchError::UpstreamPanicked(service)
            | DispatchError::Cancelled(service)
            | DispatchError::UpstreamTimeout { service, .. }
            | DispatchError::UpstreamUnreachable { service, .. } => Some(service),
            DispatchError::InvalidRequest(_) => None,
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            DispatchError::BackendNotFound(service) => {
                json!({ "error": "Service not found", "service": service })
            }
            DispatchError::CircuitOpen(service) | DispatchError::Cancelled(service) => {
                json!({ "error": "Service temporarily unavailable", "service": service })
            }
            DispatchError::UpstreamTimeout { service, .. }
            | DispatchError::UpstreamUnreachable { service, .. }
            | DispatchError::UpstreamPanicked(service) => {
                json!({ "error": "Bad gateway", "service": service })
            }
            DispatchError::InvalidRequest(reason) => {
                json!({ "error": "Bad request", "details": reason })
            }
        };
        (status, Json(body)).into_response()
    }
}
