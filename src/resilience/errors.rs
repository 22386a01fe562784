//! Error types for downstream calls.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Outcome of a single attempt against a downstream service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    /// Connection failures, 5xx, throttling. Worth another attempt.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The target understood the request and refused it.
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The request could not be built (bad URL, unserializable body).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("undecodable response: {0}")]
    Decode(String),
}

impl CallError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CallError::Transient(_) | CallError::Timeout(_))
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            408 | 429 | 500..=599 => CallError::Transient(format!("status {status}: {message}")),
            _ => CallError::Rejected { status, message },
        }
    }
}

/// Final outcome of a resilient call, after breaker and retries.
#[derive(Debug, Error)]
pub enum ResilienceError {
    #[error("circuit open for {target}; call not attempted")]
    BreakerOpen { target: String },

    #[error("{target} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        target: String,
        attempts: u32,
        last: CallError,
    },

    #[error("{target} timed out after {attempts} attempts")]
    Timeout { target: String, attempts: u32 },

    #[error("{target} refused the call: {source}")]
    NonRetryable {
        target: String,
        #[source]
        source: CallError,
    },
}

impl ResilienceError {
    pub fn kind(&self) -> &'static str {
        match self {
            ResilienceError::BreakerOpen { .. } => "breaker_open",
            ResilienceError::RetriesExhausted { .. } => "retries_exhausted",
            ResilienceError::Timeout { .. } => "timeout",
            ResilienceError::NonRetryable { .. } => "non_retryable",
        }
    }

    /// Breaker-open, exhaustion and timeouts mean the dependency is
    /// temporarily unavailable; a refused call is a bad gateway.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ResilienceError::BreakerOpen { .. }
            | ResilienceError::RetriesExhausted { .. }
            | ResilienceError::Timeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ResilienceError::NonRetryable { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ResilienceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
