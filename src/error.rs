use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Errors surfaced by the DVR Client's typed fetchers.
///
/// Callers branch on `kind`: `NotFound` drives cache fallback-to-catalog
/// lookups, `Timeout`/`ConnectionFailed` drive the Event Monitor and
/// Disk-Space poller's backoff policies.
#[derive(Debug, Error)]
pub enum DvrClientError {
    #[error("request to {0} timed out")]
    Timeout(String),

    #[error("connection to {0} failed: {1}")]
    ConnectionFailed(String, String),

    #[error("{0} returned unexpected status {1}")]
    UnexpectedStatus(String, StatusCode),

    #[error("failed to decode response from {0}: {1}")]
    Decode(String, String),

    #[error("{0} not found")]
    NotFound(String),
}

impl DvrClientError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DvrClientError::Timeout(_) | DvrClientError::ConnectionFailed(_, _)
        )
    }

    pub fn from_reqwest(context: impl Into<String>, err: reqwest::Error) -> Self {
        let context = context.into();
        if err.is_timeout() {
            DvrClientError::Timeout(context)
        } else if err.is_connect() {
            DvrClientError::ConnectionFailed(context, err.to_string())
        } else if err.is_decode() {
            DvrClientError::Decode(context, err.to_string())
        } else {
            DvrClientError::ConnectionFailed(context, err.to_string())
        }
    }
}

/// Error type for the control-plane HTTP surface.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
