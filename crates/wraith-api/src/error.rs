//! HTTP-facing error umbrella (§7). Every error the middleware stack or a
//! route handler can produce is rendered into the one JSON shape the
//! specification guarantees: `{status, message, startTimestamp,
//! endTimestamp, version}` with millisecond Unix timestamps (§6).
//!
//! Grounded on the teacher lineage's `riptide-api::errors::ApiError`: a
//! `thiserror`-derived taxonomy with constructor helpers, a `status_code()`
//! method, an `is_retryable()` method, and an `IntoResponse` impl that logs
//! at a severity matched to the HTTP status before serializing.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The middleware stack's matchable error taxonomy (§7). Route-handler
/// errors from the out-of-scope command-dispatch layer are expected to
/// convert into one of these variants at the boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing or invalid API key")]
    Unauthorized,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("request timed out")]
    Timeout,

    #[error("internal server error")]
    Internal(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// A handler panicked; recovered by the Recovery middleware (§4.5).
    #[error("internal server error")]
    PanicRecovered,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) | ApiError::PanicRecovered => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Timeout | ApiError::RateLimited)
    }

    fn message(&self) -> String {
        match self {
            ApiError::Internal(msg) => msg.clone(),
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::NotFound(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

/// The one error body shape every failure path in this service produces
/// (§6 HTTP surface).
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub message: String,
    #[serde(rename = "startTimestamp")]
    pub start_timestamp: i64,
    #[serde(rename = "endTimestamp")]
    pub end_timestamp: i64,
    pub version: String,
}

impl ErrorBody {
    /// `start` and `end` are millisecond Unix timestamps bracketing however
    /// much of the request this error had visibility into; callers without
    /// a meaningful start (e.g. middleware rejecting before a handler ever
    /// ran) pass the same instant for both.
    pub fn new(message: impl Into<String>, start_timestamp_ms: i64, end_timestamp_ms: i64) -> Self {
        Self {
            status: "error",
            message: message.into(),
            start_timestamp: start_timestamp_ms,
            end_timestamp: end_timestamp_ms,
            version: VERSION.to_string(),
        }
    }

    pub fn now(message: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self::new(message, now, now)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.message();

        match status {
            StatusCode::INTERNAL_SERVER_ERROR | StatusCode::GATEWAY_TIMEOUT => {
                tracing::error!(status = status.as_u16(), message = %message, "request failed");
            }
            StatusCode::UNAUTHORIZED | StatusCode::TOO_MANY_REQUESTS | StatusCode::BAD_REQUEST => {
                tracing::warn!(status = status.as_u16(), message = %message, "request rejected");
            }
            _ => {
                tracing::info!(status = status.as_u16(), message = %message, "request error");
            }
        }

        (status, Json(ErrorBody::now(message))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<wraith_pool::PoolError> for ApiError {
    fn from(err: wraith_pool::PoolError) -> Self {
        match err {
            wraith_pool::PoolError::Timeout => ApiError::Timeout,
            wraith_pool::PoolError::ContextCanceled => ApiError::Timeout,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<wraith_sessions::SessionError> for ApiError {
    fn from(err: wraith_sessions::SessionError) -> Self {
        match err {
            wraith_sessions::SessionError::NotFound => ApiError::NotFound("session not found".into()),
            wraith_sessions::SessionError::AlreadyExists => {
                ApiError::BadRequest("session already exists".into())
            }
            wraith_sessions::SessionError::TooMany => {
                ApiError::BadRequest("too many sessions".into())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}
