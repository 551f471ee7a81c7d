//! Single HTTP error boundary (C9): every typed error in the read path is
//! translated to the `{error, message, code, timestamp}` envelope exactly
//! once, here.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crawler::CrawlerError;

/// Mirrors the crawler's error taxonomy, minus `Fatal` (folded into
/// `Internal` at this boundary: callers never need to distinguish a logic
/// bug from an otherwise-uncategorized failure once it reaches a client).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("not found")]
    NotFound,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("internal error")]
    Internal(String),

    #[error("service degraded")]
    Degraded(String),
}

impl From<CrawlerError> for ApiError {
    fn from(e: CrawlerError) -> Self {
        match e {
            CrawlerError::Validation(msg) => ApiError::Validation(msg),
            CrawlerError::NotFound => ApiError::NotFound,
            CrawlerError::Database { .. } | CrawlerError::Transient(_) | CrawlerError::Fetch { .. } => {
                tracing::error!(error = %e, "transient failure surfaced to a read handler");
                ApiError::Internal(e.to_string())
            }
            CrawlerError::Fatal(msg) => {
                tracing::error!(error = %msg, "fatal error surfaced to a read handler");
                ApiError::Internal(msg)
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: &'static str,
    message: String,
    code: u16,
    timestamp: chrono::DateTime<Utc>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.clone()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not_found", self.to_string()),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg.clone()),
            ApiError::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                format!("rate limited, retry after {retry_after_secs}s"),
            ),
            ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "an internal error occurred".to_string(),
            ),
            ApiError::Degraded(msg) => (StatusCode::SERVICE_UNAVAILABLE, "degraded", msg.clone()),
        };

        let body = ErrorEnvelope {
            error,
            message,
            code: status.as_u16(),
            timestamp: Utc::now(),
        };

        let mut response = (status, Json(body)).into_response();
        if let ApiError::RateLimited { retry_after_secs } = self {
            if let Ok(value) = axum::http::HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}
