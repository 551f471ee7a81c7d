//! The single success envelope shape every read handler returns:
//! `{data, meta:{cached, stale, timestamp}}`. Errors go through
//! [`crate::error::ApiError`] instead; this module only ever produces 200s.

use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

/// Wrap `data` in the success envelope and attach the `Cache-Control` header
/// the cache manager computed for this entry's TTL.
pub fn success(data: Value, cached: bool, stale: bool, cache_control: &str) -> Response {
    let body = json!({
        "data": data,
        "meta": {
            "cached": cached,
            "stale": stale,
            "timestamp": chrono::Utc::now(),
        },
    });

    let mut response = Json(body).into_response();
    if let Ok(value) = axum::http::HeaderValue::from_str(cache_control) {
        response.headers_mut().insert(axum::http::header::CACHE_CONTROL, value);
    }
    response
}
