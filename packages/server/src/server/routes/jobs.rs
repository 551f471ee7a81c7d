//! `POST /jobs`: signed job intake. The counterpart to
//! [`crate::bridge::RevalidationBridge::post_job`]: verification uses the
//! same canonical string and shared secret the bridge signed with.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Bytes;
use axum::extract::Extension;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crawler::{EnqueueResult, JobType};

use crate::bridge::join_path;
use crate::error::ApiError;
use crate::server::app::AppState;

#[derive(Debug, Deserialize)]
struct JobIntakeRequest {
    #[serde(rename = "type")]
    job_type: String,
    target_url: String,
    #[serde(default)]
    priority: i32,
    #[serde(default)]
    metadata: Value,
}

pub async fn intake(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let signature = header_str(&headers, "x-signature")?;
    let timestamp: i64 = header_str(&headers, "x-timestamp")?
        .parse()
        .map_err(|_| ApiError::Validation("X-Timestamp must be an integer".to_string()))?;
    let nonce = header_str(&headers, "x-nonce")?;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_millis() as i64;
    let url = join_path(&state.config.worker_host, "/jobs");

    state
        .signer
        .verify(
            "POST",
            &url,
            timestamp,
            nonce,
            &body,
            signature,
            now,
            state.config.signature_skew_ms,
        )
        .map_err(|_| ApiError::Unauthorized("invalid signature".to_string()))?;

    let payload: JobIntakeRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::Validation(format!("malformed job body: {e}")))?;
    let job_type = JobType::parse(&payload.job_type)
        .ok_or_else(|| ApiError::Validation(format!("unknown job type: {:?}", payload.job_type)))?;

    let result = state
        .job_queue
        .enqueue(
            job_type,
            &payload.target_url,
            payload.priority,
            payload.metadata,
            state.config.job_max_attempts,
        )
        .await?;

    let (job_id, message) = match result {
        EnqueueResult::Created(job) => (job.id, "job created"),
        EnqueueResult::Duplicate(job) => (job.id, "duplicate job, priority bumped"),
    };

    Ok(intake_response(job_id, message))
}

fn intake_response(job_id: Uuid, message: &str) -> Response {
    Json(json!({ "success": true, "jobId": job_id, "message": message })).into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, ApiError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Validation(format!("missing or invalid {name} header")))
}
