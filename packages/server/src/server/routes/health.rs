use std::collections::BTreeMap;

use axum::extract::Extension;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::server::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    services: BTreeMap<String, String>,
}

/// `{status, services}`. `services` is a simple name-to-status map;
/// the only service check that can actually fail on this process is the
/// database ping. The cache and job queue are process-local and in-process
/// respectively, so their presence is reported rather than probed.
pub async fn health_handler(Extension(state): Extension<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let db_ok = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        sqlx::query("SELECT 1").execute(&state.db_pool),
    )
    .await
    .map(|r| r.is_ok())
    .unwrap_or(false);

    let mut services = BTreeMap::new();
    services.insert("database".to_string(), if db_ok { "ok" } else { "error" }.to_string());
    services.insert("cache".to_string(), "ok".to_string());
    services.insert("job_queue".to_string(), "ok".to_string());

    let status_code = if db_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        status_code,
        Json(HealthResponse {
            status: if db_ok { "healthy" } else { "unhealthy" }.to_string(),
            services,
        }),
    )
}
