//! `GET /categories` and `GET /categories/:id`.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Extension, Path, Query};
use axum::response::Response;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::cache::{cache_control_header, fingerprint, Fetcher};
use crate::error::ApiError;
use crate::server::app::AppState;
use crate::server::envelope::success;
use crate::server::routes::{validate_limit, validate_offset};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListCategoriesQuery {
    pub nav_id: Option<Uuid>,
    pub parent_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_categories(
    Extension(state): Extension<AppState>,
    Query(params): Query<ListCategoriesQuery>,
) -> Result<Response, ApiError> {
    let limit = validate_limit(params.limit)?;
    let offset = validate_offset(params.offset)?;
    let nav_id = params.nav_id;
    let parent_id = params.parent_id;

    let key = fingerprint(
        "categories",
        &[
            ("navId", nav_id.map(|id| id.to_string())),
            ("parentId", parent_id.map(|id| id.to_string())),
            ("limit", Some(limit.to_string())),
            ("offset", Some(offset.to_string())),
        ],
    );
    let ttl = Duration::from_secs(state.config.cache_ttl_categories_secs);

    let repository = state.repository.clone();
    let fetch: Fetcher = Arc::new(move || {
        let repository = repository.clone();
        Box::pin(async move {
            let page = repository.list_categories(nav_id, parent_id, limit, offset).await?;
            Ok(json!({ "items": page.items, "total": page.total }))
        })
    });

    let outcome = state
        .cache
        .get_with_swr(&key, ttl, fetch, Some(state.bridge.as_trigger()))
        .await?;

    Ok(success(outcome.data, outcome.cached, outcome.stale, &cache_control_header(ttl)))
}

pub async fn get_category(
    Extension(state): Extension<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let key = fingerprint("category_detail", &[("id", Some(id.to_string()))]);
    let ttl = Duration::from_secs(state.config.cache_ttl_categories_secs);

    let repository = state.repository.clone();
    let fetch: Fetcher = Arc::new(move || {
        let repository = repository.clone();
        Box::pin(async move {
            let category = repository.get_category_by_id(id).await?;
            Ok(serde_json::to_value(category).expect("Category always serializes"))
        })
    });

    let outcome = state.cache.get_with_swr(&key, ttl, fetch, None).await?;

    Ok(success(outcome.data, outcome.cached, outcome.stale, &cache_control_header(ttl)))
}
