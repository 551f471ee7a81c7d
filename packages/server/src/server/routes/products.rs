//! `GET /products` and `GET /products/:id`.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Extension, Path, Query};
use axum::response::Response;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crawler::SortOrder;

use crate::cache::{cache_control_header, fingerprint, Fetcher};
use crate::error::ApiError;
use crate::server::app::AppState;
use crate::server::envelope::success;
use crate::server::routes::{validate_limit, validate_offset};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListProductsQuery {
    pub category_id: Option<Uuid>,
    pub sort: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_products(
    Extension(state): Extension<AppState>,
    Query(params): Query<ListProductsQuery>,
) -> Result<Response, ApiError> {
    let limit = validate_limit(params.limit)?;
    let offset = validate_offset(params.offset)?;
    let category_id = params.category_id;

    let sort = match params.sort.as_deref() {
        None => SortOrder::CreatedAtDesc,
        Some(raw) => SortOrder::parse(raw)
            .ok_or_else(|| ApiError::Validation(format!("unknown sort value: {raw:?}")))?,
    };

    let key = fingerprint(
        "products",
        &[
            ("categoryId", category_id.map(|id| id.to_string())),
            ("sort", params.sort.clone()),
            ("limit", Some(limit.to_string())),
            ("offset", Some(offset.to_string())),
        ],
    );
    let ttl = Duration::from_secs(state.config.cache_ttl_products_secs);

    let repository = state.repository.clone();
    let fetch: Fetcher = Arc::new(move || {
        let repository = repository.clone();
        Box::pin(async move {
            let page = repository
                .list_products(category_id, sort, false, limit, offset)
                .await?;
            Ok(json!({ "items": page.items, "total": page.total }))
        })
    });

    let outcome = state
        .cache
        .get_with_swr(&key, ttl, fetch, Some(state.bridge.as_trigger()))
        .await?;

    Ok(success(outcome.data, outcome.cached, outcome.stale, &cache_control_header(ttl)))
}

pub async fn get_product(
    Extension(state): Extension<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let key = fingerprint("product_detail", &[("id", Some(id.to_string()))]);
    let ttl = Duration::from_secs(state.config.cache_ttl_product_detail_secs);

    let repository = state.repository.clone();
    let fetch: Fetcher = Arc::new(move || {
        let repository = repository.clone();
        Box::pin(async move {
            let product = repository.get_product_by_id(id).await?;
            Ok(serde_json::to_value(product).expect("Product always serializes"))
        })
    });

    let outcome = state
        .cache
        .get_with_swr(&key, ttl, fetch, Some(state.bridge.as_trigger()))
        .await?;

    Ok(success(outcome.data, outcome.cached, outcome.stale, &cache_control_header(ttl)))
}
