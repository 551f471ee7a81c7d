//! Application assembly: [`AppState`] bundles every shared dependency a
//! handler needs; [`build_app`] wires them into a [`Router`] with the
//! ambient middleware stack (CORS, request tracing, body-size cap,
//! per-IP rate limiting).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Extension, State};
use axum::http::Method;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crawler::{
    JobQueue, PostgresJobQueue, PostgresRepository, RateLimitDecision, RateLimiter, Repository,
    Signer, SlidingWindowRateLimiter,
};

use crate::bridge::RevalidationBridge;
use crate::cache::CacheManager;
use crate::config::Config;
use crate::error::ApiError;
use crate::server::routes;

/// `POST` bodies (the signed job-intake endpoint) are capped at this many
/// bytes, returning 413 when exceeded.
const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub repository: Arc<dyn Repository>,
    pub job_queue: Arc<dyn JobQueue>,
    pub cache: Arc<CacheManager>,
    pub bridge: Arc<RevalidationBridge>,
    pub signer: Arc<Signer>,
    pub config: Arc<Config>,
}

pub fn build_app(pool: PgPool, config: Config) -> Router {
    let config = Arc::new(config);

    let repository: Arc<dyn Repository> = Arc::new(PostgresRepository::new(pool.clone()));
    let job_queue: Arc<dyn JobQueue> = Arc::new(
        PostgresJobQueue::new(pool.clone())
            .with_lease_duration((config.job_lease_ttl_ms / 1000).max(1) as i64),
    );
    let cache = Arc::new(CacheManager::new());
    let signer = Arc::new(Signer::new(config.worker_secret.clone().into_bytes()));

    let revalidation_rate_limiter: Arc<dyn RateLimiter> = Arc::new(SlidingWindowRateLimiter::new(
        config.revalidation_rate_limit_per_minute,
        config.revalidation_rate_limit_per_hour,
    ));
    let bridge = Arc::new(RevalidationBridge::new(config.clone(), revalidation_rate_limiter));

    let api_rate_limiter = Arc::new(SlidingWindowRateLimiter::new(
        config.api_rate_limit_per_minute,
        config.api_rate_limit_per_minute * 60,
    ));

    let state = AppState {
        db_pool: pool,
        repository,
        job_queue,
        cache,
        bridge,
        signer,
        config,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/navigation", get(routes::navigation::get_navigation))
        .route("/categories", get(routes::categories::list_categories))
        .route("/categories/:id", get(routes::categories::get_category))
        .route("/products", get(routes::products::list_products))
        .route("/products/:id", get(routes::products::get_product))
        .route("/jobs", post(routes::jobs::intake))
        .route("/health", get(routes::health::health_handler))
        .layer(middleware::from_fn_with_state(api_rate_limiter, rate_limit_middleware))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(Extension(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Per-IP API rate limiting, independent of the revalidation bridge's own
/// "stale-cache" budget.
async fn rate_limit_middleware(
    State(limiter): State<Arc<SlidingWindowRateLimiter>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let key = connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    match limiter.acquire(&key).await {
        RateLimitDecision::Allow => next.run(request).await,
        RateLimitDecision::Deny { retry_after } => ApiError::RateLimited {
            retry_after_secs: retry_after.as_secs().max(1),
        }
        .into_response(),
    }
}
