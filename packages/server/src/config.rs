use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables, per the
/// recognized-keys table in the configuration design. Required keys fail
/// fast at boot; everything else falls back to a documented default.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,

    pub blob_root: String,
    pub blob_public_base_url: String,

    pub worker_secret: String,
    pub worker_host: String,

    /// The crawl target's root URL, used by the revalidation bridge to
    /// resolve the `navigation` job spec's `target_url` and the relative
    /// paths the other job specs need; the bridge cannot map a `navigation`
    /// cache key to an absolute URL without it.
    pub site_root_url: String,

    /// Maximum hops from a navigation node to its root before the tree
    /// builder stops descending (default 6). The crawler itself relies on
    /// the acyclic invariant rather than enforcing this; the read API
    /// applies it defensively when materializing the response tree.
    pub navigation_max_depth: u32,

    pub cache_ttl_navigation_secs: u64,
    pub cache_ttl_categories_secs: u64,
    pub cache_ttl_products_secs: u64,
    pub cache_ttl_product_detail_secs: u64,

    pub revalidation_enabled: bool,
    pub revalidation_rate_limit_per_minute: usize,
    pub revalidation_rate_limit_per_hour: usize,

    pub api_rate_limit_per_minute: usize,

    pub worker_pool_size: usize,
    pub job_lease_ttl_ms: u64,
    pub job_poll_interval_ms: u64,
    pub job_max_attempts: i32,

    pub image_max_bytes: u64,
    pub image_fetch_timeout_ms: u64,

    pub signature_skew_ms: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DB_URL").context("DB_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,

            blob_root: env::var("BLOB_ROOT").unwrap_or_else(|_| "./data/blobs".to_string()),
            blob_public_base_url: env::var("BLOB_PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080/images".to_string()),

            worker_secret: env::var("WORKER_SECRET").context("WORKER_SECRET must be set")?,
            worker_host: env::var("WORKER_HOST")
                .unwrap_or_else(|_| "http://localhost:8081".to_string()),

            site_root_url: env::var("SITE_ROOT_URL")
                .unwrap_or_else(|_| "https://shop.example.com/".to_string()),
            navigation_max_depth: parse_env_or("NAVIGATION_MAX_DEPTH", 6)?,

            cache_ttl_navigation_secs: parse_env_or("CACHE_TTL_NAVIGATION", 3600)?,
            cache_ttl_categories_secs: parse_env_or("CACHE_TTL_CATEGORIES", 1800)?,
            cache_ttl_products_secs: parse_env_or("CACHE_TTL_PRODUCTS", 300)?,
            cache_ttl_product_detail_secs: parse_env_or("CACHE_TTL_PRODUCT_DETAIL", 120)?,

            revalidation_enabled: env::var("REVALIDATION_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            revalidation_rate_limit_per_minute: parse_env_or("REVALIDATION_RATE_LIMIT_PER_MINUTE", 10)?,
            revalidation_rate_limit_per_hour: parse_env_or("REVALIDATION_RATE_LIMIT_PER_HOUR", 100)?,

            api_rate_limit_per_minute: parse_env_or("RATE_LIMIT_REQUESTS_PER_MINUTE", 100)?,

            worker_pool_size: parse_env_or("WORKER_POOL_SIZE", 4)?,
            job_lease_ttl_ms: parse_env_or("JOB_LEASE_TTL_MS", 600_000)?,
            job_poll_interval_ms: parse_env_or("JOB_POLL_INTERVAL_MS", 100)?,
            job_max_attempts: parse_env_or("JOB_MAX_ATTEMPTS", 3)?,

            image_max_bytes: parse_env_or("IMAGE_MAX_BYTES", 10 * 1024 * 1024)?,
            image_fetch_timeout_ms: parse_env_or("IMAGE_FETCH_TIMEOUT_MS", 15_000)?,

            signature_skew_ms: parse_env_or("SIGNATURE_SKEW_MS", 300_000)?,
        })
    }
}

fn parse_env_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} must be a valid value: {e}")),
        Err(_) => Ok(default),
    }
}
