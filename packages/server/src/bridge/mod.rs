//! Revalidation bridge (C8): maps a cache fingerprint back to an
//! enqueueable job, rate-limits the trigger, signs the request, and POSTs
//! it to the worker host's job-intake endpoint.
//!
//! A failed trigger is logged and swallowed, never propagated. A
//! background revalidation attempt must not fail the foreground read that
//! triggered it.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use serde_json::json;

use crawler::rate_limiter::{RateLimitDecision, RateLimiter};
use crawler::Signer;

use crate::cache::{BoxFuture, RevalTrigger};
use crate::config::Config;

/// One shared rate-limit budget for all revalidation triggers, distinct
/// from the per-host budget C6 workers use when fetching target URLs.
const STALE_CACHE_RATE_LIMIT_KEY: &str = "stale-cache";

/// A job specification ready to enqueue, as translated from a cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
struct JobSpec {
    job_type: &'static str,
    target_url: String,
}

pub struct RevalidationBridge {
    config: Arc<Config>,
    rate_limiter: Arc<dyn RateLimiter>,
    signer: Signer,
    http: reqwest::Client,
}

impl RevalidationBridge {
    pub fn new(config: Arc<Config>, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        let signer = Signer::new(config.worker_secret.clone().into_bytes());
        Self {
            config,
            rate_limiter,
            signer,
            http: reqwest::Client::new(),
        }
    }

    /// Bind this bridge as a [`RevalTrigger`] closure the cache manager can
    /// invoke with just a key.
    pub fn as_trigger(self: &Arc<Self>) -> RevalTrigger {
        let bridge = self.clone();
        Arc::new(move |key: String| -> BoxFuture<()> {
            let bridge = bridge.clone();
            Box::pin(async move { bridge.revalidate(key).await })
        })
    }

    /// Translate `cache_key` into a job spec. `navigation` has no query
    /// params (see [`crate::cache::fingerprint`]),
    /// so it's matched by the bare prefix.
    fn map_key_to_job(&self, cache_key: &str) -> Option<JobSpec> {
        let (prefix, query) = match cache_key.split_once('?') {
            Some((prefix, query)) => (prefix, Some(query)),
            None => (cache_key, None),
        };

        match prefix {
            "navigation" => Some(JobSpec {
                job_type: "navigation",
                target_url: self.config.site_root_url.clone(),
            }),
            "categories" => {
                let nav_id = query_param(query?, "navId")?;
                Some(JobSpec {
                    job_type: "category",
                    target_url: join_path(&self.config.site_root_url, &format!("/category/{nav_id}")),
                })
            }
            "products" => {
                let category_id = query_param(query?, "categoryId")?;
                Some(JobSpec {
                    job_type: "product",
                    target_url: join_path(
                        &self.config.site_root_url,
                        &format!("/category/{category_id}/products"),
                    ),
                })
            }
            "product_detail" => {
                let id = query_param(query?, "id")?;
                Some(JobSpec {
                    job_type: "product",
                    target_url: join_path(&self.config.site_root_url, &format!("/product/{id}")),
                })
            }
            _ => None,
        }
    }

    /// Run the full trigger policy for a stale cache hit on `cache_key`:
    /// disabled config is a no-op, an unmappable key is logged and
    /// dropped, a rate-limit denial is recorded and dropped, and any HTTP
    /// failure is logged rather than propagated. This method never
    /// surfaces an error to its caller (the cache manager's background
    /// task).
    pub async fn revalidate(&self, cache_key: String) {
        if !self.config.revalidation_enabled {
            return;
        }

        let Some(spec) = self.map_key_to_job(&cache_key) else {
            tracing::info!(cache_key, "revalidation bridge: unmappable cache key, dropping");
            return;
        };

        match self.rate_limiter.acquire(STALE_CACHE_RATE_LIMIT_KEY).await {
            RateLimitDecision::Allow => {}
            RateLimitDecision::Deny { retry_after } => {
                tracing::info!(
                    cache_key,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "revalidation bridge: rate-limited, dropping"
                );
                return;
            }
        }

        if let Err(e) = self.post_job(&cache_key, spec).await {
            tracing::warn!(cache_key, error = %e, "revalidation bridge: failed to enqueue job");
        }
    }

    async fn post_job(&self, cache_key: &str, spec: JobSpec) -> Result<(), reqwest::Error> {
        let url = join_path(&self.config.worker_host, "/jobs");
        let body = json!({
            "type": spec.job_type,
            "target_url": spec.target_url,
            "priority": 3,
            "metadata": { "cache_key": cache_key, "revalidation_type": "stale" },
        });
        let body_bytes = serde_json::to_vec(&body).expect("job intake body is always serializable");

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is after the epoch")
            .as_millis() as i64;
        let nonce = random_nonce_hex();

        let signature = self
            .signer
            .sign("POST", &url, timestamp, &nonce, &body_bytes)
            .unwrap_or_default();

        self.http
            .post(&url)
            .header("X-Signature", signature)
            .header("X-Timestamp", timestamp.to_string())
            .header("X-Nonce", nonce)
            .header("Authorization", format!("Bearer {}", self.config.worker_secret))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body_bytes)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

fn random_nonce_hex() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub(crate) fn join_path(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

/// Pull one `name=value` pair out of a fingerprint's already-sorted,
/// URL-encoded query string.
fn query_param(query: &str, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawler::rate_limiter::SlidingWindowRateLimiter;

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            database_url: "postgres://localhost/test".into(),
            port: 8080,
            blob_root: "./data/blobs".into(),
            blob_public_base_url: "http://localhost:8080/images".into(),
            worker_secret: "top-secret".into(),
            worker_host: "http://worker.internal".into(),
            site_root_url: "https://shop.example.com".into(),
            navigation_max_depth: 6,
            cache_ttl_navigation_secs: 3600,
            cache_ttl_categories_secs: 1800,
            cache_ttl_products_secs: 300,
            cache_ttl_product_detail_secs: 120,
            revalidation_enabled: true,
            revalidation_rate_limit_per_minute: 10,
            revalidation_rate_limit_per_hour: 100,
            api_rate_limit_per_minute: 100,
            worker_pool_size: 4,
            job_lease_ttl_ms: 600_000,
            job_poll_interval_ms: 100,
            job_max_attempts: 3,
            image_max_bytes: 10 * 1024 * 1024,
            image_fetch_timeout_ms: 15_000,
            signature_skew_ms: 300_000,
        })
    }

    fn bridge() -> RevalidationBridge {
        let config = test_config();
        let rate_limiter = Arc::new(SlidingWindowRateLimiter::new(
            config.revalidation_rate_limit_per_minute,
            config.revalidation_rate_limit_per_hour,
        ));
        RevalidationBridge::new(config, rate_limiter)
    }

    #[test]
    fn maps_navigation_key_to_site_root() {
        let bridge = bridge();
        let spec = bridge.map_key_to_job("navigation").unwrap();
        assert_eq!(spec.job_type, "navigation");
        assert_eq!(spec.target_url, "https://shop.example.com");
    }

    #[test]
    fn maps_categories_key_with_nav_id() {
        let bridge = bridge();
        let spec = bridge.map_key_to_job("categories?navId=N1").unwrap();
        assert_eq!(spec.job_type, "category");
        assert_eq!(spec.target_url, "https://shop.example.com/category/N1");
    }

    #[test]
    fn maps_products_key_with_category_id() {
        let bridge = bridge();
        let spec = bridge.map_key_to_job("products?categoryId=C1").unwrap();
        assert_eq!(spec.job_type, "product");
        assert_eq!(spec.target_url, "https://shop.example.com/category/C1/products");
    }

    #[test]
    fn maps_product_detail_key_with_id() {
        let bridge = bridge();
        let spec = bridge.map_key_to_job("product_detail?id=P1").unwrap();
        assert_eq!(spec.job_type, "product");
        assert_eq!(spec.target_url, "https://shop.example.com/product/P1");
    }

    #[test]
    fn product_detail_without_id_is_unmappable() {
        let bridge = bridge();
        assert!(bridge.map_key_to_job("product_detail").is_none());
    }

    #[test]
    fn unknown_prefix_is_unmappable() {
        let bridge = bridge();
        assert!(bridge.map_key_to_job("unknown_resource").is_none());
    }

    #[tokio::test]
    async fn disabled_revalidation_is_a_silent_no_op() {
        let config = Arc::new(Config { revalidation_enabled: false, ..(*test_config()).clone() });
        let rate_limiter = Arc::new(SlidingWindowRateLimiter::new(10, 100));
        let bridge = RevalidationBridge::new(config, rate_limiter);
        // Should return without attempting any HTTP call (which would hang
        // or error against `worker.internal`, surfacing as a test failure
        // if the early-return path were broken).
        bridge.revalidate("navigation".to_string()).await;
    }
}
