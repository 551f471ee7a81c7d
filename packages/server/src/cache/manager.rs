//! Multi-key SWR cache manager (C7): a `DashMap` of [`CacheEntry`] slots
//! keyed by fingerprint, orchestrating get/set/get-with-stale-while-revalidate.
//!
//! One slot per fingerprint rather than a single shared slot, since this
//! cache fronts many distinct read queries (navigation, category pages,
//! product listings) instead of one long-lived resource.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value as Json;

use crawler::CrawlerError;

use super::entry::CacheEntry;
use super::state::{CachePayload, Freshness};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A reusable, type-erased fetcher: consults C1 (or whatever backs a given
/// cache key) and produces the opaque payload to store.
pub type Fetcher = Arc<dyn Fn() -> BoxFuture<Result<Json, CrawlerError>> + Send + Sync>;

/// A reusable, type-erased background revalidation trigger: in practice
/// the revalidation bridge's (C8) `revalidate` method, bound to a key.
pub type RevalTrigger = Arc<dyn Fn(String) -> BoxFuture<()> + Send + Sync>;

/// Result of [`CacheManager::get_with_swr`].
#[derive(Debug, Clone)]
pub struct CacheOutcome {
    pub data: Json,
    pub cached: bool,
    pub stale: bool,
}

/// `Cache-Control` value for a freshly written entry: the serve-stale
/// window is exactly as wide as the fresh window, so downstream edge
/// caches should hold the entry for `2 * ttl`.
pub fn cache_control_header(ttl: Duration) -> String {
    format!("public, max-age={}", ttl.as_secs() * 2)
}

#[derive(Default)]
pub struct CacheManager {
    entries: DashMap<String, CacheEntry>,
}

impl CacheManager {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    fn entry(&self, key: &str) -> CacheEntry {
        self.entries.entry(key.to_string()).or_default().clone()
    }

    /// Plain get: fresh and stale hits are returned; an expired entry is
    /// deleted lazily and reported as a miss.
    pub async fn get(&self, key: &str) -> Option<Json> {
        let entry = self.entry(key);
        match entry.snapshot(Instant::now()).await {
            Some((payload, Freshness::Expired)) => {
                entry.clear().await;
                let _ = payload;
                None
            }
            Some((payload, _)) => Some(payload.data),
            None => None,
        }
    }

    /// Plain set. Returns the `Cache-Control` value callers
    /// should attach to the HTTP response so a downstream edge cache
    /// serves within the same SWR window.
    pub async fn set(&self, key: &str, data: Json, ttl: Duration) -> String {
        self.entry(key).set(CachePayload::new(data, ttl)).await;
        cache_control_header(ttl)
    }

    /// Delete a single key outright. See [`Self::invalidate_prefix`] for why
    /// prefix invalidation is advisory only.
    pub async fn delete(&self, key: &str) {
        if let Some(entry) = self.entries.get(key) {
            entry.clear().await;
        }
    }

    /// Advisory prefix invalidation: the backing map has no ordered
    /// iteration by fingerprint prefix without a full scan, so this does
    /// not delete anything directly. Entries still roll off naturally via
    /// `hard_expires_at`; this just surfaces the request for observability
    /// rather than silently doing nothing.
    pub fn invalidate_prefix(&self, prefix: &str) {
        tracing::info!(prefix, "prefix invalidation requested; relying on hard-expiry roll-off");
    }

    /// Get a key with stale-while-revalidate semantics.
    ///
    /// - Miss or expired: run `fetch` inline, store the result, return
    ///   `{cached: false, stale: false}`.
    /// - Fresh hit: return `{cached: true, stale: false}`, no background work.
    /// - Stale hit: return `{cached: true, stale: true}` immediately, and
    ///   kick off exactly one background revalidation per key per
    ///   stale-window (the single-flight guard on [`CacheEntry`] does the
    ///   dedup). When `reval_trigger` is given it is invoked instead of
    ///   re-running `fetch` directly, in practice the revalidation bridge
    ///   posting a scrape job rather than refetching from the repository
    ///   synchronously.
    pub async fn get_with_swr(
        &self,
        key: &str,
        ttl: Duration,
        fetch: Fetcher,
        reval_trigger: Option<RevalTrigger>,
    ) -> Result<CacheOutcome, CrawlerError> {
        let entry = self.entry(key);

        match entry.snapshot(Instant::now()).await {
            Some((payload, Freshness::Fresh)) => {
                Ok(CacheOutcome { data: payload.data, cached: true, stale: false })
            }
            Some((payload, Freshness::Stale)) => {
                self.spawn_revalidation(key, entry, ttl, fetch, reval_trigger);
                Ok(CacheOutcome { data: payload.data, cached: true, stale: true })
            }
            Some((_, Freshness::Expired)) | None => {
                entry.clear().await;
                let data = fetch().await?;
                entry.set(CachePayload::new(data.clone(), ttl)).await;
                Ok(CacheOutcome { data, cached: false, stale: false })
            }
        }
    }

    fn spawn_revalidation(
        &self,
        key: &str,
        entry: CacheEntry,
        ttl: Duration,
        fetch: Fetcher,
        reval_trigger: Option<RevalTrigger>,
    ) {
        let Some(guard) = entry.try_begin_refresh() else {
            // Another task is already revalidating this key this window.
            return;
        };
        let key = key.to_string();

        tokio::spawn(async move {
            let _guard = guard;
            match reval_trigger {
                Some(trigger) => trigger(key).await,
                None => match fetch().await {
                    Ok(data) => entry.set(CachePayload::new(data, ttl)).await,
                    Err(e) => {
                        tracing::warn!(key, error = %e, "background revalidation fetch failed");
                    }
                },
            }
        });
    }
}
