//! A single cache slot: current state plus the single-flight lock used to
//! deduplicate concurrent refreshes of the same key.
//!
//! The state lives behind an `RwLock` so reads never block on each other,
//! and a separate `Mutex<()>` single-flight guard ensures only one
//! in-flight revalidation runs per key even under a burst of stale reads.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, RwLock};

use super::state::{CachePayload, CacheState, Freshness};

#[derive(Clone)]
pub struct CacheEntry {
    state: Arc<RwLock<CacheState>>,
    /// Held for the duration of a revalidation so concurrent stale hits on
    /// the same key trigger at most one background refresh per window.
    single_flight: Arc<Mutex<()>>,
}

impl Default for CacheEntry {
    fn default() -> Self {
        Self {
            state: Arc::new(RwLock::new(CacheState::Empty)),
            single_flight: Arc::new(Mutex::new(())),
        }
    }
}

impl CacheEntry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self, now: Instant) -> Option<(CachePayload, Freshness)> {
        match &*self.state.read().await {
            CacheState::Ready(payload) => Some((payload.clone(), payload.freshness(now))),
            CacheState::Empty => None,
        }
    }

    pub async fn set(&self, payload: CachePayload) {
        *self.state.write().await = CacheState::Ready(payload);
    }

    pub async fn clear(&self) {
        *self.state.write().await = CacheState::Empty;
    }

    /// Try to acquire the single-flight guard without blocking. `Some` means
    /// the caller is now responsible for running (and releasing) the
    /// refresh; `None` means another task already holds it.
    pub fn try_begin_refresh(&self) -> Option<tokio::sync::OwnedMutexGuard<()>> {
        self.single_flight.clone().try_lock_owned().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value as Json;
    use std::time::Duration;

    #[tokio::test]
    async fn starts_empty_and_reports_no_snapshot() {
        let entry = CacheEntry::new();
        assert!(entry.snapshot(Instant::now()).await.is_none());
    }

    #[tokio::test]
    async fn set_then_snapshot_reports_fresh() {
        let entry = CacheEntry::new();
        entry.set(CachePayload::new(Json::Bool(true), Duration::from_secs(60))).await;
        let (_, freshness) = entry.snapshot(Instant::now()).await.unwrap();
        assert_eq!(freshness, Freshness::Fresh);
    }

    #[test]
    fn single_flight_guard_is_exclusive() {
        let entry = CacheEntry::new();
        let first = entry.try_begin_refresh();
        assert!(first.is_some());
        let second = entry.try_begin_refresh();
        assert!(second.is_none());
        drop(first);
        assert!(entry.try_begin_refresh().is_some());
    }
}
