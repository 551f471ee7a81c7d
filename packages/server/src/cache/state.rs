//! Cache entry payload and freshness state machine.
//!
//! The payload carries the opaque bytes plus their timing metadata; a small
//! enum classifies a payload against `now` without mutating anything, so
//! freshness checks stay side-effect free on the read path.

use std::time::{Duration, Instant};

use serde_json::Value as Json;

/// Where a [`CachePayload`] sits relative to `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Expired,
}

/// An opaque cached value plus the timing metadata needed to classify its
/// freshness. `hard_expires_at = stale_at + ttl`, i.e. the serve-stale
/// window is exactly as wide as the fresh window.
#[derive(Debug, Clone)]
pub struct CachePayload {
    pub data: Json,
    created_at: Instant,
    ttl: Duration,
}

impl CachePayload {
    pub fn new(data: Json, ttl: Duration) -> Self {
        Self {
            data,
            created_at: Instant::now(),
            ttl,
        }
    }

    pub fn stale_at(&self) -> Instant {
        self.created_at + self.ttl
    }

    pub fn hard_expires_at(&self) -> Instant {
        self.stale_at() + self.ttl
    }

    pub fn freshness(&self, now: Instant) -> Freshness {
        if now <= self.stale_at() {
            Freshness::Fresh
        } else if now <= self.hard_expires_at() {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }
}

/// Full state of a cache slot.
#[derive(Debug, Clone)]
pub enum CacheState {
    Empty,
    Ready(CachePayload),
}

impl Default for CacheState {
    fn default() -> Self {
        CacheState::Empty
    }
}
