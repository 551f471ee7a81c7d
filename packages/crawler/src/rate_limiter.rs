//! Domain-keyed rate limiter (C3): a dual sliding-window limiter (per
//! minute, per hour) keyed by request domain.
//!
//! `governor`'s single-window token bucket doesn't model two independent
//! windows over one key, so this is hand-rolled: a sliding window is kept
//! as a deque of request timestamps per key, trimmed lazily on each
//! `acquire`. State lives in a [`DashMap`] keyed by domain so concurrent
//! workers never contend on a single global lock.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

/// Outcome of a rate-limit check: allow, or deny with a suggested retry
/// delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateLimitDecision {
    Allow,
    Deny { retry_after: Duration },
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn acquire(&self, key: &str) -> RateLimitDecision;

    /// The pruned `(minute, hour)` counts currently recorded for `key`,
    /// without recording a new request.
    async fn usage(&self, key: &str) -> (usize, usize);
}

struct Window {
    timestamps: VecDeque<Instant>,
}

impl Window {
    fn new() -> Self {
        Self {
            timestamps: VecDeque::new(),
        }
    }

    /// Drop timestamps older than `horizon` and report the count remaining.
    fn prune(&mut self, now: Instant, horizon: Duration) -> usize {
        while let Some(&front) = self.timestamps.front() {
            if now.duration_since(front) > horizon {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
        self.timestamps.len()
    }
}

struct KeyState {
    minute: Mutex<Window>,
    hour: Mutex<Window>,
}

/// Sliding-window limiter over a per-minute and a per-hour cap, both of
/// which must have headroom for a request to be allowed. Limits are per
/// domain key (e.g. `"www.example.com"`).
pub struct SlidingWindowRateLimiter {
    per_minute: usize,
    per_hour: usize,
    keys: DashMap<String, KeyState>,
}

impl SlidingWindowRateLimiter {
    pub fn new(per_minute: usize, per_hour: usize) -> Self {
        Self {
            per_minute,
            per_hour,
            keys: DashMap::new(),
        }
    }

    fn retry_after_for(window: &mut Window, now: Instant, horizon: Duration) -> Duration {
        match window.timestamps.front() {
            Some(&oldest) => horizon.saturating_sub(now.duration_since(oldest)),
            None => Duration::ZERO,
        }
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowRateLimiter {
    async fn acquire(&self, key: &str) -> RateLimitDecision {
        let now = Instant::now();
        let entry = self
            .keys
            .entry(key.to_string())
            .or_insert_with(|| KeyState {
                minute: Mutex::new(Window::new()),
                hour: Mutex::new(Window::new()),
            });

        let minute_horizon = Duration::from_secs(60);
        let hour_horizon = Duration::from_secs(3600);

        let mut minute = entry.minute.lock().expect("rate limiter mutex poisoned");
        let minute_count = minute.prune(now, minute_horizon);
        if minute_count >= self.per_minute {
            let retry_after = Self::retry_after_for(&mut minute, now, minute_horizon);
            return RateLimitDecision::Deny { retry_after };
        }
        drop(minute);

        let mut hour = entry.hour.lock().expect("rate limiter mutex poisoned");
        let hour_count = hour.prune(now, hour_horizon);
        if hour_count >= self.per_hour {
            let retry_after = Self::retry_after_for(&mut hour, now, hour_horizon);
            return RateLimitDecision::Deny { retry_after };
        }
        hour.timestamps.push_back(now);
        drop(hour);

        entry.minute.lock().expect("rate limiter mutex poisoned").timestamps.push_back(now);

        RateLimitDecision::Allow
    }

    /// `Usage(key)`: the two pruned window counts, per §4.3. Returns
    /// `(0, 0)` for a key that has never been touched rather than
    /// inserting an empty entry for it.
    async fn usage(&self, key: &str) -> (usize, usize) {
        let now = Instant::now();
        let Some(entry) = self.keys.get(key) else {
            return (0, 0);
        };

        let minute_count = entry
            .minute
            .lock()
            .expect("rate limiter mutex poisoned")
            .prune(now, Duration::from_secs(60));
        let hour_count = entry
            .hour
            .lock()
            .expect("rate limiter mutex poisoned")
            .prune(now, Duration::from_secs(3600));
        (minute_count, hour_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_requests_under_both_caps() {
        let limiter = SlidingWindowRateLimiter::new(5, 100);
        for _ in 0..5 {
            assert_eq!(limiter.acquire("example.com").await, RateLimitDecision::Allow);
        }
    }

    #[tokio::test]
    async fn denies_once_minute_cap_is_reached() {
        let limiter = SlidingWindowRateLimiter::new(2, 100);
        assert_eq!(limiter.acquire("example.com").await, RateLimitDecision::Allow);
        assert_eq!(limiter.acquire("example.com").await, RateLimitDecision::Allow);
        match limiter.acquire("example.com").await {
            RateLimitDecision::Deny { retry_after } => assert!(retry_after <= Duration::from_secs(60)),
            RateLimitDecision::Allow => panic!("expected deny after exceeding per-minute cap"),
        }
    }

    #[tokio::test]
    async fn denies_once_hour_cap_is_reached_even_under_minute_cap() {
        let limiter = SlidingWindowRateLimiter::new(100, 1);
        assert_eq!(limiter.acquire("example.com").await, RateLimitDecision::Allow);
        match limiter.acquire("example.com").await {
            RateLimitDecision::Deny { .. } => {}
            RateLimitDecision::Allow => panic!("expected deny after exceeding per-hour cap"),
        }
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = SlidingWindowRateLimiter::new(1, 100);
        assert_eq!(limiter.acquire("a.com").await, RateLimitDecision::Allow);
        assert_eq!(limiter.acquire("b.com").await, RateLimitDecision::Allow);
    }

    #[tokio::test]
    async fn usage_reports_recorded_counts_without_recording() {
        let limiter = SlidingWindowRateLimiter::new(5, 100);
        assert_eq!(limiter.usage("example.com").await, (0, 0));

        limiter.acquire("example.com").await;
        limiter.acquire("example.com").await;

        assert_eq!(limiter.usage("example.com").await, (2, 2));
        // Usage itself must not record a request.
        assert_eq!(limiter.usage("example.com").await, (2, 2));
    }
}
