//! Per-key sliding-window rate limiting.
//!
//! Each key keeps the instants of its admitted calls inside the window.
//! Admission is fail-fast: a call over the limit is rejected immediately
//! and never queued.

use std::collections::VecDeque;
use std::sync::RwLock;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// Window length and admissions allowed within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub window: Duration,
    pub max_requests: u32,
}

impl RateLimit {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self { window, max_requests }
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed { remaining: u32 },
    Denied { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }
}

/// Admitted instants for one key, oldest first.
struct RateWindow {
    window: Duration,
    stamps: VecDeque<Instant>,
}

impl RateWindow {
    fn trim(&mut self, now: Instant) {
        while let Some(&oldest) = self.stamps.front() {
            if now.duration_since(oldest) >= self.window {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Sliding-window limiter with independent windows per key.
pub struct RateLimiter {
    windows: DashMap<String, RateWindow>,
    default_limit: RwLock<RateLimit>,
}

impl RateLimiter {
    pub fn new(default_limit: RateLimit) -> Self {
        Self {
            windows: DashMap::new(),
            default_limit: RwLock::new(default_limit),
        }
    }

    pub fn default_limit(&self) -> RateLimit {
        *self.default_limit.read().expect("rate limiter lock poisoned")
    }

    pub fn set_default_limit(&self, limit: RateLimit) {
        *self.default_limit.write().expect("rate limiter lock poisoned") = limit;
    }

    /// Admit `key` under the default limit.
    pub fn allow(&self, key: &str) -> bool {
        self.check(key, self.default_limit()).is_allowed()
    }

    /// Admissions left for `key` under the default limit. Does not consume.
    pub fn remaining(&self, key: &str) -> u32 {
        self.remaining_with(key, self.default_limit())
    }

    /// Admit `key` under `limit`, recording the call when allowed.
    pub fn check(&self, key: &str, limit: RateLimit) -> Admission {
        let now = Instant::now();
        let mut entry = self.windows.entry(key.to_string()).or_insert_with(|| RateWindow {
            window: limit.window,
            stamps: VecDeque::new(),
        });
        let window = entry.value_mut();
        window.window = limit.window;
        window.trim(now);

        let used = window.stamps.len() as u32;
        if used < limit.max_requests {
            window.stamps.push_back(now);
            Admission::Allowed {
                remaining: limit.max_requests - used - 1,
            }
        } else {
            let oldest = window.stamps.front().copied().unwrap_or(now);
            let retry_after = oldest
                .checked_add(limit.window)
                .map_or(limit.window, |reopens| reopens.saturating_duration_since(now));
            tracing::debug!(key = %key, retry_after = ?retry_after, "Rate limit exceeded");
            Admission::Denied { retry_after }
        }
    }

    /// Admissions left for `key` under `limit`. Does not consume.
    pub fn remaining_with(&self, key: &str, limit: RateLimit) -> u32 {
        let now = Instant::now();
        match self.windows.get_mut(key) {
            Some(mut entry) => {
                let window = entry.value_mut();
                window.trim(now);
                limit.max_requests.saturating_sub(window.stamps.len() as u32)
            }
            None => limit.max_requests,
        }
    }

    /// Drop windows with no admissions left inside them. Returns the number
    /// of keys removed.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            window.trim(now);
            !window.stamps.is_empty()
        });
        before.saturating_sub(self.windows.len())
    }

    /// Keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_rejects_over_limit_then_admits_after_window() {
        let limiter = RateLimiter::new(RateLimit::new(Duration::from_secs(10), 3));

        assert!(limiter.allow("search:user-1"));
        assert!(limiter.allow("search:user-1"));
        assert!(limiter.allow("search:user-1"));
        assert!(!limiter.allow("search:user-1"));

        tokio::time::advance(Duration::from_millis(9_999)).await;
        assert!(!limiter.allow("search:user-1"));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(limiter.allow("search:user-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let limiter = RateLimiter::new(RateLimit::new(Duration::from_secs(10), 2));

        assert!(limiter.allow("k"));
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));

        // First admission leaves the window; the second is still inside it.
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_isolated() {
        let limiter = RateLimiter::new(RateLimit::new(Duration::from_secs(60), 1));
        assert!(limiter.allow("generate:user-1"));
        assert!(!limiter.allow("generate:user-1"));
        assert!(limiter.allow("generate:user-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_limit_three_per_minute() {
        let limiter = RateLimiter::new(RateLimit::new(Duration::from_secs(60), 30));
        let limit = RateLimit::new(Duration::from_secs(60), 3);

        let results: Vec<Admission> = (0..4).map(|_| limiter.check("generate:user-1", limit)).collect();
        assert_eq!(results[0], Admission::Allowed { remaining: 2 });
        assert_eq!(results[1], Admission::Allowed { remaining: 1 });
        assert_eq!(results[2], Admission::Allowed { remaining: 0 });
        assert_eq!(results[3], Admission::Denied { retry_after: Duration::from_secs(60) });
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_tracks_oldest_admission() {
        let limiter = RateLimiter::new(RateLimit::new(Duration::from_secs(60), 1));
        assert!(limiter.allow("k"));
        tokio::time::advance(Duration::from_secs(45)).await;
        assert_eq!(
            limiter.check("k", limiter.default_limit()),
            Admission::Denied { retry_after: Duration::from_secs(15) }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_window_denies_without_overflow() {
        let forever = Duration::from_secs(u64::MAX);
        let limiter = RateLimiter::new(RateLimit::new(forever, 1));
        assert!(limiter.allow("create:u"));
        assert_eq!(
            limiter.check("create:u", limiter.default_limit()),
            Admission::Denied { retry_after: forever }
        );
        assert_eq!(limiter.prune(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_does_not_consume() {
        let limiter = RateLimiter::new(RateLimit::new(Duration::from_secs(60), 5));
        assert_eq!(limiter.remaining("fresh"), 5);
        assert_eq!(limiter.tracked_keys(), 0);

        limiter.allow("k");
        limiter.allow("k");
        assert_eq!(limiter.remaining("k"), 3);
        assert_eq!(limiter.remaining("k"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_drops_idle_windows() {
        let limiter = RateLimiter::new(RateLimit::new(Duration::from_secs(10), 5));
        limiter.allow("old");
        tokio::time::advance(Duration::from_secs(8)).await;
        limiter.allow("recent");

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(limiter.prune(), 1);
        assert_eq!(limiter.tracked_keys(), 1);
        assert_eq!(limiter.remaining("recent"), 4);
    }
}
