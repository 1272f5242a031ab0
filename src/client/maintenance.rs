//! Periodic housekeeping.
//!
//! # Responsibilities
//! - Drop rate windows with no admissions left in them
//! - Purge cache entries past their TTL and stale grace period

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time;

use crate::cache::ResponseCache;
use crate::security::RateLimiter;

pub struct Maintenance {
    limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache<Value>>,
    interval: Duration,
}

impl Maintenance {
    pub fn new(limiter: Arc<RateLimiter>, cache: Arc<ResponseCache<Value>>, interval: Duration) -> Self {
        Self {
            limiter,
            cache,
            interval,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::debug!(interval = ?self.interval, "Maintenance task starting");

        let mut ticker = time::interval(self.interval);
        // The first tick completes immediately; nothing to clean yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep();
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Maintenance task received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// One housekeeping pass. Returns `(windows_pruned, entries_purged)`.
    pub fn sweep(&self) -> (usize, usize) {
        let pruned = self.limiter.prune();
        let purged = self.cache.purge_expired();
        if pruned > 0 || purged > 0 {
            tracing::debug!(
                windows_pruned = pruned,
                entries_purged = purged,
                "Maintenance sweep"
            );
        }
        (pruned, purged)
    }
}
