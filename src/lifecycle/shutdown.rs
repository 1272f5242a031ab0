//! Shutdown coordination for the client.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Notify};

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks can subscribe to.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Number of tasks still listening.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts calls currently in progress so shutdown can drain them.
#[derive(Debug, Default)]
pub struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a call. The count drops when the guard does.
    pub fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            tracker: Arc::clone(self),
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait until no calls are in flight or `timeout` elapses. Returns
    /// whether the tracker drained.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let drained = async {
            loop {
                let notified = self.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.count() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }
}

/// RAII registration of one in-flight call.
#[derive(Debug)]
pub struct InFlightGuard {
    tracker: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.tracker.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.tracker.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_reaches_subscribers() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();
        assert_eq!(shutdown.receiver_count(), 1);
        shutdown.trigger();
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_guard_tracks_count() {
        let in_flight = InFlight::new();
        let a = in_flight.enter();
        let b = in_flight.enter();
        assert_eq!(in_flight.count(), 2);
        drop(a);
        assert_eq!(in_flight.count(), 1);
        drop(b);
        assert_eq!(in_flight.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_idle_returns_when_drained() {
        let in_flight = InFlight::new();
        let guard = in_flight.enter();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            drop(guard);
        });
        assert!(in_flight.wait_idle(Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_idle_times_out() {
        let in_flight = InFlight::new();
        let _guard = in_flight.enter();
        assert!(!in_flight.wait_idle(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_wait_idle_immediate_when_empty() {
        let in_flight = InFlight::new();
        assert!(in_flight.wait_idle(Duration::from_millis(10)).await);
    }
}
