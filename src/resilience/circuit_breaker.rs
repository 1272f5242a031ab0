//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: upstream assumed down, requests fail fast
//! - Half-Open: a single trial request tests recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= failure_threshold
//! Open → Half-Open: on the next call once cooldown has elapsed
//! Half-Open → Closed: trial succeeds
//! Half-Open → Open: trial fails (cooldown restarts)
//! ```
//!
//! # Design Decisions
//! - Fail fast in Open state (the operation is never invoked)
//! - Single trial in Half-Open; concurrent callers see Open
//! - Only errors that say something about upstream health count as failures
//! - A trial abandoned by its caller counts as a failed trial

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

/// Circuit breaker state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge value (0=Closed, 1=Open, 2=HalfOpen).
    pub fn as_metric_value(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        })
    }
}

/// Classifies an error as evidence that the upstream is unhealthy.
pub trait TripsBreaker {
    fn trips_breaker(&self) -> bool;
}

/// Returned by `try_acquire` while the circuit rejects calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("circuit open")]
pub struct CircuitOpen;

/// Error from `CircuitBreaker::execute`.
#[derive(Debug, PartialEq, Eq)]
pub enum BreakerError<E> {
    /// Rejected without invoking the operation.
    Open,
    /// The operation ran and failed.
    Inner(E),
}

impl<E: std::fmt::Display> std::fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerError::Open => write!(f, "circuit open"),
            BreakerError::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BreakerError::Open => None,
            BreakerError::Inner(e) => Some(e),
        }
    }
}

struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    trial_in_flight: bool,
    failure_threshold: u32,
    cooldown: Duration,
}

/// Per-dependency circuit breaker.
pub struct CircuitBreaker {
    name: String,
    inner: Mutex<BreakerState>,
    opened: AtomicU64,
    rejected: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure_at: None,
                trial_in_flight: false,
                failure_threshold: failure_threshold.max(1),
                cooldown,
            }),
            opened: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state. An Open circuit whose cooldown has elapsed still reports
    /// Open until a call arrives to try it.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Times the circuit has opened.
    pub fn opened_count(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    /// Calls rejected without reaching the upstream.
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Change threshold and cooldown. State and counters are kept.
    pub fn reconfigure(&self, failure_threshold: u32, cooldown: Duration) {
        let mut state = self.lock();
        state.failure_threshold = failure_threshold.max(1);
        state.cooldown = cooldown;
    }

    /// Ask to make a call. The permit must be settled with `success`,
    /// `failure` or `release`.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, CircuitOpen> {
        let mut state = self.lock();

        let current = state.state;
        let trial = match current {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let cooled = state
                    .last_failure_at
                    .map(|at| at.elapsed() >= state.cooldown)
                    .unwrap_or(true);
                if !cooled || state.trial_in_flight {
                    drop(state);
                    return Err(self.reject());
                }
                state.state = CircuitState::HalfOpen;
                state.trial_in_flight = true;
                tracing::info!(breaker = %self.name, "Circuit breaker half-open, allowing trial call");
                self.publish(CircuitState::HalfOpen);
                true
            }
            CircuitState::HalfOpen => {
                if state.trial_in_flight {
                    drop(state);
                    return Err(self.reject());
                }
                state.trial_in_flight = true;
                true
            }
        };

        Ok(CallPermit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    /// Run `op` if the circuit allows it.
    ///
    /// Errors for which `trips_breaker` is false are passed through without
    /// counting as failures.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: TripsBreaker,
    {
        let permit = self.try_acquire().map_err(|_| BreakerError::Open)?;
        match op().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(e) => {
                if e.trips_breaker() {
                    permit.failure();
                } else {
                    permit.release();
                }
                Err(BreakerError::Inner(e))
            }
        }
    }

    fn reject(&self) -> CircuitOpen {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("template_client_circuit_rejections_total", "breaker" => self.name.clone()).increment(1);
        CircuitOpen
    }

    fn on_success(&self, trial: bool) {
        let mut state = self.lock();
        state.consecutive_failures = 0;
        if trial {
            state.trial_in_flight = false;
            state.state = CircuitState::Closed;
            tracing::info!(breaker = %self.name, "Circuit breaker closed, upstream recovered");
            self.publish(CircuitState::Closed);
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut state = self.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_failure_at = Some(Instant::now());

        if trial {
            state.trial_in_flight = false;
            state.state = CircuitState::Open;
            self.opened.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(breaker = %self.name, "Circuit breaker trial failed, reopening");
            self.publish(CircuitState::Open);
        } else if state.state == CircuitState::Closed
            && state.consecutive_failures >= state.failure_threshold
        {
            state.state = CircuitState::Open;
            self.opened.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                breaker = %self.name,
                failures = state.consecutive_failures,
                cooldown = ?state.cooldown,
                "Circuit breaker opened"
            );
            self.publish(CircuitState::Open);
        }
    }

    fn on_neutral(&self, trial: bool) {
        if trial {
            self.lock().trial_in_flight = false;
        }
    }

    fn publish(&self, state: CircuitState) {
        metrics::gauge!("template_client_circuit_state", "breaker" => self.name.clone())
            .set(state.as_metric_value());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.inner.lock().expect("circuit breaker mutex poisoned")
    }
}

/// Permission to make one call through the breaker.
///
/// Dropping an unsettled trial permit counts as a failed trial.
#[must_use = "a permit must be settled with success, failure or release"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl CallPermit<'_> {
    /// Whether this call is the Half-Open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }

    /// Settle without evidence either way (e.g. a 4xx from a healthy upstream).
    pub fn release(mut self) {
        self.settled = true;
        self.breaker.on_neutral(self.trial);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            tracing::debug!(breaker = %self.breaker.name, "Trial call abandoned");
            self.breaker.on_failure(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[derive(Debug, PartialEq)]
    struct Fault {
        upstream: bool,
    }

    impl TripsBreaker for Fault {
        fn trips_breaker(&self) -> bool {
            self.upstream
        }
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), BreakerError<Fault>> {
        cb.execute(|| async { Err::<(), _>(Fault { upstream: true }) }).await
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<u32, BreakerError<Fault>> {
        cb.execute(|| async { Ok::<_, Fault>(7) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_fails_fast() {
        let cb = CircuitBreaker::new("upstream", 3, Duration::from_secs(30));
        for _ in 0..2 {
            assert!(matches!(fail(&cb).await, Err(BreakerError::Inner(_))));
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        assert!(matches!(fail(&cb).await, Err(BreakerError::Inner(_))));
        assert_eq!(cb.state(), CircuitState::Open);

        let invoked = AtomicU32::new(0);
        let counter = &invoked;
        let res = cb
            .execute(|| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Fault>(())
            })
            .await;
        assert_eq!(res, Err(BreakerError::Open));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(cb.rejected_count(), 1);
        assert_eq!(cb.opened_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_success_closes() {
        let cb = CircuitBreaker::new("upstream", 1, Duration::from_secs(10));
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(succeed(&cb).await, Err(BreakerError::Open));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(succeed(&cb).await, Ok(7));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_failure_reopens_and_restarts_cooldown() {
        let cb = CircuitBreaker::new("upstream", 2, Duration::from_secs(10));
        let _ = fail(&cb).await;
        let _ = fail(&cb).await;

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(matches!(fail(&cb).await, Err(BreakerError::Inner(_))));
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(succeed(&cb).await, Err(BreakerError::Open));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(succeed(&cb).await, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_trial_in_half_open() {
        let cb = CircuitBreaker::new("upstream", 1, Duration::from_secs(5));
        let _ = fail(&cb).await;
        tokio::time::advance(Duration::from_secs(5)).await;

        let trial = cb.try_acquire().unwrap();
        assert!(trial.is_trial());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.try_acquire().is_err());
        assert!(cb.try_acquire().is_err());

        trial.success();
        assert_eq!(cb.state(), CircuitState::Closed);
        let normal = cb.try_acquire().unwrap();
        assert!(!normal.is_trial());
        normal.success();
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_trial_reopens() {
        let cb = CircuitBreaker::new("upstream", 1, Duration::from_secs(5));
        let _ = fail(&cb).await;
        tokio::time::advance(Duration::from_secs(5)).await;

        drop(cb.try_acquire().unwrap());
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_neutral_errors_do_not_count() {
        let cb = CircuitBreaker::new("upstream", 2, Duration::from_secs(5));
        let _ = fail(&cb).await;
        let res = cb.execute(|| async { Err::<(), _>(Fault { upstream: false }) }).await;
        assert_eq!(res, Err(BreakerError::Inner(Fault { upstream: false })));
        assert_eq!(cb.consecutive_failures(), 1);
        assert_eq!(cb.state(), CircuitState::Closed);

        assert_eq!(succeed(&cb).await, Ok(7));
        assert_eq!(cb.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_neutral_trial_keeps_half_open() {
        let cb = CircuitBreaker::new("upstream", 1, Duration::from_secs(5));
        let _ = fail(&cb).await;
        tokio::time::advance(Duration::from_secs(5)).await;

        let _ = cb.execute(|| async { Err::<(), _>(Fault { upstream: false }) }).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        let next = cb.try_acquire().unwrap();
        assert!(next.is_trial());
        next.success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
