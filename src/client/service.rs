//! The resilient client façade.
//!
//! # Responsibilities
//! - Own the shared cache, rate limiter, circuit breaker and transport
//! - Run reads through cache → limiter → transport → stale/fallback
//! - Run writes through limiter → transport → tag invalidation
//! - Track in-flight calls and shut down in order
//!
//! # Design Decisions
//! - Reads never fail because the upstream is down; they degrade
//! - Writes always surface failures
//! - No lock is held across an await; every component guards its own state

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde_json::Value;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cache::{CacheTag, Lookup, ResponseCache};
use crate::client::maintenance::Maintenance;
use crate::client::types::{CallerId, ClientError, HealthReport, HealthStatus, Served, Source};
use crate::config::validation::{validate_config, ValidationError};
use crate::config::{ClientConfig, OperationPolicy};
use crate::lifecycle::{InFlight, InFlightGuard, Shutdown};
use crate::observability::{MetricsCollector, MetricsSnapshot};
use crate::resilience::{CircuitBreaker, CircuitState, RetryingTransport};
use crate::security::validation::InvalidInput;
use crate::security::{Admission, RateLimit, RateLimiter};
use crate::upstream::{HttpUpstream, Operation, Outcome, RequestDescriptor, TransportError, Upstream};

/// Name of the breaker guarding the template service.
pub const BREAKER_NAME: &str = "template-service";

/// A read, fully resolved by the operation that issues it.
pub(crate) struct ReadCall {
    pub policy: OperationPolicy,
    pub descriptor: RequestDescriptor,
    pub cache_key: String,
    pub rate_key: String,
    pub tags: Vec<CacheTag>,
    pub fallback: Value,
}

/// A write and the cache tags its success invalidates.
pub(crate) struct WriteCall {
    pub policy: OperationPolicy,
    pub descriptor: RequestDescriptor,
    pub rate_key: String,
    pub invalidates: Vec<CacheTag>,
}

pub struct ServiceClient {
    config: ArcSwap<ClientConfig>,
    upstream: Arc<dyn Upstream>,
    transport: RetryingTransport,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache<Value>>,
    metrics: Arc<MetricsCollector>,
    in_flight: Arc<InFlight>,
    shutdown: Shutdown,
    closed: AtomicBool,
    /// Set once the shutdown sequence has run to completion.
    stopped: OnceCell<()>,
}

impl ServiceClient {
    /// Build a client talking HTTP to `config.upstream.base_url`.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        validate_config(&config).map_err(config_error)?;
        let upstream = HttpUpstream::new(&config.upstream).map_err(|e| ClientError::Config(e.to_string()))?;
        Ok(Self::with_upstream(config, Arc::new(upstream)))
    }

    /// Build a client over any transport.
    pub fn with_upstream(config: ClientConfig, upstream: Arc<dyn Upstream>) -> Self {
        let metrics = Arc::new(MetricsCollector::new());
        let breaker = Arc::new(CircuitBreaker::new(
            BREAKER_NAME,
            config.circuit_breaker.failure_threshold,
            config.circuit_breaker.cooldown(),
        ));
        let transport = RetryingTransport::new(
            Arc::clone(&upstream),
            Arc::clone(&breaker),
            Arc::clone(&metrics),
            config.retry.clone(),
        );
        let limiter = Arc::new(RateLimiter::new(global_limit(&config)));
        let cache = Arc::new(ResponseCache::with_stale_grace(
            config.cache.max_entries,
            config.cache.stale_grace(),
        ));

        Self {
            config: ArcSwap::from_pointee(config),
            upstream,
            transport,
            breaker,
            limiter,
            cache,
            metrics,
            in_flight: InFlight::new(),
            shutdown: Shutdown::new(),
            closed: AtomicBool::new(false),
            stopped: OnceCell::new(),
        }
    }

    /// Build the process-wide client and start its maintenance task. Must
    /// run inside a Tokio runtime.
    pub fn init(config: ClientConfig) -> Result<Arc<Self>, ClientError> {
        let client = Arc::new(Self::new(config)?);
        client.spawn_maintenance();
        tracing::info!("Template service client initialized");
        Ok(client)
    }

    /// Start the periodic prune/purge task. It stops on shutdown.
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        let interval = Duration::from_secs(self.config.load().maintenance.interval_secs.max(1));
        let task = Maintenance::new(Arc::clone(&self.limiter), Arc::clone(&self.cache), interval);
        tokio::spawn(task.run(self.shutdown.subscribe()))
    }

    /// Stop background work, drain in-flight calls (bounded by the drain
    /// timeout), clear the cache and release pooled connections. Later calls
    /// fail with `ClientError::ShutDown`. Safe to call more than once;
    /// concurrent callers all return once the first has finished.
    pub async fn shutdown(&self) {
        self.stopped.get_or_init(|| self.stop()).await;
    }

    async fn stop(&self) {
        self.closed.store(true, Ordering::SeqCst);
        tracing::info!(in_flight = self.in_flight.count(), "Shutting down template service client");
        self.shutdown.trigger();

        let drain = Duration::from_secs(self.config.load().shutdown.drain_timeout_secs);
        if !self.in_flight.wait_idle(drain).await {
            tracing::warn!(
                in_flight = self.in_flight.count(),
                timeout = ?drain,
                "Drain timeout elapsed, abandoning in-flight calls"
            );
        }

        self.cache.clear();
        self.upstream.close();
        tracing::info!("Template service client shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Swap the runtime tunables. Upstream location and pool size are fixed
    /// at startup; changes to them are logged and ignored.
    pub fn reload(&self, config: ClientConfig) -> Result<(), ClientError> {
        validate_config(&config).map_err(config_error)?;

        let current = self.config.load_full();
        let mut next = config;
        if next.upstream.base_url != current.upstream.base_url {
            tracing::warn!(
                current = %current.upstream.base_url,
                requested = %next.upstream.base_url,
                "Upstream base URL cannot change at runtime, keeping current"
            );
        }
        if next.upstream.max_connections != current.upstream.max_connections {
            tracing::warn!(
                current = current.upstream.max_connections,
                requested = next.upstream.max_connections,
                "Connection cap cannot change at runtime, keeping current"
            );
        }
        next.upstream = current.upstream.clone();

        self.limiter.set_default_limit(global_limit(&next));
        self.breaker
            .reconfigure(next.circuit_breaker.failure_threshold, next.circuit_breaker.cooldown());
        self.transport.set_policy(next.retry.clone());
        let evicted = self.cache.set_capacity(next.cache.max_entries);
        self.cache.set_stale_grace(next.cache.stale_grace());
        self.config.store(Arc::new(next));

        tracing::info!(evicted, "Client configuration reloaded");
        Ok(())
    }

    pub fn config(&self) -> Arc<ClientConfig> {
        self.config.load_full()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn health(&self) -> HealthReport {
        let circuit = self.breaker.state();
        let status = if self.is_shut_down() {
            HealthStatus::ShutDown
        } else if circuit == CircuitState::Closed {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        HealthReport {
            status,
            circuit,
            consecutive_failures: self.breaker.consecutive_failures(),
            cache_entries: self.cache.len(),
            in_flight: self.in_flight.count(),
            metrics: self.metrics.snapshot(),
        }
    }

    /// Admissions left for `operation` (and `caller`, when the operation is
    /// per caller) in the current window. Does not consume.
    pub fn remaining(&self, operation: Operation, caller: Option<&CallerId>) -> u32 {
        let limit = rate_limit(&self.policy(operation));
        self.limiter.remaining_with(&rate_key(operation, caller), limit)
    }

    pub(crate) fn policy(&self, operation: Operation) -> OperationPolicy {
        self.config.load().policy(operation)
    }

    /// Turn a validation failure into a caller-facing error, recording it.
    pub(crate) fn validate<T>(&self, operation: Operation, input: Result<T, InvalidInput>) -> Result<T, ClientError> {
        input.map_err(|e| {
            self.metrics.record_rejected(operation, "validation");
            tracing::debug!(operation = %operation, error = %e, "Rejected invalid input");
            ClientError::Validation(e)
        })
    }

    pub(crate) async fn read(&self, call: ReadCall) -> Result<Served, ClientError> {
        let _guard = self.begin()?;
        let op = call.descriptor.operation;
        let cached = !call.policy.cache_ttl.is_zero();
        self.metrics.record_request(op);

        let mut stale = None;
        if cached {
            match self.cache.lookup(&call.cache_key) {
                Lookup::Hit(data) => {
                    self.metrics.record_cache_hit(op);
                    tracing::debug!(operation = %op, key = %call.cache_key, "Cache hit");
                    return Ok(Served::new(data, Source::Cache));
                }
                Lookup::Expired(data) => {
                    self.metrics.record_cache_miss(op);
                    stale = Some(data);
                }
                Lookup::Miss => self.metrics.record_cache_miss(op),
            }
        }

        if let Admission::Denied { retry_after } = self.limiter.check(&call.rate_key, rate_limit(&call.policy)) {
            self.metrics.record_rate_limited(op);
            tracing::warn!(
                operation = %op,
                key = %call.rate_key,
                retry_after = ?retry_after,
                "Rate limit exceeded, serving fallback"
            );
            return Ok(self.degrade(op, stale, call.fallback));
        }

        let started = Instant::now();
        match self.transport.call(&call.descriptor).await {
            Outcome::Success(data) => {
                self.metrics.record_success(op, started.elapsed());
                if cached {
                    self.cache
                        .set_tagged(call.cache_key, data.clone(), call.policy.cache_ttl, call.tags);
                }
                Ok(Served::new(data, Source::Upstream))
            }
            Outcome::RetriableFailure(err) | Outcome::TerminalFailure(err) => {
                self.record_upstream_failure(op, &err, started.elapsed());
                tracing::warn!(operation = %op, error = %err, "Upstream read failed, serving fallback");
                Ok(self.degrade(op, stale, call.fallback))
            }
        }
    }

    pub(crate) async fn write(&self, call: WriteCall) -> Result<Value, ClientError> {
        let _guard = self.begin()?;
        let op = call.descriptor.operation;
        self.metrics.record_request(op);

        if let Admission::Denied { retry_after } = self.limiter.check(&call.rate_key, rate_limit(&call.policy)) {
            self.metrics.record_rate_limited(op);
            tracing::warn!(operation = %op, key = %call.rate_key, retry_after = ?retry_after, "Rate limit exceeded");
            return Err(ClientError::RateLimited {
                key: call.rate_key,
                retry_after,
            });
        }

        let started = Instant::now();
        match self.transport.call(&call.descriptor).await {
            Outcome::Success(data) => {
                self.metrics.record_success(op, started.elapsed());
                for tag in &call.invalidates {
                    let removed = self.cache.invalidate_tag(tag);
                    tracing::debug!(operation = %op, tag = ?tag, removed, "Invalidated cached reads");
                }
                Ok(data)
            }
            Outcome::RetriableFailure(err) | Outcome::TerminalFailure(err) => {
                self.record_upstream_failure(op, &err, started.elapsed());
                tracing::error!(operation = %op, error = %err, "Upstream write failed");
                Err(ClientError::from(err))
            }
        }
    }

    /// Register a call, refusing it once shutdown has begun.
    fn begin(&self) -> Result<InFlightGuard, ClientError> {
        let guard = self.in_flight.enter();
        if self.is_shut_down() {
            return Err(ClientError::ShutDown);
        }
        Ok(guard)
    }

    fn degrade(&self, op: Operation, stale: Option<Value>, fallback: Value) -> Served {
        match stale {
            Some(data) => {
                self.metrics.record_fallback(op, true);
                Served::new(data, Source::Stale)
            }
            None => {
                self.metrics.record_fallback(op, false);
                Served::new(fallback, Source::Fallback)
            }
        }
    }

    fn record_upstream_failure(&self, op: Operation, err: &TransportError, elapsed: Duration) {
        if *err == TransportError::CircuitOpen {
            self.metrics.record_circuit_rejection(op);
            self.metrics.record_failure(op, err.kind(), None);
        } else {
            self.metrics.record_failure(op, err.kind(), Some(elapsed));
        }
    }
}

/// `"<prefix>:<caller>"` for per-caller operations, `"<prefix>"` otherwise.
pub(crate) fn rate_key(operation: Operation, caller: Option<&CallerId>) -> String {
    match caller {
        Some(caller) => format!("{}:{}", operation.rate_prefix(), caller),
        None => operation.rate_prefix().to_string(),
    }
}

fn rate_limit(policy: &OperationPolicy) -> RateLimit {
    RateLimit::new(policy.rate_window, policy.rate_max)
}

fn global_limit(config: &ClientConfig) -> RateLimit {
    RateLimit::new(
        Duration::from_secs(config.rate_limit.window_secs),
        config.rate_limit.max_requests,
    )
}

fn config_error(errors: Vec<ValidationError>) -> ClientError {
    let joined = errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
    ClientError::Config(joined)
}
