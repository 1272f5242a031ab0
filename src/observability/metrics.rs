//! Metrics collection and exposition.
//!
//! # Metrics
//! - `template_client_requests_total` (counter): logical calls by operation
//! - `template_client_upstream_results_total` (counter): upstream outcomes by operation, result
//! - `template_client_request_duration_seconds` (histogram): upstream latency by operation
//! - `template_client_cache_total` (counter): cache lookups by operation, result
//! - `template_client_rate_limited_total` (counter): rejected admissions by operation
//! - `template_client_rejected_total` (counter): calls refused locally before any upstream attempt, by operation, reason
//! - `template_client_retries_total` (counter): retry attempts by operation
//! - `template_client_fallbacks_total` (counter): degraded reads by operation, kind
//! - `template_client_circuit_state` (gauge): 0=closed, 1=open, 2=half-open
//!
//! The same events also bump in-process atomics so the health surface can
//! report them without a metrics backend.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;

use crate::upstream::types::Operation;

/// Install the Prometheus exporter and its HTTP listener. Must run inside a
/// Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install Prometheus exporter"),
    }
}

/// Process-wide counters and timers for the client.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejected: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    rate_limited: AtomicU64,
    circuit_rejections: AtomicU64,
    retries: AtomicU64,
    fallbacks: AtomicU64,
    stale_served: AtomicU64,
    latency_micros: AtomicU64,
    latency_samples: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub rejected: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub rate_limited: u64,
    pub circuit_rejections: u64,
    pub retries: u64,
    pub fallbacks_served: u64,
    pub stale_served: u64,
    pub avg_upstream_latency_ms: f64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A logical operation was invoked.
    pub fn record_request(&self, op: Operation) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("template_client_requests_total", "operation" => op.name()).increment(1);
    }

    pub fn record_success(&self, op: Operation, elapsed: Duration) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.record_latency(op, elapsed);
        ::metrics::counter!(
            "template_client_upstream_results_total",
            "operation" => op.name(),
            "result" => "success"
        )
        .increment(1);
    }

    /// A failed call. `kind` is a short error class such as `timeout` or
    /// `status_5xx`.
    pub fn record_failure(&self, op: Operation, kind: &'static str, elapsed: Option<Duration>) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        if let Some(elapsed) = elapsed {
            self.record_latency(op, elapsed);
        }
        ::metrics::counter!(
            "template_client_upstream_results_total",
            "operation" => op.name(),
            "result" => kind
        )
        .increment(1);
    }

    /// A call refused before reaching the upstream, e.g. invalid input.
    pub fn record_rejected(&self, op: Operation, reason: &'static str) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!(
            "template_client_rejected_total",
            "operation" => op.name(),
            "reason" => reason
        )
        .increment(1);
    }

    pub fn record_cache_hit(&self, op: Operation) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("template_client_cache_total", "operation" => op.name(), "result" => "hit").increment(1);
    }

    pub fn record_cache_miss(&self, op: Operation) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("template_client_cache_total", "operation" => op.name(), "result" => "miss").increment(1);
    }

    pub fn record_rate_limited(&self, op: Operation) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("template_client_rate_limited_total", "operation" => op.name()).increment(1);
    }

    pub fn record_circuit_rejection(&self, op: Operation) {
        self.circuit_rejections.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("template_client_circuit_rejected_calls_total", "operation" => op.name()).increment(1);
    }

    pub fn record_retry(&self, op: Operation) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("template_client_retries_total", "operation" => op.name()).increment(1);
    }

    /// A read was answered from a stale entry (`stale`) or a built-in default.
    pub fn record_fallback(&self, op: Operation, stale: bool) {
        let kind = if stale {
            self.stale_served.fetch_add(1, Ordering::Relaxed);
            "stale"
        } else {
            self.fallbacks.fetch_add(1, Ordering::Relaxed);
            "default"
        };
        ::metrics::counter!("template_client_fallbacks_total", "operation" => op.name(), "kind" => kind).increment(1);
    }

    fn record_latency(&self, op: Operation, elapsed: Duration) {
        self.latency_micros
            .fetch_add(elapsed.as_micros().min(u64::MAX as u128) as u64, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
        ::metrics::histogram!("template_client_request_duration_seconds", "operation" => op.name())
            .record(elapsed.as_secs_f64());
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let samples = self.latency_samples.load(Ordering::Relaxed);
        let micros = self.latency_micros.load(Ordering::Relaxed);

        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            cache_hits: hits,
            cache_misses: misses,
            cache_hit_rate: if lookups == 0 { 0.0 } else { hits as f64 / lookups as f64 },
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            circuit_rejections: self.circuit_rejections.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            fallbacks_served: self.fallbacks.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            avg_upstream_latency_ms: if samples == 0 {
                0.0
            } else {
                micros as f64 / samples as f64 / 1000.0
            },
        }
    }
}
