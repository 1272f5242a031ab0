//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::upstream::types::Operation;

/// Root configuration for the template service client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Upstream service location and connection pool.
    pub upstream: UpstreamConfig,

    /// Circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry configuration.
    pub retry: RetryConfig,

    /// Response cache settings.
    pub cache: CacheConfig,

    /// Default rate limit, used when an operation has no override.
    pub rate_limit: RateLimitConfig,

    /// Per-operation overrides, keyed by operation name.
    pub operations: HashMap<Operation, OperationOverride>,

    /// Values served when the upstream cannot be reached.
    pub fallback: FallbackConfig,

    /// Shutdown behaviour.
    pub shutdown: ShutdownConfig,

    /// Background maintenance task.
    pub maintenance: MaintenanceConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Upstream service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the template/research service.
    pub base_url: String,

    /// Maximum concurrent sockets to the upstream.
    pub max_connections: usize,

    /// How long an idle pooled connection is kept, in seconds.
    pub pool_idle_timeout_secs: u64,

    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// User-Agent header sent upstream.
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            max_connections: 32,
            pool_idle_timeout_secs: 90,
            connect_timeout_ms: 2_000,
            user_agent: concat!("template-client/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,

    /// Seconds to wait in Open before a trial call is allowed.
    pub cooldown_secs: u64,
}

impl CircuitBreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 30,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Add up to 10% random jitter to each delay.
    pub jitter: bool,

    /// Retry non-idempotent operations too. Only safe when the upstream
    /// deduplicates on the `Idempotency-Key` header.
    pub retry_non_idempotent: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 2,
            base_delay_ms: 500,
            max_delay_ms: 2000,
            jitter: false,
            retry_non_idempotent: false,
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached responses before LRU eviction.
    pub max_entries: usize,

    /// Seconds an expired entry stays available as a stale fallback.
    pub stale_grace_secs: u64,
}

impl CacheConfig {
    pub fn stale_grace(&self) -> Duration {
        Duration::from_secs(self.stale_grace_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            stale_grace_secs: 300,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Sliding window length in seconds.
    pub window_secs: u64,

    /// Requests admitted per key per window.
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_requests: 60,
        }
    }
}

/// Optional per-operation overrides. Unset fields keep the built-in
/// defaults for that operation.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OperationOverride {
    pub cache_ttl_secs: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub rate_limit_window_secs: Option<u64>,
    pub rate_limit_max: Option<u32>,
}

/// Resolved policy for a single operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationPolicy {
    pub cache_ttl: Duration,
    pub timeout: Duration,
    pub rate_window: Duration,
    pub rate_max: u32,
}

impl ClientConfig {
    /// Resolve the effective policy for `op`: override, then built-in
    /// default, then the global rate limit.
    pub fn policy(&self, op: Operation) -> OperationPolicy {
        let builtin = op.defaults();
        let over = self.operations.get(&op).cloned().unwrap_or_default();

        let (window_secs, max) = match builtin.rate_limit {
            Some((w, m)) => (w, m),
            None => (self.rate_limit.window_secs, self.rate_limit.max_requests),
        };

        OperationPolicy {
            cache_ttl: Duration::from_secs(over.cache_ttl_secs.unwrap_or(builtin.cache_ttl_secs)),
            timeout: Duration::from_millis(over.timeout_ms.unwrap_or(builtin.timeout_ms)),
            rate_window: Duration::from_secs(over.rate_limit_window_secs.unwrap_or(window_secs)),
            rate_max: over.rate_limit_max.unwrap_or(max),
        }
    }
}

/// Fallback values for read operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Category list served when the live list is unavailable.
    pub categories: Vec<String>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            categories: [
                "Homework",
                "Schedules",
                "Meal Planning",
                "Chores",
                "Celebrations",
                "Travel",
                "Family Blog",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Maximum time to wait for in-flight calls, in seconds.
    pub drain_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 10,
        }
    }
}

/// Maintenance task configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Interval between rate-window pruning and cache purges, in seconds.
    pub interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
