//! Caller-facing types: identities, read results, errors and health.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::observability::metrics::MetricsSnapshot;
use crate::resilience::circuit_breaker::CircuitState;
use crate::security::validation::{self, InvalidInput};
use crate::upstream::types::TransportError;

/// Caller identity, as supplied by the application's auth layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerId(String);

impl CallerId {
    pub fn new(id: &str) -> Result<Self, InvalidInput> {
        validation::identifier("caller", id).map(CallerId)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a read was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Upstream,
    Cache,
    /// An expired cache entry, served because the upstream was unavailable.
    Stale,
    /// The built-in default for the operation.
    Fallback,
}

/// A read result with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Served {
    pub data: Value,
    pub source: Source,
}

impl Served {
    pub fn new(data: Value, source: Source) -> Self {
        Self { data, source }
    }

    /// True when the data did not come from a fresh upstream or cache read.
    pub fn is_degraded(&self) -> bool {
        matches!(self.source, Source::Stale | Source::Fallback)
    }
}

/// Errors surfaced to callers.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] InvalidInput),

    #[error("rate limit exceeded for {key}, retry after {retry_after:?}")]
    RateLimited { key: String, retry_after: Duration },

    #[error("template service unavailable (circuit open)")]
    CircuitOpen,

    #[error("template service call failed: {0}")]
    Upstream(TransportError),

    #[error("client has been shut down")]
    ShutDown,

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::CircuitOpen => ClientError::CircuitOpen,
            TransportError::Closed => ClientError::ShutDown,
            other => ClientError::Upstream(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// Circuit open or probing; reads are being served from fallbacks.
    Degraded,
    ShutDown,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub circuit: CircuitState,
    pub consecutive_failures: u32,
    pub cache_entries: usize,
    pub in_flight: usize,
    pub metrics: MetricsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_id_trimmed() {
        assert_eq!(CallerId::new("  user-1 ").unwrap().as_str(), "user-1");
        assert!(CallerId::new("").is_err());
        assert!(CallerId::new("a/b").is_err());
    }

    #[test]
    fn test_transport_errors_map_to_client_errors() {
        assert!(matches!(ClientError::from(TransportError::CircuitOpen), ClientError::CircuitOpen));
        assert!(matches!(ClientError::from(TransportError::Closed), ClientError::ShutDown));
        assert!(matches!(
            ClientError::from(TransportError::Status { status: 404, body: String::new() }),
            ClientError::Upstream(TransportError::Status { status: 404, .. })
        ));
    }

    #[test]
    fn test_served_serializes_source() {
        let served = Served::new(Value::Null, Source::Stale);
        assert!(served.is_degraded());
        let json = serde_json::to_value(&served).unwrap();
        assert_eq!(json["source"], "stale");
    }
}
