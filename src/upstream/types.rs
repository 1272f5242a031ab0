//! Request descriptors, outcomes and transport errors.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::resilience::circuit_breaker::TripsBreaker;

/// Every operation the upstream service exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    ListCategories,
    ListTemplatesByCategory,
    ListCallerTemplates,
    ListPopular,
    Search,
    CreateTemplate,
    GenerateFromQuery,
    FillTemplate,
}

/// Built-in tuning for an operation, before config overrides.
#[derive(Debug, Clone, Copy)]
pub struct OperationDefaults {
    pub cache_ttl_secs: u64,
    pub timeout_ms: u64,
    /// `(window_secs, max_requests)`; `None` uses the global limit.
    pub rate_limit: Option<(u64, u32)>,
}

impl Operation {
    pub const ALL: [Operation; 8] = [
        Operation::ListCategories,
        Operation::ListTemplatesByCategory,
        Operation::ListCallerTemplates,
        Operation::ListPopular,
        Operation::Search,
        Operation::CreateTemplate,
        Operation::GenerateFromQuery,
        Operation::FillTemplate,
    ];

    /// Stable name, used in config keys, rate-limit keys and metric labels.
    pub fn name(self) -> &'static str {
        match self {
            Operation::ListCategories => "list_categories",
            Operation::ListTemplatesByCategory => "list_templates_by_category",
            Operation::ListCallerTemplates => "list_caller_templates",
            Operation::ListPopular => "list_popular",
            Operation::Search => "search",
            Operation::CreateTemplate => "create_template",
            Operation::GenerateFromQuery => "generate_from_query",
            Operation::FillTemplate => "fill_template",
        }
    }

    /// Short prefix for rate-limit keys, e.g. `generate:user-1`.
    pub fn rate_prefix(self) -> &'static str {
        match self {
            Operation::ListCategories => "categories",
            Operation::ListTemplatesByCategory => "templates",
            Operation::ListCallerTemplates => "mine",
            Operation::ListPopular => "popular",
            Operation::Search => "search",
            Operation::CreateTemplate => "create",
            Operation::GenerateFromQuery => "generate",
            Operation::FillTemplate => "fill",
        }
    }

    /// Reads recover locally; writes surface failures.
    pub fn is_read(self) -> bool {
        matches!(
            self,
            Operation::ListCategories
                | Operation::ListTemplatesByCategory
                | Operation::ListCallerTemplates
                | Operation::ListPopular
                | Operation::Search
        )
    }

    pub fn is_idempotent(self) -> bool {
        !matches!(self, Operation::CreateTemplate | Operation::GenerateFromQuery)
    }

    pub fn defaults(self) -> OperationDefaults {
        let (cache_ttl_secs, timeout_ms, rate_limit) = match self {
            Operation::ListCategories => (3600, 5_000, None),
            Operation::ListTemplatesByCategory => (600, 5_000, None),
            Operation::ListCallerTemplates => (60, 5_000, None),
            Operation::ListPopular => (300, 5_000, None),
            Operation::Search => (120, 8_000, None),
            Operation::CreateTemplate => (0, 10_000, None),
            Operation::GenerateFromQuery => (0, 30_000, Some((60, 10))),
            Operation::FillTemplate => (0, 15_000, None),
        };
        OperationDefaults {
            cache_ttl_secs,
            timeout_ms,
            rate_limit,
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// HTTP method used for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Everything needed to issue one logical upstream call.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub operation: Operation,
    pub method: Method,
    /// Path relative to the base URL, e.g. `/api/templates`.
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub idempotent: bool,
    pub timeout: Duration,
    /// Reused across retries so the upstream can deduplicate writes.
    pub idempotency_key: Option<String>,
}

impl RequestDescriptor {
    pub fn get(operation: Operation, path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            operation,
            method: Method::Get,
            path: path.into(),
            query: BTreeMap::new(),
            body: None,
            idempotent: operation.is_idempotent(),
            timeout,
            idempotency_key: None,
        }
    }

    pub fn post(operation: Operation, path: impl Into<String>, body: Value, timeout: Duration) -> Self {
        Self {
            method: Method::Post,
            body: Some(body),
            ..Self::get(operation, path, timeout)
        }
    }

    pub fn with_query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.insert(name.to_string(), value.into());
        self
    }
}

/// Errors from a single upstream attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Connection refused, reset, DNS failure and the like.
    #[error("network error: {0}")]
    Network(String),

    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),

    /// Upstream answered with a non-success status.
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body was not valid JSON.
    #[error("invalid response body: {0}")]
    Decode(String),

    /// The transport was shut down.
    #[error("transport closed")]
    Closed,

    /// The circuit breaker rejected the call without a network attempt.
    #[error("circuit open")]
    CircuitOpen,
}

impl TransportError {
    /// Network errors, timeouts, 5xx and 429 may succeed on retry.
    pub fn is_retriable(&self) -> bool {
        match self {
            TransportError::Network(_) | TransportError::Timeout(_) => true,
            TransportError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            TransportError::Decode(_) | TransportError::Closed | TransportError::CircuitOpen => false,
        }
    }

    /// Short error class for metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Network(_) => "network",
            TransportError::Timeout(_) => "timeout",
            TransportError::Status { status, .. } if *status == 429 => "status_429",
            TransportError::Status { status, .. } if *status >= 500 => "status_5xx",
            TransportError::Status { .. } => "status_4xx",
            TransportError::Decode(_) => "decode",
            TransportError::Closed => "closed",
            TransportError::CircuitOpen => "circuit_open",
        }
    }
}

impl TripsBreaker for TransportError {
    fn trips_breaker(&self) -> bool {
        self.is_retriable()
    }
}

/// Result of a (possibly retried) upstream call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Value),
    /// Failed with a retriable error and the retry budget is spent.
    RetriableFailure(TransportError),
    /// Failed in a way retrying cannot fix.
    TerminalFailure(TransportError),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, Outcome::RetriableFailure(_))
    }

    pub fn error(&self) -> Option<&TransportError> {
        match self {
            Outcome::Success(_) => None,
            Outcome::RetriableFailure(e) | Outcome::TerminalFailure(e) => Some(e),
        }
    }

    pub fn into_result(self) -> Result<Value, TransportError> {
        match self {
            Outcome::Success(v) => Ok(v),
            Outcome::RetriableFailure(e) | Outcome::TerminalFailure(e) => Err(e),
        }
    }
}
