//! Upstream service transport.
//!
//! # Data Flow
//! ```text
//! RequestDescriptor
//!     → Upstream::send (one attempt, no retry, no breaker)
//!     → http.rs: pooled reqwest client, socket cap, request ID
//!     → JSON payload or TransportError
//! ```
//!
//! Retry, timeout and circuit breaking are layered on top by
//! `resilience::retries::RetryingTransport`.

pub mod http;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use serde_json::Value;

pub use http::HttpUpstream;
pub use types::{Method, Operation, Outcome, RequestDescriptor, TransportError};

/// A single-attempt transport to the template/research service.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Issue one request and decode the JSON response.
    async fn send(&self, request: &RequestDescriptor) -> Result<Value, TransportError>;

    /// Release pooled connections. Later sends fail with `TransportError::Closed`.
    fn close(&self) {}
}
