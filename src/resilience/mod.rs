//! Resilience patterns for upstream calls.
//!
//! # Data Flow
//! ```text
//! RetryingTransport::call(descriptor)
//!     → CircuitBreaker::execute (reject fast while open)
//!         → tokio::time::timeout(descriptor.timeout, upstream.send)
//!     → retriable failure? backoff.rs delay, try again
//!     → Outcome
//! ```
//!
//! # Design Decisions
//! - Only retriable failures count against the breaker; 4xx is neutral
//! - Retry budget is per logical call, never unbounded
//! - Half-open admits a single trial call

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;

pub use circuit_breaker::{BreakerError, CircuitBreaker, CircuitState};
pub use retries::RetryingTransport;
