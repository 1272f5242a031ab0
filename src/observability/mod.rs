//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! ServiceClient / RetryingTransport / CircuitBreaker
//!     → metrics.rs (atomic counters for the health surface,
//!                   `metrics` facade for Prometheus scraping)
//!     → tracing macros (structured log events)
//!
//! Binary startup:
//!     → logging.rs installs the tracing subscriber
//!     → metrics.rs installs the Prometheus exporter when enabled
//! ```
//!
//! # Design Decisions
//! - The library never installs a global subscriber or recorder itself
//! - Counters are plain atomics, so recording is cheap and lock-free

pub mod logging;
pub mod metrics;

pub use self::metrics::{MetricsCollector, MetricsSnapshot};
