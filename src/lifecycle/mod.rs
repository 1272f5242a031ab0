//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     Load config → Validate → ServiceClient::init → maintenance task
//!
//! Shutdown (shutdown.rs):
//!     shutdown() → broadcast to background tasks
//!               → wait for in-flight calls (bounded by drain timeout)
//!               → clear cache → close upstream pool
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop background work, drain, release
//! - Drain has a deadline: stragglers are abandoned, not awaited forever

pub mod shutdown;

pub use shutdown::{InFlight, InFlightGuard, Shutdown};
