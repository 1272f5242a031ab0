//! Resilient client for the template/research service.
//!
//! # Data Flow
//! ```text
//! Read (operations.rs → service.rs):
//!     validate → cache lookup ─ hit ─────────────────────────→ Served { Cache }
//!                  │ miss / expired (remember stale value)
//!                  ▼
//!              rate limiter ─ denied ─→ stale value or fallback
//!                  │
//!                  ▼
//!              RetryingTransport ─ success → cache write → Served { Upstream }
//!                  └─ failure ───────────→ stale value or fallback
//!
//! Write:
//!     validate → rate limiter (denied → ClientError::RateLimited)
//!              → RetryingTransport → invalidate tags → payload
//!                                  └→ ClientError
//! ```

mod maintenance;
pub mod operations;
pub mod service;
pub mod types;

pub use service::ServiceClient;
pub use types::{CallerId, ClientError, HealthReport, HealthStatus, Served, Source};
