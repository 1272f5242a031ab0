//! Admission control and input checks.
//!
//! # Data Flow
//! ```text
//! Operation call:
//!     → validation.rs (reject malformed input before any network work)
//!     → [cache lookup]
//!     → rate_limit.rs (per-key sliding window, fail fast)
//!     → Pass to the transport
//! ```
//!
//! # Design Decisions
//! - Fail closed: invalid input never reaches the upstream
//! - No queueing: an over-limit call is rejected, not delayed
//! - No trust in caller input; identifiers are checked before they are
//!   placed in URL paths

pub mod rate_limit;
pub mod validation;

pub use rate_limit::{Admission, RateLimit, RateLimiter};
pub use validation::InvalidInput;
