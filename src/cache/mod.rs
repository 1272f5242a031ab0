//! Response caching.
//!
//! # Data Flow
//! ```text
//! Read operation
//!     → key.rs: operation + normalized params → deterministic key
//!     → store.rs: lookup (Hit / Expired / Miss)
//!     → on upstream success: set_tagged(key, payload, ttl, tags)
//!
//! Write operation success
//!     → invalidate_tag(Caller / Category)
//! ```
//!
//! # Design Decisions
//! - Expired entries stay readable for a grace period so reads can fall back to them
//! - Tags are indexed, so invalidation never matches by substring
//! - A TTL of zero means the operation is not cached

pub mod key;
pub mod store;

pub use key::{CacheKey, CacheTag};
pub use store::{Lookup, ResponseCache};
