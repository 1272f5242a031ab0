//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, deserialize, environment overrides)
//!     → validation.rs (semantic checks)
//!     → ClientConfig (validated)
//!     → handed to ServiceClient at startup
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs parses the new contents
//!     → validation.rs validates
//!     → ServiceClient::reload swaps the tunable policies
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Base URL and connection cap only take effect at startup

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, load_or_default, ConfigError};
pub use schema::{
    CacheConfig, CircuitBreakerConfig, ClientConfig, FallbackConfig, MaintenanceConfig,
    ObservabilityConfig, OperationOverride, OperationPolicy, RateLimitConfig, RetryConfig,
    ShutdownConfig, UpstreamConfig,
};
pub use watcher::ConfigWatcher;
