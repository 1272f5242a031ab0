//! Resilient client for a family assistant's template and research service.
//!
//! # Architecture Overview
//!
//! ```text
//!   caller
//!     │
//!     ▼
//!  ┌──────────────────────────── ServiceClient ─────────────────────────────┐
//!  │  security::validation → cache (LRU + TTL) → security::rate_limit       │
//!  │        │                                          │                    │
//!  │        │ hit                                      ▼                    │
//!  │        │                        resilience::retries (backoff)          │
//!  │        │                                 │                             │
//!  │        │                        resilience::circuit_breaker            │
//!  │        │                                 │                             │
//!  │        │                        upstream::http (reqwest pool) ─────────┼──▶ template service
//!  │        ▼                                                               │
//!  │  Served { data, source } / ClientError                                 │
//!  └────────────────────────────────────────────────────────────────────────┘
//!        cross-cutting: config (+ hot reload), observability, lifecycle, admin
//! ```

pub mod admin;
pub mod cache;
pub mod client;
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;
pub mod upstream;

pub use client::{CallerId, ClientError, HealthReport, Served, ServiceClient, Source};
pub use config::ClientConfig;
pub use lifecycle::Shutdown;
