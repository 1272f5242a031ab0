//! Health surface.
//!
//! # Routes
//! - `GET /health`: `HealthReport` as JSON; 503 once the client is shut down
//! - `GET /health/metrics`: `MetricsSnapshot` as JSON

pub mod handlers;

use std::sync::Arc;

use axum::{routing::get, Router};

use crate::client::ServiceClient;
use self::handlers::{get_health, get_metrics};

pub fn router(client: Arc<ServiceClient>) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/health/metrics", get(get_metrics))
        .with_state(client)
}
