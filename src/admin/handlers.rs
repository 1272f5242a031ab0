use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};

use crate::client::{HealthReport, HealthStatus, ServiceClient};
use crate::observability::MetricsSnapshot;

pub async fn get_health(State(client): State<Arc<ServiceClient>>) -> (StatusCode, Json<HealthReport>) {
    let report = client.health();
    let status = match report.status {
        HealthStatus::ShutDown => StatusCode::SERVICE_UNAVAILABLE,
        // Degraded still answers reads from fallbacks.
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (status, Json(report))
}

pub async fn get_metrics(State(client): State<Arc<ServiceClient>>) -> Json<MetricsSnapshot> {
    Json(client.metrics())
}
