//! Health handler

use crate::api::rest::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use envsched_connection::ConnectionHealth;
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
    pub runtime: ConnectionHealth,
}

/// Health check endpoint; 503 while the runtime connection is not healthy
pub async fn health_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<HealthCheckResponse>) {
    let runtime = state.service.connection_health();
    let (code, status) = if runtime.healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(HealthCheckResponse {
            status: status.to_string(),
            version: state.version.clone(),
            uptime: state.uptime(),
            runtime,
        }),
    )
}
