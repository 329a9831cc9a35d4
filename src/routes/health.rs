//! Health check endpoint

use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::ApiState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// `up` or `degraded`
    pub status: String,
    /// `ok` or `error`
    pub database: String,
    pub service: String,
    pub version: String,
}

/// Health check and database connectivity test
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service status", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let database = match state.store.health.ping().await {
        Ok(()) => "ok",
        Err(e) => {
            // Logged only; the response must not carry connection details
            tracing::warn!("Health check database probe failed: {}", e);
            "error"
        }
    };

    Json(HealthResponse {
        status: if database == "ok" { "up" } else { "degraded" }.into(),
        database: database.into(),
        service: "atlas-api".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}
