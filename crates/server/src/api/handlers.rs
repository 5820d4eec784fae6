//! Health and operational endpoints.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::metrics;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /metrics
///
/// Prometheus text exposition.
pub async fn get_metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        metrics::render(),
    )
}

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub max_concurrent: usize,
    pub max_retries: u32,
    pub remove_partial_on_cancel: bool,
    pub subprocess_command: String,
}

/// GET /api/v1/config
///
/// The operational subset of the configuration.
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<ConfigResponse> {
    let downloads = &state.config().downloads;
    Json(ConfigResponse {
        max_concurrent: downloads.max_concurrent,
        max_retries: downloads.max_retries,
        remove_partial_on_cancel: downloads.remove_partial_on_cancel,
        subprocess_command: downloads.subprocess.command.clone(),
    })
}
