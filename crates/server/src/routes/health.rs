//! Liveness and metrics endpoints.

use axum::{Router, extract::State, response::Json as ResponseJson, routing::get};
use serde::Serialize;
use services::services::beads::BeadsApi;
use ts_rs::TS;
use utils::metrics::LatencySnapshot;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub workflows_in_flight: usize,
    pub beads_cli_available: bool,
}

pub async fn health(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<HealthResponse>>, ApiError> {
    Ok(ResponseJson(ApiResponse::success(HealthResponse {
        status: "ok",
        workflows_in_flight: state.runner.in_flight(),
        beads_cli_available: state.orchestrator.engine().beads().is_available(),
    })))
}

pub async fn metrics(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Vec<LatencySnapshot>>>, ApiError> {
    Ok(ResponseJson(ApiResponse::success(state.metrics.snapshot())))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
}
