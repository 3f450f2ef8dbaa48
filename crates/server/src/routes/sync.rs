//! Manual sync triggering, progress query, cancellation, and run history.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::sync_run::SyncRun;
use orchestrator::workflows::{FULL_SYNC_WORKFLOW_ID, FullOrchestrationWorkflow};
use orchestrator::{ConflictPolicy, SyncOptions};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

#[derive(Debug, Clone, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSyncQuery {
    pub project: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSyncResponse {
    pub workflow_id: String,
    pub coalesced: bool,
}

/// Kick off a full orchestration cycle. Concurrent triggers coalesce into
/// the running cycle.
pub async fn trigger_sync(
    State(state): State<AppState>,
    Query(query): Query<TriggerSyncQuery>,
) -> Result<ResponseJson<ApiResponse<TriggerSyncResponse>>, ApiError> {
    let mut options = SyncOptions::from_config(&state.config);
    options.project_identifier = query.project;
    options.dry_run = options.dry_run || query.dry_run;

    let already_running = state.runner.get(FULL_SYNC_WORKFLOW_ID).is_some();
    let workflow = FullOrchestrationWorkflow {
        orchestrator: Arc::clone(&state.orchestrator),
        options,
    };
    let handle = state.runner.submit(
        FULL_SYNC_WORKFLOW_ID,
        ConflictPolicy::UseExisting,
        Box::new(workflow),
    );

    Ok(ResponseJson(ApiResponse::success(TriggerSyncResponse {
        workflow_id: handle.id,
        coalesced: already_running,
    })))
}

pub async fn sync_progress(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<serde_json::Value>>, ApiError> {
    let handle = state
        .runner
        .get(FULL_SYNC_WORKFLOW_ID)
        .ok_or_else(|| ApiError::NotFound("no sync in flight".to_string()))?;
    Ok(ResponseJson(ApiResponse::success(handle.progress())))
}

pub async fn cancel_sync(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<bool>>, ApiError> {
    Ok(ResponseJson(ApiResponse::success(
        state.runner.cancel(FULL_SYNC_WORKFLOW_ID),
    )))
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct RunsQuery {
    pub limit: Option<i64>,
}

pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<RunsQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<SyncRun>>>, ApiError> {
    let limit = query.limit.unwrap_or(20).clamp(1, 200);
    let runs = SyncRun::find_recent(&state.db.pool, limit).await?;
    Ok(ResponseJson(ApiResponse::success(runs)))
}

pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<ResponseJson<ApiResponse<SyncRun>>, ApiError> {
    let run = SyncRun::find_by_id(&state.db.pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("sync run {id} not found")))?;
    Ok(ResponseJson(ApiResponse::success(run)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sync", post(trigger_sync))
        .route("/sync/progress", get(sync_progress))
        .route("/sync/cancel", post(cancel_sync))
        .route("/sync/runs", get(list_runs))
        .route("/sync/runs/{id}", get(get_run))
}
