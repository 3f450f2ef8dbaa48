//! Huly webhook intake.

use std::sync::Arc;

use axum::{
    Json, Router, extract::State, response::Json as ResponseJson, routing::post,
};
use orchestrator::ConflictPolicy;
use orchestrator::workflows::{HulyWebhookChangeWorkflow, HulyWebhookEvent, webhook_workflow_id};
use serde::Serialize;
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAccepted {
    pub workflow_id: String,
}

/// Accept a Huly change event. Events of the same type coalesce into one
/// running workflow, which is the back-pressure story for webhook bursts.
pub async fn huly_webhook(
    State(state): State<AppState>,
    Json(event): Json<HulyWebhookEvent>,
) -> Result<ResponseJson<ApiResponse<WebhookAccepted>>, ApiError> {
    if event.event_type.is_empty() {
        return Err(ApiError::BadRequest("eventType is required".to_string()));
    }

    let id = webhook_workflow_id(&event.event_type);
    let workflow = HulyWebhookChangeWorkflow {
        orchestrator: Arc::clone(&state.orchestrator),
        event,
    };
    let handle = state
        .runner
        .submit(&id, ConflictPolicy::UseExisting, Box::new(workflow));

    Ok(ResponseJson(ApiResponse::success(WebhookAccepted {
        workflow_id: handle.id,
    })))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/huly", post(huly_webhook))
}
