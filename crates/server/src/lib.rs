pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use db::DBService;
use orchestrator::{SyncOrchestrator, WorkflowRunner};
use services::services::config::SyncConfig;
use utils::metrics::MetricsRegistry;

/// Process-wide handles injected into every route.
#[derive(Clone)]
pub struct AppState {
    pub db: DBService,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub runner: WorkflowRunner,
    pub metrics: MetricsRegistry,
    pub config: SyncConfig,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api", routes::router())
        .with_state(state)
}
