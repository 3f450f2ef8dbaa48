//! Project inventory and the file-tracking rows consumed by the external
//! AST indexer.

use axum::{
    Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::get,
};
use db::models::{project::Project, project_file::ProjectFile};
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

pub async fn list_projects(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Vec<Project>>>, ApiError> {
    let projects = Project::find_all(&state.db.pool).await?;
    Ok(ResponseJson(ApiResponse::success(projects)))
}

/// Content-hashed file rows for one project. Written by the sync cycle,
/// read only from here.
pub async fn list_project_files(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<ResponseJson<ApiResponse<Vec<ProjectFile>>>, ApiError> {
    let project = Project::find_by_identifier(&state.db.pool, &identifier)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("project {identifier} not found")))?;

    let files = ProjectFile::find_by_project(&state.db.pool, &project.identifier).await?;
    Ok(ResponseJson(ApiResponse::success(files)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/projects", get(list_projects))
        .route("/projects/{identifier}/files", get(list_project_files))
}
