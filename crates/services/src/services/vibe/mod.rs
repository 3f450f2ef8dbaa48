//! Typed client for the Vibe task-board server.

pub mod client;
pub mod models;

use async_trait::async_trait;

use crate::services::http::ApiError;
use models::{CreateVibeProject, CreateVibeTask, UpdateVibeTask, VibeProject, VibeTask};

pub use client::VibeClient;

/// Seam between the phase engine and the Vibe HTTP client.
///
/// Only the surface the sync pipeline exercises is abstracted; the
/// attempt/process/dev-server lifecycle stays on the concrete client.
#[async_trait]
pub trait VibeApi: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<VibeProject>, ApiError>;

    async fn create_project(&self, create: &CreateVibeProject) -> Result<VibeProject, ApiError>;

    async fn list_tasks(&self, project_id: &str) -> Result<Vec<VibeTask>, ApiError>;

    async fn get_task(&self, task_id: &str) -> Result<Option<VibeTask>, ApiError>;

    async fn create_task(&self, create: &CreateVibeTask) -> Result<VibeTask, ApiError>;

    async fn update_task(
        &self,
        task_id: &str,
        update: &UpdateVibeTask,
    ) -> Result<Option<VibeTask>, ApiError>;

    async fn delete_task(&self, task_id: &str) -> Result<(), ApiError>;
}
