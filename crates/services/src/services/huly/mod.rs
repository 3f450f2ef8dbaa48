//! Typed client for the Huly issue-management server.

pub mod client;
pub mod models;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::services::http::ApiError;
use models::{CreateHulyIssue, HulyIssue, HulyIssuePatch, HulyProject, IssuePage, ListIssuesOptions};

pub use client::HulyClient;

/// Seam between the phase engine and the Huly HTTP client, so scenario tests
/// can run against in-memory fakes.
#[async_trait]
pub trait HulyApi: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<HulyProject>, ApiError>;

    async fn list_issues(
        &self,
        project: &str,
        opts: &ListIssuesOptions,
    ) -> Result<IssuePage, ApiError>;

    /// Bulk fetch across projects; one page per project identifier.
    async fn list_issues_bulk(
        &self,
        projects: &[String],
        opts: &ListIssuesOptions,
    ) -> Result<HashMap<String, IssuePage>, ApiError>;

    /// 404 is `Ok(None)`, never an error.
    async fn get_issue(&self, identifier: &str) -> Result<Option<HulyIssue>, ApiError>;

    async fn get_issues_bulk(&self, identifiers: &[String]) -> Result<Vec<HulyIssue>, ApiError>;

    async fn create_issue(
        &self,
        project: &str,
        create: &CreateHulyIssue,
    ) -> Result<HulyIssue, ApiError>;

    /// Single-field update. Returns `None` when the issue is gone (404).
    async fn update_issue(
        &self,
        identifier: &str,
        field: &str,
        value: serde_json::Value,
    ) -> Result<Option<HulyIssue>, ApiError>;

    /// Partial update. Returns `None` when the issue is gone (404).
    async fn patch_issue(
        &self,
        identifier: &str,
        patch: &HulyIssuePatch,
    ) -> Result<Option<HulyIssue>, ApiError>;

    async fn delete_issue(&self, identifier: &str) -> Result<(), ApiError>;

    async fn delete_issues_bulk(&self, identifiers: &[String]) -> Result<(), ApiError>;

    async fn search_issues(&self, query: &str) -> Result<Vec<HulyIssue>, ApiError>;

    /// Re-parent (or detach, with `None`). Returns `None` on 404.
    async fn move_issue(
        &self,
        identifier: &str,
        parent: Option<&str>,
    ) -> Result<Option<HulyIssue>, ApiError>;
}
