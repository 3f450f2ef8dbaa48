use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use utils::metrics::MetricsRegistry;

use crate::services::http::{ApiError, CallTimer, read_json};

use super::HulyApi;
use super::models::{
    CreateHulyIssue, HulyIssue, HulyIssuePatch, HulyProject, IssuePage, ListIssuesOptions,
};

const COMPONENT: &str = "huly";

/// REST client for the Huly server. All calls go through the shared pooled
/// HTTP client and record per-operation latency.
#[derive(Debug, Clone)]
pub struct HulyClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    metrics: MetricsRegistry,
}

impl HulyClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        token: Option<String>,
        metrics: MetricsRegistry,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            metrics,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request, classify failures, unwrap 404 to `None`.
    async fn send<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Option<T>, ApiError> {
        let _timer = CallTimer::start(&self.metrics, COMPONENT, operation);
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest(COMPONENT, operation, e))?;
        read_json(COMPONENT, operation, response).await
    }

    /// Variant for endpoints where 404 is unexpected and means a broken
    /// deployment rather than a missing entity.
    async fn send_required<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T, ApiError> {
        self.send(operation, request).await?.ok_or_else(|| {
            ApiError::invalid_response(COMPONENT, operation, "unexpected 404 from server")
        })
    }

    fn list_query(opts: &ListIssuesOptions) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(since) = opts.modified_since {
            query.push(("modifiedSince", since.timestamp_millis().to_string()));
        }
        if let Some(limit) = opts.limit {
            query.push(("limit", limit.to_string()));
        }
        if opts.include_sync_meta {
            query.push(("includeSyncMeta", "true".to_string()));
        }
        query
    }
}

#[async_trait]
impl HulyApi for HulyClient {
    async fn list_projects(&self) -> Result<Vec<HulyProject>, ApiError> {
        self.send_required("listProjects", self.http.get(self.url("/api/projects")))
            .await
    }

    async fn list_issues(
        &self,
        project: &str,
        opts: &ListIssuesOptions,
    ) -> Result<IssuePage, ApiError> {
        let request = self
            .http
            .get(self.url(&format!("/api/projects/{project}/issues")))
            .query(&Self::list_query(opts));
        self.send_required("listIssues", request).await
    }

    async fn list_issues_bulk(
        &self,
        projects: &[String],
        opts: &ListIssuesOptions,
    ) -> Result<HashMap<String, IssuePage>, ApiError> {
        let body = serde_json::json!({
            "projects": projects,
            "modifiedSince": opts.modified_since.map(|t| t.timestamp_millis()),
            "limit": opts.limit,
            "includeSyncMeta": opts.include_sync_meta,
        });
        let request = self.http.post(self.url("/api/issues/bulk-list")).json(&body);
        self.send_required("listIssuesBulk", request).await
    }

    async fn get_issue(&self, identifier: &str) -> Result<Option<HulyIssue>, ApiError> {
        self.send(
            "getIssue",
            self.http.get(self.url(&format!("/api/issues/{identifier}"))),
        )
        .await
    }

    async fn get_issues_bulk(&self, identifiers: &[String]) -> Result<Vec<HulyIssue>, ApiError> {
        let body = serde_json::json!({ "identifiers": identifiers });
        let request = self.http.post(self.url("/api/issues/bulk-get")).json(&body);
        self.send_required("getIssuesBulk", request).await
    }

    async fn create_issue(
        &self,
        project: &str,
        create: &CreateHulyIssue,
    ) -> Result<HulyIssue, ApiError> {
        let request = self
            .http
            .post(self.url(&format!("/api/projects/{project}/issues")))
            .json(create);
        self.send_required("createIssue", request).await
    }

    async fn update_issue(
        &self,
        identifier: &str,
        field: &str,
        value: serde_json::Value,
    ) -> Result<Option<HulyIssue>, ApiError> {
        let body = serde_json::json!({ "field": field, "value": value });
        let request = self
            .http
            .put(self.url(&format!("/api/issues/{identifier}")))
            .json(&body);
        self.send("updateIssue", request).await
    }

    async fn patch_issue(
        &self,
        identifier: &str,
        patch: &HulyIssuePatch,
    ) -> Result<Option<HulyIssue>, ApiError> {
        let request = self
            .http
            .patch(self.url(&format!("/api/issues/{identifier}")))
            .json(patch);
        self.send("patchIssue", request).await
    }

    async fn delete_issue(&self, identifier: &str) -> Result<(), ApiError> {
        // Deleting an already-deleted issue is a no-op, so the 404 → None
        // translation applies here too.
        let _: Option<serde_json::Value> = self
            .send(
                "deleteIssue",
                self.http.delete(self.url(&format!("/api/issues/{identifier}"))),
            )
            .await?;
        Ok(())
    }

    async fn delete_issues_bulk(&self, identifiers: &[String]) -> Result<(), ApiError> {
        let body = serde_json::json!({ "identifiers": identifiers });
        let request = self
            .http
            .post(self.url("/api/issues/bulk-delete"))
            .json(&body);
        let _: serde_json::Value = self.send_required("deleteIssuesBulk", request).await?;
        Ok(())
    }

    async fn search_issues(&self, query: &str) -> Result<Vec<HulyIssue>, ApiError> {
        let body = serde_json::json!({ "query": query });
        let request = self.http.post(self.url("/api/issues/search")).json(&body);
        self.send_required("searchIssues", request).await
    }

    async fn move_issue(
        &self,
        identifier: &str,
        parent: Option<&str>,
    ) -> Result<Option<HulyIssue>, ApiError> {
        let body = serde_json::json!({ "parent": parent });
        let request = self
            .http
            .post(self.url(&format!("/api/issues/{identifier}/move")))
            .json(&body);
        self.send("moveIssue", request).await
    }
}
