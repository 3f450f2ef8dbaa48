use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use utils::{metrics::MetricsRegistry, response::ApiResponse};

use crate::services::http::{ApiError, CallTimer};

use super::VibeApi;
use super::models::{
    CreateTaskAttempt, CreateVibeProject, CreateVibeTask, DevServer, ExecutionProcess,
    TaskAttempt, UpdateVibeTask, VibeProject, VibeTask,
};

const COMPONENT: &str = "vibe";

/// REST client for the Vibe server. Every payload arrives wrapped in the
/// `{success, data, message}` envelope, which is unwrapped here and never
/// leaks past the client boundary.
#[derive(Debug, Clone)]
pub struct VibeClient {
    http: reqwest::Client,
    base_url: String,
    metrics: MetricsRegistry,
}

impl VibeClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, metrics: MetricsRegistry) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            metrics,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request and unwrap the envelope. 404 is `Ok(None)`.
    async fn send<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Option<T>, ApiError> {
        let _timer = CallTimer::start(&self.metrics, COMPONENT, operation);
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest(COMPONENT, operation, e))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::HttpStatus {
                component: COMPONENT,
                operation: operation.to_string(),
                status: status.as_u16(),
                message,
            });
        }

        let envelope: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| ApiError::invalid_response(COMPONENT, operation, e.to_string()))?;
        envelope
            .into_result()
            .map(Some)
            .map_err(|message| ApiError::invalid_response(COMPONENT, operation, message))
    }

    async fn send_required<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T, ApiError> {
        self.send(operation, request).await?.ok_or_else(|| {
            ApiError::invalid_response(COMPONENT, operation, "unexpected 404 from server")
        })
    }

    // ============ Projects (beyond the sync seam) ============

    pub async fn update_project(
        &self,
        project_id: &str,
        name: &str,
    ) -> Result<Option<VibeProject>, ApiError> {
        let body = serde_json::json!({ "name": name });
        let request = self
            .http
            .put(self.url(&format!("/api/projects/{project_id}")))
            .json(&body);
        self.send("updateProject", request).await
    }

    pub async fn delete_project(&self, project_id: &str) -> Result<(), ApiError> {
        let _: Option<serde_json::Value> = self
            .send(
                "deleteProject",
                self.http.delete(self.url(&format!("/api/projects/{project_id}"))),
            )
            .await?;
        Ok(())
    }

    // ============ Task attempts ============

    pub async fn start_task_attempt(
        &self,
        task_id: &str,
        create: &CreateTaskAttempt,
    ) -> Result<TaskAttempt, ApiError> {
        let request = self
            .http
            .post(self.url(&format!("/api/tasks/{task_id}/attempts")))
            .json(create);
        self.send_required("startTaskAttempt", request).await
    }

    pub async fn list_task_attempts(&self, task_id: &str) -> Result<Vec<TaskAttempt>, ApiError> {
        self.send_required(
            "listTaskAttempts",
            self.http.get(self.url(&format!("/api/tasks/{task_id}/attempts"))),
        )
        .await
    }

    pub async fn get_task_attempt(&self, attempt_id: &str) -> Result<Option<TaskAttempt>, ApiError> {
        self.send(
            "getTaskAttempt",
            self.http.get(self.url(&format!("/api/attempts/{attempt_id}"))),
        )
        .await
    }

    pub async fn merge_task_attempt(&self, attempt_id: &str) -> Result<TaskAttempt, ApiError> {
        self.send_required(
            "mergeTaskAttempt",
            self.http.post(self.url(&format!("/api/attempts/{attempt_id}/merge"))),
        )
        .await
    }

    pub async fn followup_task_attempt(
        &self,
        attempt_id: &str,
        prompt: &str,
    ) -> Result<TaskAttempt, ApiError> {
        let body = serde_json::json!({ "prompt": prompt });
        let request = self
            .http
            .post(self.url(&format!("/api/attempts/{attempt_id}/followup")))
            .json(&body);
        self.send_required("followupTaskAttempt", request).await
    }

    // ============ Execution processes ============

    pub async fn get_execution_process(
        &self,
        process_id: &str,
    ) -> Result<Option<ExecutionProcess>, ApiError> {
        self.send(
            "getExecutionProcess",
            self.http.get(self.url(&format!("/api/processes/{process_id}"))),
        )
        .await
    }

    pub async fn stop_execution_process(&self, process_id: &str) -> Result<(), ApiError> {
        let _: Option<serde_json::Value> = self
            .send(
                "stopExecutionProcess",
                self.http.post(self.url(&format!("/api/processes/{process_id}/stop"))),
            )
            .await?;
        Ok(())
    }

    pub async fn get_execution_process_logs(&self, process_id: &str) -> Result<String, ApiError> {
        self.send_required(
            "getExecutionProcessLogs",
            self.http.get(self.url(&format!("/api/processes/{process_id}/logs"))),
        )
        .await
    }

    // ============ Dev server ============

    pub async fn start_dev_server(&self, project_id: &str) -> Result<DevServer, ApiError> {
        self.send_required(
            "startDevServer",
            self.http.post(self.url(&format!("/api/projects/{project_id}/dev-server/start"))),
        )
        .await
    }

    pub async fn stop_dev_server(&self, project_id: &str) -> Result<DevServer, ApiError> {
        self.send_required(
            "stopDevServer",
            self.http.post(self.url(&format!("/api/projects/{project_id}/dev-server/stop"))),
        )
        .await
    }
}

#[async_trait]
impl VibeApi for VibeClient {
    async fn list_projects(&self) -> Result<Vec<VibeProject>, ApiError> {
        self.send_required("listProjects", self.http.get(self.url("/api/projects")))
            .await
    }

    async fn create_project(&self, create: &CreateVibeProject) -> Result<VibeProject, ApiError> {
        let request = self.http.post(self.url("/api/projects")).json(create);
        self.send_required("createProject", request).await
    }

    async fn list_tasks(&self, project_id: &str) -> Result<Vec<VibeTask>, ApiError> {
        self.send_required(
            "listTasks",
            self.http
                .get(self.url("/api/tasks"))
                .query(&[("project_id", project_id)]),
        )
        .await
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<VibeTask>, ApiError> {
        self.send(
            "getTask",
            self.http.get(self.url(&format!("/api/tasks/{task_id}"))),
        )
        .await
    }

    async fn create_task(&self, create: &CreateVibeTask) -> Result<VibeTask, ApiError> {
        let request = self.http.post(self.url("/api/tasks")).json(create);
        self.send_required("createTask", request).await
    }

    async fn update_task(
        &self,
        task_id: &str,
        update: &UpdateVibeTask,
    ) -> Result<Option<VibeTask>, ApiError> {
        let request = self
            .http
            .put(self.url(&format!("/api/tasks/{task_id}")))
            .json(update);
        self.send("updateTask", request).await
    }

    async fn delete_task(&self, task_id: &str) -> Result<(), ApiError> {
        let _: Option<serde_json::Value> = self
            .send(
                "deleteTask",
                self.http.delete(self.url(&format!("/api/tasks/{task_id}"))),
            )
            .await?;
        Ok(())
    }
}
