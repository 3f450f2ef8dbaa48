//! The workflow fleet run by the durability layer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use db::models::issue::Issue;
use db::models::project::Project;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};
use ts_rs::TS;

use services::services::huly::models::IssuePage;

use crate::engine::{OrchestratorError, SyncOrchestrator};
use crate::models::{CycleProgress, SyncOptions};
use crate::workflow::{ActivityError, Workflow, WorkflowCtx};

impl From<OrchestratorError> for ActivityError {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::Api(api) => api.into(),
            OrchestratorError::Sync(sync) => sync.into(),
            OrchestratorError::Database(db) => ActivityError::permanent(db.to_string()),
            OrchestratorError::Cancelled => ActivityError::cancelled(),
        }
    }
}

pub const FULL_SYNC_WORKFLOW_ID: &str = "full-orchestration";
pub const SCHEDULED_SYNC_WORKFLOW_ID: &str = "scheduled-sync";
pub const RECONCILIATION_WORKFLOW_ID: &str = "data-reconciliation";

pub fn issue_sync_workflow_id(identifier: &str) -> String {
    format!("issue-sync-{identifier}")
}

pub fn beads_change_workflow_id(project_identifier: &str) -> String {
    format!("beads-change-{project_identifier}")
}

/// Webhooks coalesce per event type: concurrent deliveries of the same type
/// share one run (USE_EXISTING).
pub fn webhook_workflow_id(event_type: &str) -> String {
    format!("huly-webhook-{event_type}")
}

/// Bridge a cycle's progress channel into the workflow progress query.
fn forward_progress(ctx: &Arc<WorkflowCtx>) -> watch::Sender<CycleProgress> {
    let (tx, mut rx) = watch::channel(CycleProgress::default());
    let ctx = Arc::clone(ctx);
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let progress = rx.borrow().clone();
            ctx.set_progress(serde_json::to_value(progress).unwrap_or_default());
        }
    });
    tx
}

// ---------------------------------------------------------------------------
// Single-issue sync
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct IssueSyncInput {
    pub project_identifier: String,
    pub identifier: String,
}

pub struct IssueSyncWorkflow {
    pub orchestrator: Arc<SyncOrchestrator>,
    pub input: IssueSyncInput,
}

#[async_trait]
impl Workflow for IssueSyncWorkflow {
    fn name(&self) -> &'static str {
        "IssueSync"
    }

    async fn run(self: Box<Self>, ctx: Arc<WorkflowCtx>) -> anyhow::Result<serde_json::Value> {
        let engine = self.orchestrator.engine();
        let identifier = self.input.identifier.clone();

        let issue = ctx
            .activity("getIssue", || engine.huly().get_issue(&identifier))
            .await?;

        let Some(issue) = issue else {
            // 404 on a known identifier: tombstone and stop.
            let pool = engine.db().pool.clone();
            let id = identifier.clone();
            ctx.activity("markTombstone", move || {
                let pool = pool.clone();
                let id = id.clone();
                async move { Issue::mark_deleted_from_huly(&pool, &id).await }
            })
            .await?;
            return Ok(serde_json::json!({ "identifier": identifier, "tombstoned": true }));
        };

        let pool = engine.db().pool.clone();
        let project_identifier = self.input.project_identifier.clone();
        let project = ctx
            .activity("getProject", move || {
                let pool = pool.clone();
                let id = project_identifier.clone();
                async move { Project::find_by_identifier(&pool, &id).await }
            })
            .await?
            .ok_or_else(|| {
                ActivityError::permanent(format!(
                    "unknown project {}",
                    self.input.project_identifier
                ))
            })?;

        let page = IssuePage {
            count: 1,
            issues: vec![issue],
            sync_meta: None,
        };
        let outcome = ctx
            .activity("syncProject", || engine.sync_project(&project, Some(page.clone())))
            .await?;

        Ok(serde_json::to_value(outcome)?)
    }
}

// ---------------------------------------------------------------------------
// Full orchestration
// ---------------------------------------------------------------------------

pub struct FullOrchestrationWorkflow {
    pub orchestrator: Arc<SyncOrchestrator>,
    pub options: SyncOptions,
}

#[async_trait]
impl Workflow for FullOrchestrationWorkflow {
    fn name(&self) -> &'static str {
        "FullOrchestration"
    }

    async fn run(self: Box<Self>, ctx: Arc<WorkflowCtx>) -> anyhow::Result<serde_json::Value> {
        let progress = forward_progress(&ctx);
        let cancel = ctx.cancel_token();
        let stats = ctx
            .activity("runSyncCycle", || {
                self.orchestrator
                    .run_cycle(&self.options, Some(progress.clone()), &cancel)
            })
            .await?;
        Ok(serde_json::to_value(stats)?)
    }
}

// ---------------------------------------------------------------------------
// Scheduled (continuous) sync
// ---------------------------------------------------------------------------

pub struct ScheduledSyncWorkflow {
    pub orchestrator: Arc<SyncOrchestrator>,
    pub options: SyncOptions,
    pub interval: Duration,
    pub max_iterations: Option<u32>,
}

#[async_trait]
impl Workflow for ScheduledSyncWorkflow {
    fn name(&self) -> &'static str {
        "ScheduledSync"
    }

    async fn run(self: Box<Self>, ctx: Arc<WorkflowCtx>) -> anyhow::Result<serde_json::Value> {
        let mut iterations = 0u32;
        let cancel = ctx.cancel_token();

        // The next iteration begins only after the previous cycle returns;
        // the schedule never overlaps itself.
        loop {
            iterations += 1;
            let result = ctx
                .activity("runSyncCycle", || {
                    self.orchestrator.run_cycle(&self.options, None, &cancel)
                })
                .await;
            match result {
                Ok(stats) => info!(
                    iteration = iterations,
                    synced = stats.projects_synced,
                    "scheduled cycle completed"
                ),
                Err(e) if ctx.is_cancelled() => return Err(e.into()),
                Err(e) => warn!(iteration = iterations, "scheduled cycle failed: {e}"),
            }

            if self.max_iterations.is_some_and(|max| iterations >= max) {
                return Ok(serde_json::json!({ "iterations": iterations }));
            }
            ctx.sleep(self.interval).await?;
        }
    }
}

// ---------------------------------------------------------------------------
// Watcher-triggered sync
// ---------------------------------------------------------------------------

pub struct BeadsFileChangeWorkflow {
    pub orchestrator: Arc<SyncOrchestrator>,
    pub project_identifier: String,
    pub files: Vec<String>,
}

#[async_trait]
impl Workflow for BeadsFileChangeWorkflow {
    fn name(&self) -> &'static str {
        "BeadsFileChange"
    }

    async fn run(self: Box<Self>, ctx: Arc<WorkflowCtx>) -> anyhow::Result<serde_json::Value> {
        info!(
            project = self.project_identifier.as_str(),
            files = self.files.len(),
            "beads change sync"
        );
        let options = SyncOptions::for_project(
            self.orchestrator.engine().config(),
            self.project_identifier.clone(),
        );
        let cancel = ctx.cancel_token();
        let stats = ctx
            .activity("runSyncCycle", || {
                self.orchestrator.run_cycle(&options, None, &cancel)
            })
            .await?;
        Ok(serde_json::to_value(stats)?)
    }
}

// ---------------------------------------------------------------------------
// Webhook-triggered sync
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct HulyWebhookEvent {
    pub event_type: String,
    #[serde(default)]
    pub project_identifier: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
}

pub struct HulyWebhookChangeWorkflow {
    pub orchestrator: Arc<SyncOrchestrator>,
    pub event: HulyWebhookEvent,
}

#[async_trait]
impl Workflow for HulyWebhookChangeWorkflow {
    fn name(&self) -> &'static str {
        "HulyWebhookChange"
    }

    async fn run(self: Box<Self>, ctx: Arc<WorkflowCtx>) -> anyhow::Result<serde_json::Value> {
        info!(
            event = self.event.event_type.as_str(),
            project = ?self.event.project_identifier,
            "webhook sync"
        );

        // A webhook naming a single issue syncs just that issue; anything
        // else degrades to a (possibly filtered) full cycle.
        if let (Some(project), Some(identifier)) = (
            self.event.project_identifier.clone(),
            self.event.identifier.clone(),
        ) {
            let inner = IssueSyncWorkflow {
                orchestrator: self.orchestrator,
                input: IssueSyncInput {
                    project_identifier: project,
                    identifier,
                },
            };
            return Box::new(inner).run(ctx).await;
        }

        let config = self.orchestrator.engine().config();
        let options = match &self.event.project_identifier {
            Some(project) => SyncOptions::for_project(config, project.clone()),
            None => SyncOptions::from_config(config),
        };
        let cancel = ctx.cancel_token();
        let stats = ctx
            .activity("runSyncCycle", || {
                self.orchestrator.run_cycle(&options, None, &cancel)
            })
            .await?;
        Ok(serde_json::to_value(stats)?)
    }
}

// ---------------------------------------------------------------------------
// Reconciliation sweep
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationAction {
    /// Report stale mappings without touching them.
    #[default]
    Mark,
    /// Detach stale mappings so the next cycle can re-link or re-create.
    Clear,
}

pub struct DataReconciliationWorkflow {
    pub orchestrator: Arc<SyncOrchestrator>,
    pub dry_run: bool,
    pub action: ReconciliationAction,
}

#[async_trait]
impl Workflow for DataReconciliationWorkflow {
    fn name(&self) -> &'static str {
        "DataReconciliation"
    }

    async fn run(self: Box<Self>, ctx: Arc<WorkflowCtx>) -> anyhow::Result<serde_json::Value> {
        let engine = self.orchestrator.engine();
        let pool = engine.db().pool.clone();

        let projects = {
            let pool = pool.clone();
            ctx.activity("listProjects", move || {
                let pool = pool.clone();
                async move { Project::find_all(&pool).await }
            })
            .await?
        };

        let mut candidates: Vec<serde_json::Value> = Vec::new();
        let mut cleared = 0u32;

        for project in projects {
            ctx.checkpoint()?;
            let Some(path) = project
                .filesystem_path
                .as_deref()
                .map(std::path::PathBuf::from)
                .filter(|p| p.is_dir())
            else {
                continue;
            };

            let beads_issues = match ctx
                .activity("listBeadsIssues", || engine.beads().snapshot(&path))
                .await
            {
                Ok(issues) => issues,
                Err(e) => {
                    warn!(
                        project = project.identifier.as_str(),
                        "reconciliation snapshot failed: {e}"
                    );
                    continue;
                }
            };
            let live_ids: std::collections::HashSet<&str> =
                beads_issues.iter().map(|b| b.id.as_str()).collect();

            let rows = {
                let pool = pool.clone();
                let identifier = project.identifier.clone();
                ctx.activity("getProjectIssues", move || {
                    let pool = pool.clone();
                    let identifier = identifier.clone();
                    async move { Issue::find_by_project(&pool, &identifier).await }
                })
                .await?
            };

            for row in rows {
                let Some(beads_id) = row.beads_issue_id.as_deref() else {
                    continue;
                };
                if live_ids.contains(beads_id) {
                    continue;
                }

                // Snapshot dumps can lag the database; a point read decides
                // whether the mapping is truly stale.
                match ctx
                    .activity("showBeadsIssue", || engine.beads().show_issue(&path, beads_id))
                    .await
                {
                    Ok(Some(_)) => continue,
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            project = project.identifier.as_str(),
                            beads_id, "stale-mapping check failed: {e}"
                        );
                        continue;
                    }
                }

                candidates.push(serde_json::json!({
                    "project": project.identifier,
                    "identifier": row.identifier,
                    "beadsIssueId": beads_id,
                }));

                if !self.dry_run && self.action == ReconciliationAction::Clear {
                    let pool = pool.clone();
                    let identifier = row.identifier.clone();
                    ctx.activity("clearBeadsMapping", move || {
                        let pool = pool.clone();
                        let identifier = identifier.clone();
                        async move { Issue::clear_beads_mapping(&pool, &identifier).await }
                    })
                    .await?;
                    cleared += 1;
                }
            }
        }

        info!(
            stale = candidates.len(),
            cleared, "reconciliation sweep complete"
        );
        Ok(serde_json::json!({
            "candidates": candidates,
            "cleared": cleared,
        }))
    }
}
