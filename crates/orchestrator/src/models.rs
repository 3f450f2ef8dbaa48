use serde::{Deserialize, Serialize};
use services::services::config::SyncConfig;
use services::services::sync::ProjectSyncOutcome;
use ts_rs::TS;

/// Per-cycle inputs of the cross-project driver.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct SyncOptions {
    /// Restrict the cycle to one project, matched by identifier or by a
    /// fragment of its filesystem path.
    pub project_identifier: Option<String>,
    pub dry_run: bool,
    pub skip_empty: bool,
    pub parallel: bool,
    pub max_workers: usize,
}

impl SyncOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            project_identifier: None,
            dry_run: config.dry_run,
            skip_empty: config.skip_empty_projects,
            parallel: config.parallel_sync,
            max_workers: config.max_workers,
        }
    }

    pub fn for_project(config: &SyncConfig, identifier: impl Into<String>) -> Self {
        Self {
            project_identifier: Some(identifier.into()),
            ..Self::from_config(config)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum ProjectSyncStatus {
    Synced,
    Skipped,
    Errored,
}

/// One project's result inside a cycle.
#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct ProjectOutcome {
    pub project_identifier: String,
    pub status: ProjectSyncStatus,
    pub outcome: Option<ProjectSyncOutcome>,
    pub error: Option<String>,
}

/// Aggregate result of one full cycle, mirrored into the sync-run table.
#[derive(Debug, Clone, Default, Serialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct CycleStats {
    pub run_id: i64,
    pub projects_synced: i64,
    pub projects_skipped: i64,
    pub projects_failed: i64,
    pub issues_synced: i64,
    pub issues_errored: i64,
}

/// Live progress exposed through the workflow `progress` query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct CycleProgress {
    pub total_projects: usize,
    pub completed_projects: usize,
    pub current_project: Option<String>,
}

/// Events broadcast while a cycle runs.
#[derive(Debug, Clone, Serialize, TS)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    CycleStarted { run_id: i64 },
    ProjectCompleted { outcome: ProjectOutcome },
    CycleCompleted { stats: CycleStats },
}
