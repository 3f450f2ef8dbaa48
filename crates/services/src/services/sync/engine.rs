//! The per-project sync engine: snapshot capture plus the serial Phase 1→4
//! drive.

use std::sync::Arc;

use chrono::DateTime;
use db::{DBService, models::project::Project};
use thiserror::Error;
use tracing::{info, warn};

use crate::services::beads::{BeadsApi, BeadsError};
use crate::services::config::SyncConfig;
use crate::services::docs::DocsExporter;
use crate::services::http::ApiError;
use crate::services::huly::HulyApi;
use crate::services::huly::models::{IssuePage, ListIssuesOptions};
use crate::services::vibe::VibeApi;

use super::snapshot::ProjectSnapshot;
use super::{PhaseContext, PhaseReport, ProjectSyncOutcome, phase1, phase2, phase3};

#[derive(Debug, Error)]
pub enum SyncEngineError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Beads(#[from] BeadsError),
}

/// Drives one project through the four phases against a snapshot captured at
/// entry. Cloneable; all handles are shared.
#[derive(Clone)]
pub struct SyncEngine {
    db: DBService,
    huly: Arc<dyn HulyApi>,
    vibe: Arc<dyn VibeApi>,
    beads: Arc<dyn BeadsApi>,
    docs: Arc<dyn DocsExporter>,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(
        db: DBService,
        huly: Arc<dyn HulyApi>,
        vibe: Arc<dyn VibeApi>,
        beads: Arc<dyn BeadsApi>,
        docs: Arc<dyn DocsExporter>,
        config: SyncConfig,
    ) -> Self {
        Self {
            db,
            huly,
            vibe,
            beads,
            docs,
            config,
        }
    }

    pub fn db(&self) -> &DBService {
        &self.db
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn huly(&self) -> &Arc<dyn HulyApi> {
        &self.huly
    }

    pub fn vibe(&self) -> &Arc<dyn VibeApi> {
        &self.vibe
    }

    pub fn beads(&self) -> &Arc<dyn BeadsApi> {
        &self.beads
    }

    /// Capture the tri-surface snapshot for a project. `prefetched` carries
    /// the page from a bulk fetch; otherwise an incremental (or full) fetch
    /// runs here.
    pub async fn capture_snapshot(
        &self,
        project: &Project,
        prefetched: Option<IssuePage>,
    ) -> Result<ProjectSnapshot, SyncEngineError> {
        let page = match prefetched {
            Some(page) => page,
            None => {
                let modified_since = if self.config.incremental_sync {
                    Project::get_huly_sync_cursor(&self.db.pool, &project.identifier)
                        .await?
                        .and_then(|iso| DateTime::parse_from_rfc3339(&iso).ok())
                        .map(|dt| dt.to_utc())
                } else {
                    None
                };
                self.huly
                    .list_issues(
                        &project.identifier,
                        &ListIssuesOptions {
                            modified_since,
                            limit: None,
                            include_sync_meta: true,
                        },
                    )
                    .await?
            }
        };

        let vibe_tasks = match project.vibe_id.as_deref() {
            Some(vibe_id) => self.vibe.list_tasks(vibe_id).await?,
            None => Vec::new(),
        };

        let project_path = project
            .filesystem_path
            .as_deref()
            .map(std::path::PathBuf::from)
            .filter(|p| p.is_dir());

        let beads_issues = match &project_path {
            Some(path) => match self.beads.snapshot(path).await {
                Ok(issues) => issues,
                Err(e) => {
                    warn!(
                        project = project.identifier.as_str(),
                        "beads snapshot failed: {e}; continuing without beads view"
                    );
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let watermark = page.latest_modified_iso();
        Ok(ProjectSnapshot {
            project: project.clone(),
            project_path,
            huly_issues: page.issues,
            vibe_tasks,
            beads_issues,
            watermark,
        })
    }

    /// Run the four phases for one project. Per-issue failures stay inside
    /// the phase reports; only snapshot capture and store failures abort.
    pub async fn sync_project(
        &self,
        project: &Project,
        prefetched: Option<IssuePage>,
    ) -> Result<ProjectSyncOutcome, SyncEngineError> {
        let snapshot = self.capture_snapshot(project, prefetched).await?;
        let issues_seen = snapshot.huly_issues.len();

        info!(
            project = project.identifier.as_str(),
            huly = snapshot.huly_issues.len(),
            vibe = snapshot.vibe_tasks.len(),
            beads = snapshot.beads_issues.len(),
            "starting project sync"
        );

        let ctx = PhaseContext {
            pool: &self.db.pool,
            huly: self.huly.as_ref(),
            vibe: self.vibe.as_ref(),
            beads: self.beads.as_ref(),
            snapshot: &snapshot,
            dry_run: self.config.dry_run,
            beads_git_push: self.config.beads_git_push,
        };

        let phase1 = phase1::run(&ctx).await?;
        let phase2 = phase2::run(&ctx, &phase1.touched).await?;
        let phase3 = phase3::run(&ctx).await?;

        let mut phase4 = PhaseReport::default();
        match self
            .docs
            .export(&project.identifier, project.letta_last_sync_at, &[])
            .await
        {
            Ok(()) => phase4.synced += 1,
            Err(e) => phase4.record_error(&project.identifier, e),
        }

        Ok(ProjectSyncOutcome {
            project_identifier: project.identifier.clone(),
            phase1: phase1.report,
            phase2,
            phase3: phase3.report,
            phase4,
            cursor: snapshot.watermark.clone(),
            issues_seen,
        })
    }

}
