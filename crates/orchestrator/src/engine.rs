//! The cross-project driver: one full cycle over the tracked fleet.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use db::models::issue::Issue;
use db::models::project::{Project, ProjectAttrs};
use db::models::project_file::ProjectFile;
use db::models::sync_run::{SyncRun, SyncRunError, SyncRunStats, SyncRunStatus};
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use services::services::beads::git::detect_git_url;
use services::services::http::ApiError;
use services::services::huly::models::{HulyProject, IssuePage, ListIssuesOptions};
use services::services::letta::{self, LettaSettings};
use services::services::sync::{SyncEngine, SyncEngineError};
use services::services::vibe::models::{CreateVibeProject, VibeProject};

use crate::models::{
    CycleProgress, CycleStats, OrchestratorEvent, ProjectOutcome, ProjectSyncStatus, SyncOptions,
};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Sync(#[from] SyncEngineError),
    #[error("cycle cancelled")]
    Cancelled,
}

/// Drives full cycles across the project fleet and keeps the sync-run
/// bookkeeping. One instance per process; cycles never overlap themselves
/// (the durability layer enforces that via workflow-id uniqueness).
pub struct SyncOrchestrator {
    engine: SyncEngine,
    events: broadcast::Sender<OrchestratorEvent>,
}

impl SyncOrchestrator {
    pub fn new(engine: SyncEngine) -> Self {
        let (events, _) = broadcast::channel(256);
        Self { engine, events }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: OrchestratorEvent) {
        let _ = self.events.send(event);
    }

    /// One full cycle (§steps: start run, discover projects, fetch, per
    /// project phases, bookkeeping, complete run).
    pub async fn run_cycle(
        &self,
        options: &SyncOptions,
        progress: Option<watch::Sender<CycleProgress>>,
        cancel: &CancellationToken,
    ) -> Result<CycleStats, OrchestratorError> {
        let pool = &self.engine.db().pool;
        let run = SyncRun::start(pool).await?;
        self.emit(OrchestratorEvent::CycleStarted { run_id: run.id });
        info!(run_id = run.id, "sync cycle started");

        let result = self
            .run_cycle_inner(options, progress, cancel, run.id)
            .await;

        match result {
            Ok((stats, errors)) => {
                let status = if stats.projects_failed > 0 || stats.issues_errored > 0 {
                    SyncRunStatus::CompletedWithErrors
                } else {
                    SyncRunStatus::Completed
                };
                let run_stats = SyncRunStats {
                    projects_synced: stats.projects_synced,
                    projects_failed: stats.projects_failed,
                    issues_synced: stats.issues_synced,
                    issues_errored: stats.issues_errored,
                };
                SyncRun::complete(pool, run.id, status, &run_stats, &errors).await?;
                self.emit(OrchestratorEvent::CycleCompleted {
                    stats: stats.clone(),
                });
                info!(
                    run_id = run.id,
                    synced = stats.projects_synced,
                    failed = stats.projects_failed,
                    "sync cycle completed"
                );
                Ok(stats)
            }
            Err(e) => {
                SyncRun::complete(
                    pool,
                    run.id,
                    SyncRunStatus::Failed,
                    &SyncRunStats::default(),
                    &[SyncRunError {
                        project_identifier: String::new(),
                        issue_identifier: None,
                        phase: None,
                        message: e.to_string(),
                    }],
                )
                .await?;
                Err(e)
            }
        }
    }

    async fn run_cycle_inner(
        &self,
        options: &SyncOptions,
        progress: Option<watch::Sender<CycleProgress>>,
        cancel: &CancellationToken,
        run_id: i64,
    ) -> Result<(CycleStats, Vec<SyncRunError>), OrchestratorError> {
        let pool = &self.engine.db().pool;
        let config = self.engine.config().clone();

        // Discover the fleet and make sure both boards know every project.
        let huly_projects = self.engine_huly_projects().await?;
        let vibe_projects = self.engine_vibe_projects().await?;
        for huly_project in &huly_projects {
            self.ensure_project(huly_project, &vibe_projects, &config.projects_root)
                .await?;
        }

        // Build the project set for this cycle.
        let mut projects = Project::find_all(pool).await?;
        if let Some(filter) = &options.project_identifier {
            projects.retain(|p| {
                p.identifier.eq_ignore_ascii_case(filter)
                    || p.filesystem_path
                        .as_deref()
                        .is_some_and(|path| path.contains(filter.as_str()))
            });
        }
        let mut skipped = 0i64;
        if options.skip_empty {
            let before = projects.len();
            projects.retain(|p| !p.is_empty);
            skipped = (before - projects.len()) as i64;
        }

        // Incremental bulk fetch: at most two bulk calls, per-project
        // fallback on error.
        let mut prefetched = self.bulk_fetch(&projects, config.incremental_sync).await;

        if let Some(progress) = &progress {
            let _ = progress.send(CycleProgress {
                total_projects: projects.len(),
                completed_projects: 0,
                current_project: None,
            });
        }

        let stats = Arc::new(Mutex::new(CycleStats {
            run_id,
            projects_skipped: skipped,
            ..CycleStats::default()
        }));
        let errors = Arc::new(Mutex::new(Vec::<SyncRunError>::new()));
        let completed = Arc::new(Mutex::new(0usize));
        let total = projects.len();

        let concurrency = if options.parallel {
            options.max_workers.max(1)
        } else {
            1
        };

        let jobs = projects.into_iter().map(|project| {
            let page = prefetched
                .as_mut()
                .and_then(|pages| pages.remove(&project.identifier));
            let stats = Arc::clone(&stats);
            let errors = Arc::clone(&errors);
            let completed = Arc::clone(&completed);
            let progress = progress.clone();
            let cancel = cancel.clone();
            async move {
                if cancel.is_cancelled() {
                    return;
                }
                let outcome = self.sync_one_project(&project, page).await;
                self.emit(OrchestratorEvent::ProjectCompleted {
                    outcome: outcome.clone(),
                });

                let mut stats = stats.lock().await;
                let mut errors = errors.lock().await;
                match &outcome.status {
                    ProjectSyncStatus::Synced => {
                        stats.projects_synced += 1;
                        if let Some(result) = &outcome.outcome {
                            stats.issues_synced += result.total_synced() as i64;
                            stats.issues_errored += result.total_errors() as i64;
                            for (phase, message) in result.phase_errors() {
                                errors.push(SyncRunError {
                                    project_identifier: project.identifier.clone(),
                                    issue_identifier: None,
                                    phase: Some(phase.to_string()),
                                    message: message.clone(),
                                });
                            }
                        }
                    }
                    ProjectSyncStatus::Skipped => stats.projects_skipped += 1,
                    ProjectSyncStatus::Errored => {
                        stats.projects_failed += 1;
                        errors.push(SyncRunError {
                            project_identifier: project.identifier.clone(),
                            issue_identifier: None,
                            phase: None,
                            message: outcome.error.clone().unwrap_or_default(),
                        });
                    }
                }
                drop(errors);
                drop(stats);

                let mut completed = completed.lock().await;
                *completed += 1;
                if let Some(progress) = &progress {
                    let _ = progress.send(CycleProgress {
                        total_projects: total,
                        completed_projects: *completed,
                        current_project: Some(project.identifier.clone()),
                    });
                }
            }
        });

        stream::iter(jobs)
            .buffer_unordered(concurrency)
            .collect::<Vec<()>>()
            .await;

        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }

        let stats = stats.lock().await.clone();
        let errors = errors.lock().await.clone();
        Ok((stats, errors))
    }

    async fn engine_huly_projects(&self) -> Result<Vec<HulyProject>, OrchestratorError> {
        Ok(self.engine.huly().list_projects().await?)
    }

    async fn engine_vibe_projects(&self) -> Result<Vec<VibeProject>, OrchestratorError> {
        Ok(self.engine.vibe().list_projects().await?)
    }

    /// Upsert the project row, pair it with a Vibe project (create by name
    /// when missing), and resolve filesystem path and git URL lazily.
    async fn ensure_project(
        &self,
        huly_project: &HulyProject,
        vibe_projects: &[VibeProject],
        projects_root: &Path,
    ) -> Result<Project, OrchestratorError> {
        let pool = &self.engine.db().pool;
        let existing = Project::find_by_identifier(pool, &huly_project.identifier).await?;

        let vibe_id = match existing.as_ref().and_then(|p| p.vibe_id.clone()) {
            Some(id) => Some(id),
            None => {
                let found = vibe_projects
                    .iter()
                    .find(|vp| vp.name.eq_ignore_ascii_case(&huly_project.name));
                match found {
                    Some(vp) => Some(vp.id.clone()),
                    None => {
                        let created = self
                            .engine
                            .vibe()
                            .create_project(&CreateVibeProject {
                                name: huly_project.name.clone(),
                            })
                            .await?;
                        info!(
                            project = huly_project.identifier.as_str(),
                            vibe_id = created.id.as_str(),
                            "created vibe project"
                        );
                        Some(created.id)
                    }
                }
            }
        };

        let filesystem_path = match existing.as_ref().and_then(|p| p.filesystem_path.clone()) {
            Some(path) => Some(path),
            None => {
                let discovered = discover_project_path(projects_root, &huly_project.identifier);
                if let Some(path) = &discovered {
                    // First sighting of the working tree: idempotent beads
                    // bring-up (init, hooks, merge driver).
                    if let Err(e) = self.engine.beads().ensure_initialized(path).await {
                        warn!(
                            project = huly_project.identifier.as_str(),
                            "beads init failed: {e}"
                        );
                    }
                }
                discovered.map(|p| p.to_string_lossy().to_string())
            }
        };

        let git_url = match existing.as_ref().and_then(|p| p.git_url.clone()) {
            Some(url) => Some(url),
            None => filesystem_path
                .as_deref()
                .and_then(|path| detect_git_url(Path::new(path))),
        };

        Ok(Project::upsert(
            pool,
            &huly_project.identifier,
            &ProjectAttrs {
                name: Some(huly_project.name.clone()),
                vibe_id,
                filesystem_path,
                git_url,
            },
        )
        .await?)
    }

    /// §4.5: at most two bulk calls — one windowed at the oldest stored
    /// cursor for cursor-bearing projects, one full for the rest. `None`
    /// means the bulk path is unavailable and per-project fetches apply.
    async fn bulk_fetch(
        &self,
        projects: &[Project],
        incremental: bool,
    ) -> Option<HashMap<String, IssuePage>> {
        let mut with_cursor: Vec<&Project> = Vec::new();
        let mut without_cursor: Vec<&Project> = Vec::new();
        for project in projects {
            if incremental && project.huly_sync_cursor.is_some() {
                with_cursor.push(project);
            } else {
                without_cursor.push(project);
            }
        }

        let mut pages = HashMap::new();

        if !with_cursor.is_empty() {
            let min_cursor: Option<DateTime<Utc>> = with_cursor
                .iter()
                .filter_map(|p| p.huly_sync_cursor.as_deref())
                .filter_map(|iso| DateTime::parse_from_rfc3339(iso).ok())
                .map(|dt| dt.to_utc())
                .min();
            let identifiers: Vec<String> =
                with_cursor.iter().map(|p| p.identifier.clone()).collect();
            match self
                .engine
                .huly()
                .list_issues_bulk(
                    &identifiers,
                    &ListIssuesOptions {
                        modified_since: min_cursor,
                        limit: None,
                        include_sync_meta: true,
                    },
                )
                .await
            {
                Ok(result) => pages.extend(result),
                Err(e) => {
                    warn!("bulk issue fetch failed, falling back to per-project: {e}");
                    return None;
                }
            }
        }

        if !without_cursor.is_empty() {
            let identifiers: Vec<String> =
                without_cursor.iter().map(|p| p.identifier.clone()).collect();
            match self
                .engine
                .huly()
                .list_issues_bulk(
                    &identifiers,
                    &ListIssuesOptions {
                        modified_since: None,
                        limit: None,
                        include_sync_meta: true,
                    },
                )
                .await
            {
                Ok(result) => pages.extend(result),
                Err(e) => {
                    warn!("full bulk fetch failed, falling back to per-project: {e}");
                    return None;
                }
            }
        }

        Some(pages)
    }

    /// Run one project through the engine and do the post-phase
    /// bookkeeping: cursor advancement, empty flag, memory-settings file.
    async fn sync_one_project(
        &self,
        project: &Project,
        prefetched: Option<IssuePage>,
    ) -> ProjectOutcome {
        let pool = &self.engine.db().pool;

        match self.engine.sync_project(project, prefetched).await {
            Ok(outcome) => {
                // Cursor advances unconditionally once Phase 3 has run, even
                // with per-issue errors; a stuck cursor is worse than a
                // missed retry.
                if let Some(watermark) = &outcome.cursor
                    && let Err(e) =
                        Project::set_huly_sync_cursor(pool, &project.identifier, watermark).await
                {
                    warn!(
                        project = project.identifier.as_str(),
                        "failed to advance cursor: {e}"
                    );
                }

                if let Err(e) = self.update_project_bookkeeping(project, &outcome).await {
                    warn!(
                        project = project.identifier.as_str(),
                        "bookkeeping failed: {e}"
                    );
                }

                ProjectOutcome {
                    project_identifier: project.identifier.clone(),
                    status: ProjectSyncStatus::Synced,
                    outcome: Some(outcome),
                    error: None,
                }
            }
            Err(e) => {
                warn!(project = project.identifier.as_str(), "project sync failed: {e}");
                ProjectOutcome {
                    project_identifier: project.identifier.clone(),
                    status: ProjectSyncStatus::Errored,
                    outcome: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn update_project_bookkeeping(
        &self,
        project: &Project,
        outcome: &services::services::sync::ProjectSyncOutcome,
    ) -> Result<(), OrchestratorError> {
        let pool = &self.engine.db().pool;

        let stored = Issue::find_by_project(pool, &project.identifier).await?;
        let is_empty = outcome.issues_seen == 0 && stored.is_empty();
        Project::set_is_empty(pool, &project.identifier, is_empty).await?;

        if let Some(path) = project.filesystem_path.as_deref().map(Path::new)
            && path.is_dir()
        {
            let now = Utc::now();
            let settings = LettaSettings {
                project_identifier: project.identifier.clone(),
                last_sync_at: now,
                issue_count: stored.len(),
            };
            if let Err(e) = letta::write_settings(path, &settings) {
                debug!(
                    project = project.identifier.as_str(),
                    "failed to write memory settings: {e}"
                );
            } else {
                Project::set_letta_last_sync_at(pool, &project.identifier, now).await?;
            }

            self.track_beads_files(&project.identifier, path).await?;
        }

        Ok(())
    }

    /// Surface the committed Beads data files to the indexer interface as
    /// content-hashed file rows.
    async fn track_beads_files(
        &self,
        project_identifier: &str,
        project_path: &Path,
    ) -> Result<(), OrchestratorError> {
        let pool = &self.engine.db().pool;
        for relative in [".beads/issues.jsonl", ".beads/metadata.json"] {
            let path = project_path.join(relative);
            let Ok(bytes) = std::fs::read(&path) else {
                continue;
            };
            let hash = format!("{:x}", Sha256::digest(&bytes));
            ProjectFile::upsert(pool, project_identifier, relative, &hash, bytes.len() as i64)
                .await?;
        }
        Ok(())
    }
}

/// Find the working tree for `identifier` under the projects root, matching
/// case-insensitively on the directory name.
fn discover_project_path(projects_root: &Path, identifier: &str) -> Option<PathBuf> {
    let lowered = identifier.to_lowercase();
    let direct = projects_root.join(&lowered);
    if direct.is_dir() {
        return Some(direct);
    }
    let entries = std::fs::read_dir(projects_root).ok()?;
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| {
            p.is_dir()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|name| name.eq_ignore_ascii_case(identifier))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::DBService;
    use services::services::config::SyncConfig;
    use services::services::docs::LoggingDocsExporter;
    use services::services::sync::testing::{FakeBeads, FakeHuly, FakeVibe, huly_issue};

    const T: i64 = 1_700_000_000_000;

    struct Harness {
        db: DBService,
        orchestrator: SyncOrchestrator,
        huly: Arc<FakeHuly>,
        vibe: Arc<FakeVibe>,
        _root: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let db = DBService::new_in_memory().await.unwrap();
        let root = tempfile::tempdir().unwrap();

        let huly = Arc::new(FakeHuly::new("ACME", T));
        let vibe = Arc::new(FakeVibe::new());
        let beads = Arc::new(FakeBeads::new(T));

        let config = SyncConfig {
            projects_root: root.path().to_path_buf(),
            ..SyncConfig::default()
        };
        let engine = SyncEngine::new(
            db.clone(),
            huly.clone(),
            vibe.clone(),
            beads,
            Arc::new(LoggingDocsExporter),
            config,
        );

        Harness {
            db,
            orchestrator: SyncOrchestrator::new(engine),
            huly,
            vibe,
            _root: root,
        }
    }

    #[test]
    fn test_discover_project_path() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("acme")).unwrap();

        let found = discover_project_path(root.path(), "ACME").unwrap();
        assert!(found.ends_with("acme"));
        assert_eq!(discover_project_path(root.path(), "OTHER"), None);
    }

    #[tokio::test]
    async fn test_cycle_bootstraps_projects_and_run_rows() {
        let h = harness().await;
        h.huly.insert(huly_issue("ACME-1", "First issue in fleet", "Backlog", T));

        let options = SyncOptions::from_config(h.orchestrator.engine().config());
        let stats = h
            .orchestrator
            .run_cycle(&options, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.projects_synced, 1);
        assert_eq!(stats.projects_failed, 0);

        // The project row was created and paired with a new Vibe project.
        let project = Project::find_by_identifier(&h.db.pool, "ACME")
            .await
            .unwrap()
            .unwrap();
        assert!(project.vibe_id.is_some());
        assert!(!project.is_empty);
        assert!(h.vibe.creates.load(std::sync::atomic::Ordering::SeqCst) >= 1);

        // One completed sync-run row.
        let runs = SyncRun::find_recent(&h.db.pool, 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn test_cursor_advances_and_never_decreases() {
        let h = harness().await;
        h.huly.insert(huly_issue("ACME-1", "First issue in fleet", "Backlog", T));

        let options = SyncOptions::from_config(h.orchestrator.engine().config());
        let cancel = CancellationToken::new();

        h.orchestrator.run_cycle(&options, None, &cancel).await.unwrap();
        let first = Project::get_huly_sync_cursor(&h.db.pool, "ACME")
            .await
            .unwrap()
            .expect("cursor set after first cycle");

        // No external change: the cursor must not move backwards.
        h.orchestrator.run_cycle(&options, None, &cancel).await.unwrap();
        let second = Project::get_huly_sync_cursor(&h.db.pool, "ACME")
            .await
            .unwrap()
            .unwrap();
        assert!(second >= first, "cursor regressed: {second} < {first}");

        // A newer modification advances it.
        h.huly
            .insert(huly_issue("ACME-2", "Second issue in fleet", "Backlog", T + 60_000));
        h.orchestrator.run_cycle(&options, None, &cancel).await.unwrap();
        let third = Project::get_huly_sync_cursor(&h.db.pool, "ACME")
            .await
            .unwrap()
            .unwrap();
        assert!(third > second, "cursor did not advance: {third} <= {second}");
    }

    #[tokio::test]
    async fn test_project_filter_restricts_cycle() {
        let h = harness().await;
        h.huly.insert(huly_issue("ACME-1", "First issue in fleet", "Backlog", T));

        let mut options = SyncOptions::from_config(h.orchestrator.engine().config());
        options.project_identifier = Some("OTHER".to_string());

        let stats = h
            .orchestrator
            .run_cycle(&options, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(stats.projects_synced, 0, "filtered-out project must not sync");
    }
}
