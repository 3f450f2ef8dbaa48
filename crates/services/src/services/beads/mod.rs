//! Higher-level operations over the per-project Beads store.

pub mod cli;
pub mod git;
pub mod models;
pub mod store;

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use cli::BeadsCli;
use git::{CommitOutcome, GitOpsError, PushOutcome};
use models::{BeadsField, BeadsIssue, CreateBeadsIssue};

#[derive(Debug, Error)]
pub enum BeadsError {
    #[error("beads CLI (`bd`) executable not found")]
    NotInstalled,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bd command failed (exit code {code:?}): {stderr}")]
    CommandFailed {
        code: Option<i32>,
        stderr: String,
    },
    #[error("failed to parse bd output: {message}")]
    Parse { message: String },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Git(#[from] GitOpsError),
}

impl BeadsError {
    /// CLI concurrency collisions are retried once with a fresh snapshot.
    pub fn is_conflict(&self) -> bool {
        match self {
            BeadsError::CommandFailed { stderr, .. } => {
                let lower = stderr.to_ascii_lowercase();
                lower.contains("locked") || lower.contains("conflict")
            }
            _ => false,
        }
    }
}

/// Seam between the phase engine and the Beads CLI/store/git stack. Every
/// method is scoped to one project working tree.
#[async_trait]
pub trait BeadsApi: Send + Sync {
    /// Whether the `bd` executable is reachable at all.
    fn is_available(&self) -> bool;

    /// Snapshot issues: SQLite preferred, JSONL fallback, CLI last resort.
    async fn snapshot(&self, project_path: &Path) -> Result<Vec<BeadsIssue>, BeadsError>;

    /// Point read of one issue; `None` when it does not exist. Settles
    /// stale-snapshot questions before a mapping is touched.
    async fn show_issue(
        &self,
        project_path: &Path,
        id: &str,
    ) -> Result<Option<BeadsIssue>, BeadsError>;

    /// The dependency tree rooted at `id`, as reported by the CLI.
    async fn dep_tree(
        &self,
        project_path: &Path,
        id: &str,
    ) -> Result<serde_json::Value, BeadsError>;

    /// Idempotent project bring-up: `bd init`, hook install, merge driver.
    async fn ensure_initialized(&self, project_path: &Path) -> Result<(), BeadsError>;

    async fn create_issue(
        &self,
        project_path: &Path,
        create: &CreateBeadsIssue,
    ) -> Result<BeadsIssue, BeadsError>;

    async fn update_issue(
        &self,
        project_path: &Path,
        id: &str,
        field: BeadsField,
        value: &str,
    ) -> Result<(), BeadsError>;

    async fn close_issue(&self, project_path: &Path, id: &str) -> Result<(), BeadsError>;

    async fn reopen_issue(&self, project_path: &Path, id: &str) -> Result<(), BeadsError>;

    async fn dep_add(
        &self,
        project_path: &Path,
        child: &str,
        parent: &str,
    ) -> Result<(), BeadsError>;

    async fn dep_remove(
        &self,
        project_path: &Path,
        child: &str,
        parent: &str,
    ) -> Result<(), BeadsError>;

    /// Stage via `bd sync`, commit with the timestamped message, and
    /// optionally push.
    async fn commit_and_push(
        &self,
        project_path: &Path,
        push: bool,
    ) -> Result<(CommitOutcome, Option<PushOutcome>), BeadsError>;
}

/// Production adapter backed by the `bd` CLI, the on-disk store, and git.
#[derive(Debug, Clone)]
pub struct BeadsService {
    cli: BeadsCli,
}

impl BeadsService {
    pub fn new(cli: BeadsCli) -> Self {
        Self { cli }
    }

    pub fn cli(&self) -> &BeadsCli {
        &self.cli
    }

    /// Status-filtered listing: the JSONL dump is authoritative when
    /// present, the CLI covers trees without one.
    pub async fn list_issues(
        &self,
        project_path: &Path,
        status: Option<models::BeadsStatus>,
    ) -> Result<Vec<BeadsIssue>, BeadsError> {
        let jsonl_path = project_path.join(".beads").join(store::JSONL_FILE);
        if jsonl_path.is_file() {
            let mut issues = store::read_jsonl(&jsonl_path)?;
            if let Some(status) = status {
                issues.retain(|i| i.status == status);
            }
            return Ok(issues);
        }
        self.cli
            .list_issues(project_path, status.map(|s| s.to_string()).as_deref())
            .await
    }
}

#[async_trait]
impl BeadsApi for BeadsService {
    fn is_available(&self) -> bool {
        self.cli.is_installed()
    }

    async fn show_issue(
        &self,
        project_path: &Path,
        id: &str,
    ) -> Result<Option<BeadsIssue>, BeadsError> {
        self.cli.show_issue(project_path, id).await
    }

    async fn dep_tree(
        &self,
        project_path: &Path,
        id: &str,
    ) -> Result<serde_json::Value, BeadsError> {
        self.cli.dep_tree(project_path, id).await
    }

    async fn snapshot(&self, project_path: &Path) -> Result<Vec<BeadsIssue>, BeadsError> {
        if let Some(issues) = store::snapshot(project_path).await? {
            debug!(
                project = %project_path.display(),
                count = issues.len(),
                "beads snapshot from store"
            );
            return Ok(issues);
        }
        self.cli.list_issues(project_path, None).await
    }

    async fn ensure_initialized(&self, project_path: &Path) -> Result<(), BeadsError> {
        self.cli.init(project_path).await?;
        if git::ensure_merge_driver(project_path)? {
            info!(project = %project_path.display(), "installed beads merge driver attributes");
        }
        self.cli.hooks_install(project_path).await?;
        Ok(())
    }

    async fn create_issue(
        &self,
        project_path: &Path,
        create: &CreateBeadsIssue,
    ) -> Result<BeadsIssue, BeadsError> {
        self.cli.create_issue(project_path, create).await
    }

    async fn update_issue(
        &self,
        project_path: &Path,
        id: &str,
        field: BeadsField,
        value: &str,
    ) -> Result<(), BeadsError> {
        self.cli.update_issue(project_path, id, field, value).await
    }

    async fn close_issue(&self, project_path: &Path, id: &str) -> Result<(), BeadsError> {
        self.cli.close_issue(project_path, id).await
    }

    async fn reopen_issue(&self, project_path: &Path, id: &str) -> Result<(), BeadsError> {
        self.cli.reopen_issue(project_path, id).await
    }

    async fn dep_add(
        &self,
        project_path: &Path,
        child: &str,
        parent: &str,
    ) -> Result<(), BeadsError> {
        self.cli.dep_add(project_path, child, parent).await
    }

    async fn dep_remove(
        &self,
        project_path: &Path,
        child: &str,
        parent: &str,
    ) -> Result<(), BeadsError> {
        self.cli.dep_remove(project_path, child, parent).await
    }

    async fn commit_and_push(
        &self,
        project_path: &Path,
        push: bool,
    ) -> Result<(CommitOutcome, Option<PushOutcome>), BeadsError> {
        self.cli.sync(project_path, &git::commit_message()).await?;
        let commit = git::commit_beads_changes(project_path).await?;

        let push_outcome = if push && commit != CommitOutcome::NothingToCommit {
            Some(git::push_beads_changes(project_path).await?)
        } else {
            None
        };

        Ok((commit, push_outcome))
    }
}
