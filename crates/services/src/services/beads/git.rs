//! Git operations for the Beads working tree.
//!
//! Mutations shell out to `git` (hook bypass on retry needs the CLI);
//! read-only inspection goes through libgit2.

use std::path::Path;

use chrono::Utc;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::store::{INTERACTIONS_FILE, JSONL_FILE, METADATA_FILE};

#[derive(Debug, Error)]
pub enum GitOpsError {
    #[error("failed to execute git: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("git command failed (exit code {code:?}): {stderr}")]
    CommandFailed {
        code: Option<i32>,
        stderr: String,
    },
    #[error(transparent)]
    Repo(#[from] git2::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// Committed on the second attempt with hooks bypassed.
    CommittedNoVerify,
    NothingToCommit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// The remote moved; the push is abandoned for this cycle, nothing else
    /// is aborted.
    NonFastForward,
}

/// Files staged for a Beads commit, relative to the repo root.
fn beads_commit_paths() -> [String; 4] {
    [
        format!(".beads/{JSONL_FILE}"),
        format!(".beads/{INTERACTIONS_FILE}"),
        format!(".beads/{METADATA_FILE}"),
        ".gitattributes".to_string(),
    ]
}

pub fn commit_message() -> String {
    format!(
        "chore(beads): sync changes at {}",
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    )
}

async fn git(project_path: &Path, args: &[&str]) -> Result<String, GitOpsError> {
    debug!(project = %project_path.display(), ?args, "git invocation");
    let output = Command::new("git")
        .args(args)
        .current_dir(project_path)
        .output()
        .await?;

    if !output.status.success() {
        let mut stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.is_empty() {
            stderr = String::from_utf8_lossy(&output.stdout).trim().to_string();
        }
        return Err(GitOpsError::CommandFailed {
            code: output.status.code(),
            stderr,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

async fn stage_beads_files(project_path: &Path) -> Result<(), GitOpsError> {
    for path in beads_commit_paths() {
        if project_path.join(&path).exists() {
            git(project_path, &["add", "--", &path]).await?;
        }
    }
    Ok(())
}

/// Working tree dirtiness restricted to the Beads-owned paths, via libgit2.
pub fn beads_tree_is_dirty(project_path: &Path) -> Result<bool, GitOpsError> {
    let repo = git2::Repository::open(project_path)?;
    let mut options = git2::StatusOptions::new();
    options
        .include_untracked(true)
        .pathspec(".beads")
        .pathspec(".gitattributes");
    let statuses = repo.statuses(Some(&mut options))?;
    Ok(!statuses.is_empty())
}

/// Resolve the `origin` remote URL, if the project is a git repository with
/// one configured.
pub fn detect_git_url(project_path: &Path) -> Option<String> {
    let repo = git2::Repository::open(project_path).ok()?;
    let remote = repo.find_remote("origin").ok()?;
    remote.url().map(|url| url.to_string())
}

fn is_nothing_to_commit(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("nothing to commit") || lower.contains("no changes added to commit")
}

fn is_non_fast_forward(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("non-fast-forward") || lower.contains("fetch first") || lower.contains("[rejected]")
}

/// Stage the Beads files and commit with the timestamped message.
///
/// Recovery paths:
/// - "nothing to commit" while the tree is in fact dirty: re-stage the Beads
///   files explicitly and retry once.
/// - pre-commit-hook failure: retry once with hooks bypassed.
pub async fn commit_beads_changes(project_path: &Path) -> Result<CommitOutcome, GitOpsError> {
    stage_beads_files(project_path).await?;
    let message = commit_message();

    match git(project_path, &["commit", "-m", &message]).await {
        Ok(_) => Ok(CommitOutcome::Committed),
        Err(GitOpsError::CommandFailed { stderr, .. }) if is_nothing_to_commit(&stderr) => {
            if beads_tree_is_dirty(project_path)? {
                warn!(
                    project = %project_path.display(),
                    "commit reported nothing to commit but tree is dirty; re-staging"
                );
                stage_beads_files(project_path).await?;
                match git(project_path, &["commit", "-m", &message]).await {
                    Ok(_) => Ok(CommitOutcome::Committed),
                    Err(GitOpsError::CommandFailed { stderr, .. })
                        if is_nothing_to_commit(&stderr) =>
                    {
                        Ok(CommitOutcome::NothingToCommit)
                    }
                    Err(e) => Err(e),
                }
            } else {
                Ok(CommitOutcome::NothingToCommit)
            }
        }
        Err(GitOpsError::CommandFailed { code, stderr }) => {
            warn!(
                project = %project_path.display(),
                code, stderr, "commit failed, retrying with hooks bypassed"
            );
            git(project_path, &["commit", "--no-verify", "-m", &message]).await?;
            Ok(CommitOutcome::CommittedNoVerify)
        }
        Err(e) => Err(e),
    }
}

/// Push the current branch. A non-fast-forward rejection is reported, not
/// raised: the next cycle retries after the tree converges.
pub async fn push_beads_changes(project_path: &Path) -> Result<PushOutcome, GitOpsError> {
    match git(project_path, &["push"]).await {
        Ok(_) => {
            info!(project = %project_path.display(), "pushed beads changes");
            Ok(PushOutcome::Pushed)
        }
        Err(GitOpsError::CommandFailed { stderr, .. }) if is_non_fast_forward(&stderr) => {
            warn!(
                project = %project_path.display(),
                "push rejected (non-fast-forward); skipping until next cycle"
            );
            Ok(PushOutcome::NonFastForward)
        }
        Err(e) => Err(e),
    }
}

/// Ensure `.gitattributes` routes the JSONL files through the beads merge
/// driver. Returns true when the file was modified.
pub fn ensure_merge_driver(project_path: &Path) -> std::io::Result<bool> {
    let path = project_path.join(".gitattributes");
    let existing = std::fs::read_to_string(&path).unwrap_or_default();

    let wanted = [
        format!(".beads/{JSONL_FILE} merge=beads"),
        format!(".beads/{INTERACTIONS_FILE} merge=beads"),
    ];
    let missing: Vec<&String> = wanted
        .iter()
        .filter(|line| !existing.lines().any(|l| l.trim() == line.as_str()))
        .collect();
    if missing.is_empty() {
        return Ok(false);
    }

    let mut content = existing;
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    for line in missing {
        content.push_str(line);
        content.push('\n');
    }
    std::fs::write(&path, content)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_message_shape() {
        let message = commit_message();
        assert!(message.starts_with("chore(beads): sync changes at "));
        // YYYY-MM-DD HH:MM:SS
        let stamp = message.trim_start_matches("chore(beads): sync changes at ");
        assert_eq!(stamp.len(), 19);
    }

    #[test]
    fn test_error_classifiers() {
        assert!(is_nothing_to_commit("nothing to commit, working tree clean"));
        assert!(!is_nothing_to_commit("pre-commit hook failed"));
        assert!(is_non_fast_forward(
            "! [rejected] main -> main (non-fast-forward)"
        ));
        assert!(!is_non_fast_forward("fatal: repository not found"));
    }

    #[test]
    fn test_ensure_merge_driver_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ensure_merge_driver(dir.path()).unwrap());
        // Second run finds both lines present.
        assert!(!ensure_merge_driver(dir.path()).unwrap());

        let content = std::fs::read_to_string(dir.path().join(".gitattributes")).unwrap();
        assert!(content.contains(".beads/issues.jsonl merge=beads"));
        assert!(content.contains(".beads/interactions.jsonl merge=beads"));
    }

    #[test]
    fn test_detect_git_url_outside_repo() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_git_url(dir.path()), None);
    }
}
