//! `bd` CLI invocation.
//!
//! Every call appends `--no-daemon` and runs in the project's working tree.
//! Arguments are passed as discrete argv entries; nothing is ever routed
//! through a shell, so user-supplied strings cannot be interpreted.

use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;
use utils::shell::resolve_executable_path;

use super::BeadsError;
use super::models::{BeadsField, BeadsIssue, CreateBeadsIssue};

/// Collapse a multi-line title into a single CLI-safe line: control
/// characters stripped, whitespace runs reduced to one space.
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone)]
pub struct BeadsCli {
    /// Inter-operation throttle (`BEADS_OPERATION_DELAY_MS`).
    op_delay: Duration,
}

impl BeadsCli {
    pub fn new(op_delay: Duration) -> Self {
        Self { op_delay }
    }

    pub fn is_installed(&self) -> bool {
        resolve_executable_path("bd").is_some()
    }

    async fn run(&self, project_path: &Path, args: &[&str]) -> Result<String, BeadsError> {
        let bd = resolve_executable_path("bd").ok_or(BeadsError::NotInstalled)?;

        let mut argv: Vec<&str> = args.to_vec();
        argv.push("--no-daemon");
        debug!(project = %project_path.display(), ?argv, "bd invocation");

        let output = Command::new(&bd)
            .args(&argv)
            .current_dir(project_path)
            .output()
            .await?;

        if !self.op_delay.is_zero() {
            tokio::time::sleep(self.op_delay).await;
        }

        if !output.status.success() {
            return Err(BeadsError::CommandFailed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn parse<T: serde::de::DeserializeOwned>(output: &str) -> Result<T, BeadsError> {
        serde_json::from_str(output.trim()).map_err(|e| BeadsError::Parse {
            message: format!("{e}: {}", output.trim()),
        })
    }

    /// Idempotent project init: a present `.beads/` directory short-circuits.
    pub async fn init(&self, project_path: &Path) -> Result<(), BeadsError> {
        if project_path.join(".beads").is_dir() {
            return Ok(());
        }
        self.run(project_path, &["init"]).await?;
        Ok(())
    }

    pub async fn create_issue(
        &self,
        project_path: &Path,
        create: &CreateBeadsIssue,
    ) -> Result<BeadsIssue, BeadsError> {
        let title = sanitize_title(&create.title);
        let priority = create.priority.map(|p| format!("--priority={p}"));
        let issue_type = create.issue_type.as_ref().map(|t| format!("--type={t}"));
        let labels = (!create.labels.is_empty()).then(|| format!("--labels={}", create.labels.join(",")));
        let description = create.description.as_ref().map(|d| format!("--description={d}"));

        let mut args: Vec<&str> = vec!["create", &title];
        for flag in [&priority, &issue_type, &labels, &description].into_iter().flatten() {
            args.push(flag);
        }
        args.push("--json");

        let output = self.run(project_path, &args).await?;
        Self::parse(&output)
    }

    pub async fn update_issue(
        &self,
        project_path: &Path,
        id: &str,
        field: BeadsField,
        value: &str,
    ) -> Result<(), BeadsError> {
        let flag = format!("--{field}={value}");
        self.run(project_path, &["update", id, &flag]).await?;
        Ok(())
    }

    pub async fn close_issue(&self, project_path: &Path, id: &str) -> Result<(), BeadsError> {
        self.run(project_path, &["close", id]).await?;
        Ok(())
    }

    pub async fn reopen_issue(&self, project_path: &Path, id: &str) -> Result<(), BeadsError> {
        self.run(project_path, &["reopen", id]).await?;
        Ok(())
    }

    pub async fn list_issues(
        &self,
        project_path: &Path,
        status: Option<&str>,
    ) -> Result<Vec<BeadsIssue>, BeadsError> {
        let status_flag = status.map(|s| format!("--status={s}"));
        let mut args: Vec<&str> = vec!["list"];
        if let Some(flag) = &status_flag {
            args.push(flag);
        }
        args.push("--json");

        let output = self.run(project_path, &args).await?;
        if output.trim().is_empty() {
            return Ok(Vec::new());
        }
        Self::parse(&output)
    }

    pub async fn show_issue(
        &self,
        project_path: &Path,
        id: &str,
    ) -> Result<Option<BeadsIssue>, BeadsError> {
        match self.run(project_path, &["show", id, "--json"]).await {
            Ok(output) => Ok(Some(Self::parse(&output)?)),
            Err(BeadsError::CommandFailed { stderr, .. })
                if stderr.to_ascii_lowercase().contains("not found") =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn dep_add(
        &self,
        project_path: &Path,
        child: &str,
        parent: &str,
    ) -> Result<(), BeadsError> {
        self.run(project_path, &["dep", "add", child, parent, "--type=parent-child"])
            .await?;
        Ok(())
    }

    pub async fn dep_remove(
        &self,
        project_path: &Path,
        child: &str,
        parent: &str,
    ) -> Result<(), BeadsError> {
        self.run(project_path, &["dep", "remove", child, parent]).await?;
        Ok(())
    }

    pub async fn dep_tree(
        &self,
        project_path: &Path,
        id: &str,
    ) -> Result<serde_json::Value, BeadsError> {
        let output = self.run(project_path, &["dep", "tree", id, "--json"]).await?;
        Self::parse(&output)
    }

    /// Flush pending changes to the JSONL export and stage them, without
    /// pushing. The commit itself is driven by the git layer.
    pub async fn sync(&self, project_path: &Path, message: &str) -> Result<(), BeadsError> {
        self.run(project_path, &["sync", "-m", message, "--no-push"]).await?;
        Ok(())
    }

    pub async fn hooks_install(&self, project_path: &Path) -> Result<(), BeadsError> {
        self.run(project_path, &["hooks", "install"]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_title_collapses_whitespace() {
        assert_eq!(sanitize_title("Fix\nthe   bug"), "Fix the bug");
        assert_eq!(sanitize_title("  spaced  out  "), "spaced out");
    }

    #[test]
    fn test_sanitize_title_strips_control_chars() {
        assert_eq!(sanitize_title("a\u{0007}b\tc"), "a b c");
        assert_eq!(sanitize_title("line1\r\nline2"), "line1 line2");
    }

    #[test]
    fn test_sanitize_title_plain() {
        assert_eq!(sanitize_title("Plain title"), "Plain title");
    }
}
