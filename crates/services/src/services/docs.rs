//! Phase 4 collaborator interface: one-way documentation export.
//!
//! The real syncer is an external component; the engine only calls it with
//! the project, its last export time, and the changed files. Conflicts on
//! this surface are resolved by the documentation platform, never here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

#[async_trait]
pub trait DocsExporter: Send + Sync {
    async fn export(
        &self,
        project_identifier: &str,
        last_export: Option<DateTime<Utc>>,
        changed_files: &[String],
    ) -> anyhow::Result<()>;
}

/// Default collaborator: records the call and does nothing.
#[derive(Debug, Clone, Default)]
pub struct LoggingDocsExporter;

#[async_trait]
impl DocsExporter for LoggingDocsExporter {
    async fn export(
        &self,
        project_identifier: &str,
        last_export: Option<DateTime<Utc>>,
        changed_files: &[String],
    ) -> anyhow::Result<()> {
        debug!(
            project = project_identifier,
            ?last_export,
            changed = changed_files.len(),
            "docs export requested"
        );
        Ok(())
    }
}
