//! The immutable per-project view captured at phase entry.

use std::collections::HashMap;
use std::path::PathBuf;

use db::models::{issue::Issue, project::Project};

use crate::services::beads::models::BeadsIssue;
use crate::services::huly::models::HulyIssue;
use crate::services::mappers;
use crate::services::vibe::models::VibeTask;

/// Everything a cycle reads: the three surfaces plus the stored rows, all
/// fetched once. Stored rows are re-loaded per phase (phases see each
/// other's committed writes); the remote views are not.
pub struct ProjectSnapshot {
    pub project: Project,
    pub project_path: Option<PathBuf>,
    pub huly_issues: Vec<HulyIssue>,
    pub vibe_tasks: Vec<VibeTask>,
    pub beads_issues: Vec<BeadsIssue>,
    /// ISO-8601 watermark reported (or computed) for this fetch window.
    pub watermark: Option<String>,
}

impl ProjectSnapshot {
    pub fn huly_by_identifier(&self) -> HashMap<&str, &HulyIssue> {
        self.huly_issues
            .iter()
            .map(|i| (i.identifier.as_str(), i))
            .collect()
    }

    pub fn beads_by_id(&self) -> HashMap<&str, &BeadsIssue> {
        self.beads_issues.iter().map(|i| (i.id.as_str(), i)).collect()
    }

    pub fn vibe_by_id(&self) -> HashMap<&str, &VibeTask> {
        self.vibe_tasks.iter().map(|t| (t.id.as_str(), t)).collect()
    }

    /// Vibe tasks keyed by the Huly identifier embedded in their footer.
    pub fn vibe_by_footer(&self) -> HashMap<&str, &VibeTask> {
        self.vibe_tasks
            .iter()
            .filter_map(|t| {
                t.description
                    .as_deref()
                    .and_then(mappers::extract_huly_identifier)
                    .map(|id| (id, t))
            })
            .collect()
    }

    /// Beads issues keyed by the Huly identifier embedded in their footer.
    pub fn beads_by_footer(&self) -> HashMap<&str, &BeadsIssue> {
        self.beads_issues
            .iter()
            .filter_map(|i| mappers::extract_huly_identifier(&i.description).map(|id| (id, i)))
            .collect()
    }
}

/// Index stored rows by identifier.
pub fn stored_by_identifier(stored: &[Issue]) -> HashMap<&str, &Issue> {
    stored.iter().map(|i| (i.identifier.as_str(), i)).collect()
}

/// Index stored rows by their Beads mapping.
pub fn stored_by_beads_id(stored: &[Issue]) -> HashMap<&str, &Issue> {
    stored
        .iter()
        .filter_map(|i| i.beads_issue_id.as_deref().map(|id| (id, i)))
        .collect()
}

/// Index stored rows by their Vibe mapping.
pub fn stored_by_vibe_task(stored: &[Issue]) -> HashMap<&str, &Issue> {
    stored
        .iter()
        .filter_map(|i| i.vibe_task_id.as_deref().map(|id| (id, i)))
        .collect()
}
