//! The per-project four-phase reconciliation pipeline.
//!
//! Phase 1: Huly → Vibe. Phase 2: Vibe → Huly. Phase 3: Beads ↔ Huly.
//! Phase 4: documentation export (external collaborator). Phases are
//! strictly serial within a project; per-issue failures are counted and
//! logged but never abort a phase.

pub mod conflict;
pub mod engine;
pub mod phase1;
pub mod phase2;
pub mod phase3;
pub mod snapshot;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

use serde::Serialize;
use sqlx::SqlitePool;
use ts_rs::TS;

use super::beads::BeadsApi;
use super::huly::HulyApi;
use super::vibe::VibeApi;
use snapshot::ProjectSnapshot;

pub use engine::{SyncEngine, SyncEngineError};

/// Per-phase counters. `errors` carries per-issue failures; the phase itself
/// always completes.
#[derive(Debug, Clone, Default, Serialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct PhaseReport {
    pub synced: u32,
    pub skipped: u32,
    pub errors: Vec<String>,
}

impl PhaseReport {
    pub fn record_error(&mut self, context: &str, message: impl std::fmt::Display) {
        let entry = format!("{context}: {message}");
        tracing::warn!("{entry}");
        self.errors.push(entry);
    }
}

/// Outcome of one full project cycle.
#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSyncOutcome {
    pub project_identifier: String,
    pub phase1: PhaseReport,
    pub phase2: PhaseReport,
    pub phase3: PhaseReport,
    pub phase4: PhaseReport,
    /// ISO-8601 watermark to advance the cursor to once Phase 3 returned.
    pub cursor: Option<String>,
    pub issues_seen: usize,
}

impl ProjectSyncOutcome {
    pub fn total_synced(&self) -> u32 {
        self.phase1.synced + self.phase2.synced + self.phase3.synced + self.phase4.synced
    }

    pub fn total_errors(&self) -> usize {
        self.phase1.errors.len()
            + self.phase2.errors.len()
            + self.phase3.errors.len()
            + self.phase4.errors.len()
    }

    pub fn phase_errors(&self) -> impl Iterator<Item = (&'static str, &String)> {
        self.phase1
            .errors
            .iter()
            .map(|e| ("phase1", e))
            .chain(self.phase2.errors.iter().map(|e| ("phase2", e)))
            .chain(self.phase3.errors.iter().map(|e| ("phase3", e)))
            .chain(self.phase4.errors.iter().map(|e| ("phase4", e)))
    }
}

/// Shared per-phase view: the captured snapshot plus the live handles a
/// phase needs to apply its upserts.
pub struct PhaseContext<'a> {
    pub pool: &'a SqlitePool,
    pub huly: &'a dyn HulyApi,
    pub vibe: &'a dyn VibeApi,
    pub beads: &'a dyn BeadsApi,
    pub snapshot: &'a ProjectSnapshot,
    pub dry_run: bool,
    pub beads_git_push: bool,
}
