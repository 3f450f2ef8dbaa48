//! File-system watchers feeding the durability layer.
//!
//! Both watchers share one contract: a debounced, per-project-coalesced
//! [`WatchEvent`] pushed onto a channel. They never block the phase engine;
//! they enqueue and return.

pub mod beads_watcher;
pub mod docs_watcher;

use std::path::PathBuf;

pub use beads_watcher::BeadsWatcher;
pub use docs_watcher::DocsWatcher;

/// Debounce window shared by both watchers; the primary back-pressure
/// mechanism against chatty writers.
pub const DEBOUNCE_SECS: u64 = 5;

#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub project_identifier: String,
    pub project_path: PathBuf,
    pub changed_paths: Vec<PathBuf>,
}
