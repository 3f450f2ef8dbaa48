//! Watcher over each tracked project's `.beads/` tree.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{DEBOUNCE_SECS, WatchEvent};

/// Database side-files and transient artifacts that change constantly and
/// must never trigger a sync.
fn is_side_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return true;
    };
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".db")
        || lower.ends_with(".db-wal")
        || lower.ends_with(".db-shm")
        || lower.ends_with(".lock")
        || lower.ends_with(".pid")
        || lower.ends_with(".log")
        || lower == ".local_version"
}

/// True when the path is a Beads data file worth syncing over.
pub fn is_relevant_beads_path(path: &Path) -> bool {
    path.components().any(|c| c.as_os_str() == ".beads") && !is_side_file(path)
}

pub struct BeadsWatcher {
    // Held for its Drop; dropping stops the watch threads.
    _debouncer: Debouncer<notify::RecommendedWatcher, RecommendedCache>,
}

impl BeadsWatcher {
    /// Watch the `.beads/` directory of every project in `projects`
    /// (`identifier → working tree`), emitting one coalesced event per
    /// project per debounce window.
    pub fn spawn(
        projects: Vec<(String, PathBuf)>,
        tx: mpsc::Sender<WatchEvent>,
    ) -> notify::Result<Self> {
        let roots: Vec<(String, PathBuf)> = projects
            .iter()
            .map(|(id, path)| (id.clone(), path.clone()))
            .collect();

        let mut debouncer = new_debouncer(
            Duration::from_secs(DEBOUNCE_SECS),
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    // Coalesce by project before enqueueing.
                    let mut per_project: HashMap<usize, Vec<PathBuf>> = HashMap::new();
                    for event in &events {
                        for path in &event.event.paths {
                            if !is_relevant_beads_path(path) {
                                continue;
                            }
                            if let Some(index) = roots
                                .iter()
                                .position(|(_, root)| path.starts_with(root))
                            {
                                per_project.entry(index).or_default().push(path.clone());
                            }
                        }
                    }

                    for (index, mut changed_paths) in per_project {
                        let (identifier, root) = &roots[index];
                        changed_paths.sort();
                        changed_paths.dedup();
                        debug!(
                            project = identifier.as_str(),
                            files = changed_paths.len(),
                            "beads change detected"
                        );
                        let event = WatchEvent {
                            project_identifier: identifier.clone(),
                            project_path: root.clone(),
                            changed_paths,
                        };
                        if tx.try_send(event).is_err() {
                            warn!(
                                project = identifier.as_str(),
                                "watch queue full; dropping beads change event"
                            );
                        }
                    }
                }
                Err(errors) => {
                    for error in errors {
                        warn!("beads watcher error: {error}");
                    }
                }
            },
        )?;

        for (identifier, root) in &projects {
            let beads_dir = root.join(".beads");
            if !beads_dir.is_dir() {
                debug!(
                    project = identifier.as_str(),
                    "no .beads directory; not watching"
                );
                continue;
            }
            debouncer.watch(&beads_dir, RecursiveMode::Recursive)?;
        }

        Ok(Self {
            _debouncer: debouncer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_files_ignored() {
        for name in [
            ".beads/beads.db",
            ".beads/beads.db-wal",
            ".beads/beads.db-shm",
            ".beads/daemon.lock",
            ".beads/daemon.pid",
            ".beads/daemon.log",
            ".beads/.local_version",
        ] {
            assert!(
                !is_relevant_beads_path(Path::new(name)),
                "{name} must be ignored"
            );
        }
    }

    #[test]
    fn test_data_files_relevant() {
        for name in [
            "/srv/acme/.beads/issues.jsonl",
            "/srv/acme/.beads/interactions.jsonl",
            "/srv/acme/.beads/metadata.json",
        ] {
            assert!(is_relevant_beads_path(Path::new(name)), "{name} must match");
        }
    }

    #[test]
    fn test_paths_outside_beads_ignored() {
        assert!(!is_relevant_beads_path(Path::new("/srv/acme/src/main.rs")));
    }
}
