//! Watcher over the documentation source tree.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{DEBOUNCE_SECS, WatchEvent};

/// Engine-written bookkeeping the watcher must treat as read-only.
const ENGINE_METADATA_FILES: &[&str] = &[".docs-sync.json", ".export-manifest.json"];

/// Markdown, rendered HTML, and image assets are export-relevant; anything
/// else in the docs tree is not.
pub fn is_relevant_docs_path(path: &Path) -> bool {
    if let Some(name) = path.file_name().and_then(|n| n.to_str())
        && ENGINE_METADATA_FILES.contains(&name)
    {
        return false;
    }
    if path.components().any(|c| c.as_os_str() == "images") {
        return true;
    }
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("md") | Some("html")
    )
}

pub struct DocsWatcher {
    _debouncer: Debouncer<notify::RecommendedWatcher, RecommendedCache>,
}

impl DocsWatcher {
    /// Watch `docs_dir`, attributing every change to `project_identifier`.
    pub fn spawn(
        project_identifier: String,
        docs_dir: PathBuf,
        tx: mpsc::Sender<WatchEvent>,
    ) -> notify::Result<Self> {
        let root = docs_dir.clone();
        let identifier = project_identifier.clone();

        let mut debouncer = new_debouncer(
            Duration::from_secs(DEBOUNCE_SECS),
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    let mut changed_paths: Vec<PathBuf> = events
                        .iter()
                        .flat_map(|e| e.event.paths.iter())
                        .filter(|p| is_relevant_docs_path(p))
                        .cloned()
                        .collect();
                    changed_paths.sort();
                    changed_paths.dedup();
                    if changed_paths.is_empty() {
                        return;
                    }

                    debug!(
                        project = identifier.as_str(),
                        files = changed_paths.len(),
                        "docs change detected"
                    );
                    let event = WatchEvent {
                        project_identifier: identifier.clone(),
                        project_path: root.clone(),
                        changed_paths,
                    };
                    if tx.try_send(event).is_err() {
                        warn!(
                            project = identifier.as_str(),
                            "watch queue full; dropping docs change event"
                        );
                    }
                }
                Err(errors) => {
                    for error in errors {
                        warn!("docs watcher error: {error}");
                    }
                }
            },
        )?;

        debouncer.watch(&docs_dir, RecursiveMode::Recursive)?;

        Ok(Self {
            _debouncer: debouncer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown_and_html_relevant() {
        assert!(is_relevant_docs_path(Path::new("docs/guide.md")));
        assert!(is_relevant_docs_path(Path::new("docs/index.html")));
    }

    #[test]
    fn test_images_dir_relevant() {
        assert!(is_relevant_docs_path(Path::new("docs/images/diagram.png")));
    }

    #[test]
    fn test_other_files_ignored() {
        assert!(!is_relevant_docs_path(Path::new("docs/notes.txt")));
        assert!(!is_relevant_docs_path(Path::new("docs/build.log")));
    }

    #[test]
    fn test_engine_metadata_ignored() {
        assert!(!is_relevant_docs_path(Path::new("docs/.docs-sync.json")));
        assert!(!is_relevant_docs_path(Path::new("docs/.export-manifest.json")));
    }
}
