//! Per-project agent-memory settings emission.
//!
//! The settings file is an output only: the Store stays authoritative and
//! nothing here is ever read back.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SETTINGS_DIR: &str = ".letta";
pub const SETTINGS_FILE: &str = "settings.local.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LettaSettings {
    pub project_identifier: String,
    pub last_sync_at: DateTime<Utc>,
    pub issue_count: usize,
}

pub fn settings_path(project_path: &Path) -> PathBuf {
    project_path.join(SETTINGS_DIR).join(SETTINGS_FILE)
}

/// Write (overwriting) the per-project settings file.
pub fn write_settings(project_path: &Path, settings: &LettaSettings) -> std::io::Result<()> {
    let dir = project_path.join(SETTINGS_DIR);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    let content = serde_json::to_string_pretty(settings)?;
    std::fs::write(settings_path(project_path), content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_settings_creates_dir() {
        let dir = tempfile::tempdir().unwrap();
        let settings = LettaSettings {
            project_identifier: "ACME".to_string(),
            last_sync_at: Utc::now(),
            issue_count: 3,
        };

        write_settings(dir.path(), &settings).unwrap();

        let raw = std::fs::read_to_string(settings_path(dir.path())).unwrap();
        let parsed: LettaSettings = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.project_identifier, "ACME");
        assert_eq!(parsed.issue_count, 3);
    }

    #[test]
    fn test_overwrite_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        for count in [1usize, 2] {
            let settings = LettaSettings {
                project_identifier: "ACME".to_string(),
                last_sync_at: Utc::now(),
                issue_count: count,
            };
            write_settings(dir.path(), &settings).unwrap();
        }
        let raw = std::fs::read_to_string(settings_path(dir.path())).unwrap();
        let parsed: LettaSettings = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.issue_count, 2);
    }
}
