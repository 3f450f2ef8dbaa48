//! Environment configuration surface for the sync engine.

use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration, resolved once at process start.
///
/// Runtime errors never re-read the environment; anything invalid here is a
/// fatal-config error surfaced before the engine starts.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Scheduler period, `SYNC_INTERVAL` (milliseconds).
    pub sync_interval: Duration,
    /// `SKIP_EMPTY_PROJECTS` — bypass projects flagged empty.
    pub skip_empty_projects: bool,
    /// `INCREMENTAL_SYNC` — use per-project cursors for Huly fetches.
    pub incremental_sync: bool,
    /// `PARALLEL_SYNC` — fan projects out across workers.
    pub parallel_sync: bool,
    /// `MAX_WORKERS` — activity concurrency ceiling.
    pub max_workers: usize,
    /// `DRY_RUN` — side-effectful activities log and do nothing.
    pub dry_run: bool,
    /// `USE_TEMPORAL_SYNC` — route syncs through the durable workflow layer.
    pub use_temporal_sync: bool,
    pub huly_api_url: String,
    pub huly_api_token: Option<String>,
    pub vibe_api_url: String,
    /// `BEADS_OPERATION_DELAY_MS` — throttle between consecutive CLI calls.
    pub beads_operation_delay: Duration,
    /// `BEADS_GIT_PUSH` — push after a successful Beads commit.
    pub beads_git_push: bool,
    /// `PROJECTS_ROOT` — host directory containing project working trees.
    pub projects_root: PathBuf,
    /// `DOCS_WATCH_DIR` — optional documentation watcher root.
    pub docs_watch_dir: Option<PathBuf>,
    pub host: String,
    pub port: u16,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_millis(30_000),
            skip_empty_projects: false,
            incremental_sync: true,
            parallel_sync: false,
            max_workers: 4,
            dry_run: false,
            use_temporal_sync: true,
            huly_api_url: "http://localhost:8087".to_string(),
            huly_api_token: None,
            vibe_api_url: "http://localhost:3001".to_string(),
            beads_operation_delay: Duration::ZERO,
            beads_git_push: false,
            projects_root: PathBuf::from("."),
            docs_watch_dir: None,
            host: "127.0.0.1".to_string(),
            port: 8400,
        }
    }
}

impl SyncConfig {
    /// Resolve from the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Resolve from an arbitrary lookup (testable without touching the
    /// process environment).
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            sync_interval: lookup("SYNC_INTERVAL")
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.sync_interval),
            skip_empty_projects: parse_bool(lookup("SKIP_EMPTY_PROJECTS"))
                .unwrap_or(defaults.skip_empty_projects),
            incremental_sync: parse_bool(lookup("INCREMENTAL_SYNC"))
                .unwrap_or(defaults.incremental_sync),
            parallel_sync: parse_bool(lookup("PARALLEL_SYNC")).unwrap_or(defaults.parallel_sync),
            max_workers: lookup("MAX_WORKERS")
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|&n| n > 0)
                .unwrap_or(defaults.max_workers),
            dry_run: parse_bool(lookup("DRY_RUN")).unwrap_or(defaults.dry_run),
            use_temporal_sync: parse_bool(lookup("USE_TEMPORAL_SYNC"))
                .unwrap_or(defaults.use_temporal_sync),
            huly_api_url: lookup("HULY_API_URL").unwrap_or(defaults.huly_api_url),
            huly_api_token: lookup("HULY_API_TOKEN"),
            vibe_api_url: lookup("VIBE_API_URL").unwrap_or(defaults.vibe_api_url),
            beads_operation_delay: lookup("BEADS_OPERATION_DELAY_MS")
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.beads_operation_delay),
            beads_git_push: parse_bool(lookup("BEADS_GIT_PUSH")).unwrap_or(defaults.beads_git_push),
            projects_root: lookup("PROJECTS_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.projects_root),
            docs_watch_dir: lookup("DOCS_WATCH_DIR").map(PathBuf::from),
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|v| v.parse::<u16>().ok())
                .unwrap_or(defaults.port),
        }
    }
}

fn parse_bool(value: Option<String>) -> Option<bool> {
    value.map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from<'a>(map: &'a HashMap<&'a str, &'a str>) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| map.get(key).map(|v| v.to_string())
    }

    #[test]
    fn test_defaults() {
        let config = SyncConfig::from_vars(|_| None);
        assert_eq!(config.sync_interval, Duration::from_millis(30_000));
        assert!(config.incremental_sync);
        assert!(!config.dry_run);
        assert_eq!(config.max_workers, 4);
    }

    #[test]
    fn test_overrides() {
        let mut map = HashMap::new();
        map.insert("SYNC_INTERVAL", "5000");
        map.insert("SKIP_EMPTY_PROJECTS", "true");
        map.insert("INCREMENTAL_SYNC", "0");
        map.insert("MAX_WORKERS", "8");
        map.insert("DRY_RUN", "yes");
        map.insert("HULY_API_URL", "http://huly:8087");
        map.insert("BEADS_OPERATION_DELAY_MS", "250");

        let config = SyncConfig::from_vars(lookup_from(&map));
        assert_eq!(config.sync_interval, Duration::from_millis(5_000));
        assert!(config.skip_empty_projects);
        assert!(!config.incremental_sync);
        assert_eq!(config.max_workers, 8);
        assert!(config.dry_run);
        assert_eq!(config.huly_api_url, "http://huly:8087");
        assert_eq!(config.beads_operation_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let mut map = HashMap::new();
        map.insert("SYNC_INTERVAL", "not-a-number");
        map.insert("MAX_WORKERS", "0");

        let config = SyncConfig::from_vars(lookup_from(&map));
        assert_eq!(config.sync_interval, Duration::from_millis(30_000));
        assert_eq!(config.max_workers, 4);
    }
}
