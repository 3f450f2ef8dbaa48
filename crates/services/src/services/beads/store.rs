//! Snapshot readers for the per-project Beads store.
//!
//! The SQLite database is preferred (it carries labels and dependencies in
//! queryable form); the JSONL dump is the fallback; the CLI is the last
//! resort and lives in the adapter.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{
    Row,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tracing::{debug, warn};

use super::BeadsError;
use super::models::{BeadsDependency, BeadsIssue, BeadsStatus, PARENT_CHILD_DEP};

pub const JSONL_FILE: &str = "issues.jsonl";
pub const INTERACTIONS_FILE: &str = "interactions.jsonl";
pub const METADATA_FILE: &str = "metadata.json";

/// Read the JSONL dump. Empty lines are skipped; a malformed line is an
/// error carrying its line number.
pub fn read_jsonl(path: &Path) -> Result<Vec<BeadsIssue>, BeadsError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut issues = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let issue: BeadsIssue = serde_json::from_str(trimmed).map_err(|e| BeadsError::Parse {
            message: format!("{} line {}: {e}", path.display(), index + 1),
        })?;
        issues.push(issue);
    }
    Ok(issues)
}

/// Locate the SQLite database inside `.beads/`, preferring the canonical
/// name over stray `*.db` files.
pub fn find_sqlite_db(beads_dir: &Path) -> Option<PathBuf> {
    let canonical = beads_dir.join("beads.db");
    if canonical.is_file() {
        return Some(canonical);
    }
    let entries = std::fs::read_dir(beads_dir).ok()?;
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.extension().is_some_and(|ext| ext == "db"))
}

fn parse_timestamp(raw: Option<String>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// Read issues straight from the Beads SQLite database, read-only. Labels
/// and dependency edges are joined in from their side tables when present.
pub async fn read_sqlite(db_path: &Path) -> Result<Vec<BeadsIssue>, BeadsError> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .read_only(true)
        .immutable(false);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    let rows = sqlx::query(
        "SELECT id, title, description, status, priority, issue_type, created_at, updated_at
         FROM issues",
    )
    .fetch_all(&pool)
    .await?;

    let mut issues: Vec<BeadsIssue> = rows
        .into_iter()
        .map(|row| {
            let status: String = row.try_get("status").unwrap_or_default();
            BeadsIssue {
                id: row.try_get("id").unwrap_or_default(),
                title: row.try_get("title").unwrap_or_default(),
                description: row.try_get("description").unwrap_or_default(),
                status: status.parse::<BeadsStatus>().unwrap_or_default(),
                priority: row.try_get("priority").unwrap_or_default(),
                issue_type: row.try_get("issue_type").ok(),
                labels: Vec::new(),
                dependencies: Vec::new(),
                created_at: parse_timestamp(row.try_get("created_at").ok()),
                updated_at: parse_timestamp(row.try_get("updated_at").ok()),
            }
        })
        .collect();

    // Side tables are schema-version dependent; a miss degrades the snapshot
    // rather than failing it.
    match sqlx::query("SELECT issue_id, label FROM labels").fetch_all(&pool).await {
        Ok(rows) => {
            let mut labels: HashMap<String, Vec<String>> = HashMap::new();
            for row in rows {
                let issue_id: String = row.try_get("issue_id").unwrap_or_default();
                let label: String = row.try_get("label").unwrap_or_default();
                labels.entry(issue_id).or_default().push(label);
            }
            for issue in &mut issues {
                if let Some(found) = labels.remove(&issue.id) {
                    issue.labels = found;
                }
            }
        }
        Err(e) => debug!("labels table unavailable in {}: {e}", db_path.display()),
    }

    match sqlx::query("SELECT issue_id, depends_on_id, dep_type FROM dependencies")
        .fetch_all(&pool)
        .await
    {
        Ok(rows) => {
            let mut deps: HashMap<String, Vec<BeadsDependency>> = HashMap::new();
            for row in rows {
                let issue_id: String = row.try_get("issue_id").unwrap_or_default();
                let depends_on: String = row.try_get("depends_on_id").unwrap_or_default();
                let dep_type: String = row
                    .try_get("dep_type")
                    .unwrap_or_else(|_| PARENT_CHILD_DEP.to_string());
                deps.entry(issue_id).or_default().push(BeadsDependency {
                    issue_id: depends_on,
                    dep_type,
                });
            }
            for issue in &mut issues {
                if let Some(found) = deps.remove(&issue.id) {
                    issue.dependencies = found;
                }
            }
        }
        Err(e) => debug!("dependencies table unavailable in {}: {e}", db_path.display()),
    }

    pool.close().await;
    Ok(issues)
}

/// Snapshot the project's Beads issues: SQLite preferred, JSONL fallback.
/// Returns `None` when neither source exists so the caller can fall back to
/// the CLI.
pub async fn snapshot(project_path: &Path) -> Result<Option<Vec<BeadsIssue>>, BeadsError> {
    let beads_dir = project_path.join(".beads");
    if !beads_dir.is_dir() {
        return Ok(None);
    }

    if let Some(db_path) = find_sqlite_db(&beads_dir) {
        match read_sqlite(&db_path).await {
            Ok(issues) => return Ok(Some(issues)),
            Err(e) => warn!(
                "failed to read {}; falling back to JSONL: {e}",
                db_path.display()
            ),
        }
    }

    let jsonl_path = beads_dir.join(JSONL_FILE);
    if jsonl_path.is_file() {
        return Ok(Some(read_jsonl(&jsonl_path)?));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_jsonl_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(JSONL_FILE);
        let mut file = File::create(&path).unwrap();
        writeln!(file, r#"{{"id":"bd-1","title":"A","status":"open"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"id":"bd-2","title":"B","status":"closed"}}"#).unwrap();

        let issues = read_jsonl(&path).unwrap();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[1].status, BeadsStatus::Closed);
    }

    #[test]
    fn test_read_jsonl_reports_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(JSONL_FILE);
        let mut file = File::create(&path).unwrap();
        writeln!(file, r#"{{"id":"bd-1","title":"A"}}"#).unwrap();
        writeln!(file, "not json").unwrap();

        let err = read_jsonl(&path).unwrap_err();
        assert!(err.to_string().contains("line 2"), "got: {err}");
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp(Some("2026-03-01T12:00:00Z".to_string())).is_some());
        assert!(parse_timestamp(Some("2026-03-01 12:00:00".to_string())).is_some());
        assert!(parse_timestamp(Some("garbage".to_string())).is_none());
        assert!(parse_timestamp(None).is_none());
    }

    #[tokio::test]
    async fn test_snapshot_prefers_existing_sources() {
        let dir = tempfile::tempdir().unwrap();

        // No .beads at all.
        assert!(snapshot(dir.path()).await.unwrap().is_none());

        // JSONL only.
        let beads_dir = dir.path().join(".beads");
        std::fs::create_dir_all(&beads_dir).unwrap();
        let mut file = File::create(beads_dir.join(JSONL_FILE)).unwrap();
        writeln!(file, r#"{{"id":"bd-1","title":"A"}}"#).unwrap();

        let issues = snapshot(dir.path()).await.unwrap().unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].id, "bd-1");
    }
}
