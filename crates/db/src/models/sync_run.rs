use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;

#[derive(Debug, Clone, Type, Serialize, Deserialize, PartialEq, TS, EnumString, Display, Default)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SyncRunStatus {
    #[default]
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
}

/// Aggregate counters for one full-cycle invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct SyncRunStats {
    pub projects_synced: i64,
    pub projects_failed: i64,
    pub issues_synced: i64,
    pub issues_errored: i64,
}

/// One structured entry of the per-run error feed, keyed by project and
/// issue identifier.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct SyncRunError {
    pub project_identifier: String,
    pub issue_identifier: Option<String>,
    pub phase: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct SyncRun {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: SyncRunStatus,
    pub projects_synced: i64,
    pub projects_failed: i64,
    pub issues_synced: i64,
    pub issues_errored: i64,
    /// JSON-encoded `Vec<SyncRunError>`.
    pub error_feed: Option<String>,
}

const SYNC_RUN_COLUMNS: &str = r#"id, started_at, completed_at, status, projects_synced,
    projects_failed, issues_synced, issues_errored, error_feed"#;

impl SyncRun {
    pub async fn start(pool: &SqlitePool) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, SyncRun>(&format!(
            "INSERT INTO sync_runs (status) VALUES ('running') RETURNING {SYNC_RUN_COLUMNS}"
        ))
        .fetch_one(pool)
        .await
    }

    pub async fn complete(
        pool: &SqlitePool,
        id: i64,
        status: SyncRunStatus,
        stats: &SyncRunStats,
        errors: &[SyncRunError],
    ) -> Result<(), sqlx::Error> {
        let error_feed = if errors.is_empty() {
            None
        } else {
            Some(serde_json::to_string(errors).unwrap_or_else(|_| "[]".to_string()))
        };

        sqlx::query(
            r#"UPDATE sync_runs
            SET completed_at = CURRENT_TIMESTAMP,
                status = ?2,
                projects_synced = ?3,
                projects_failed = ?4,
                issues_synced = ?5,
                issues_errored = ?6,
                error_feed = ?7
            WHERE id = ?1"#,
        )
        .bind(id)
        .bind(status)
        .bind(stats.projects_synced)
        .bind(stats.projects_failed)
        .bind(stats.issues_synced)
        .bind(stats.issues_errored)
        .bind(error_feed)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, SyncRun>(&format!(
            "SELECT {SYNC_RUN_COLUMNS} FROM sync_runs WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_recent(pool: &SqlitePool, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, SyncRun>(&format!(
            "SELECT {SYNC_RUN_COLUMNS} FROM sync_runs ORDER BY id DESC LIMIT ?1"
        ))
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DBService;

    #[tokio::test]
    async fn test_run_lifecycle() {
        let db = DBService::new_in_memory().await.unwrap();

        let run = SyncRun::start(&db.pool).await.unwrap();
        assert_eq!(run.status, SyncRunStatus::Running);
        assert!(run.completed_at.is_none());

        let stats = SyncRunStats {
            projects_synced: 3,
            issues_synced: 42,
            ..Default::default()
        };
        let errors = vec![SyncRunError {
            project_identifier: "ACME".to_string(),
            issue_identifier: Some("ACME-7".to_string()),
            phase: Some("phase3".to_string()),
            message: "validation failed".to_string(),
        }];
        SyncRun::complete(&db.pool, run.id, SyncRunStatus::CompletedWithErrors, &stats, &errors)
            .await
            .unwrap();

        let completed = SyncRun::find_by_id(&db.pool, run.id).await.unwrap().unwrap();
        assert_eq!(completed.status, SyncRunStatus::CompletedWithErrors);
        assert_eq!(completed.projects_synced, 3);
        assert!(completed.completed_at.is_some());

        let feed: Vec<SyncRunError> =
            serde_json::from_str(completed.error_feed.as_deref().unwrap()).unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].issue_identifier.as_deref(), Some("ACME-7"));
    }
}
