use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool};
use ts_rs::TS;

/// Tri-source issue record, keyed by the Huly identifier.
///
/// `huly_modified_at` / `beads_modified_at` are last-seen-by-engine epoch
/// milliseconds used for conflict detection, not server truth.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Issue {
    pub identifier: String,
    pub project_identifier: String,
    pub huly_id: Option<String>,
    pub beads_issue_id: Option<String>,
    pub vibe_task_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub beads_status: Option<String>,
    pub huly_modified_at: Option<i64>,
    pub beads_modified_at: Option<i64>,
    pub parent_huly_id: Option<String>,
    pub parent_beads_id: Option<String>,
    pub sub_issue_count: i64,
    pub deleted_from_huly: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial row for `Issue::upsert`. `None` columns are left unchanged on
/// merge; cross-system ids are write-once (a stored non-null id wins over a
/// later differing value).
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct IssuePatch {
    pub identifier: String,
    pub project_identifier: String,
    pub huly_id: Option<String>,
    pub beads_issue_id: Option<String>,
    pub vibe_task_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub beads_status: Option<String>,
    pub huly_modified_at: Option<i64>,
    pub beads_modified_at: Option<i64>,
    pub sub_issue_count: Option<i64>,
}

const ISSUE_COLUMNS: &str = r#"identifier, project_identifier, huly_id, beads_issue_id,
    vibe_task_id, title, description, status, priority, beads_status,
    huly_modified_at, beads_modified_at, parent_huly_id, parent_beads_id,
    sub_issue_count, deleted_from_huly, created_at, updated_at"#;

impl Issue {
    pub async fn find_by_identifier(
        pool: &SqlitePool,
        identifier: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Issue>(&format!(
            "SELECT {ISSUE_COLUMNS} FROM issues WHERE identifier = ?1"
        ))
        .bind(identifier)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_project(
        pool: &SqlitePool,
        project_identifier: &str,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Issue>(&format!(
            "SELECT {ISSUE_COLUMNS} FROM issues WHERE project_identifier = ?1
             ORDER BY identifier ASC"
        ))
        .bind(project_identifier)
        .fetch_all(pool)
        .await
    }

    pub async fn find_all(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Issue>(&format!(
            "SELECT {ISSUE_COLUMNS} FROM issues ORDER BY identifier ASC"
        ))
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_beads_id(
        pool: &SqlitePool,
        project_identifier: &str,
        beads_issue_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Issue>(&format!(
            "SELECT {ISSUE_COLUMNS} FROM issues
             WHERE project_identifier = ?1 AND beads_issue_id = ?2"
        ))
        .bind(project_identifier)
        .bind(beads_issue_id)
        .fetch_optional(pool)
        .await
    }

    /// Insert or merge by identifier. Works on any executor so phase batches
    /// can run inside one transaction.
    pub async fn upsert<'e, E>(executor: E, patch: &IssuePatch) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Issue>(&format!(
            r#"INSERT INTO issues (identifier, project_identifier, huly_id, beads_issue_id,
                vibe_task_id, title, description, status, priority, beads_status,
                huly_modified_at, beads_modified_at, sub_issue_count)
            VALUES (?1, ?2, ?3, ?4, ?5, COALESCE(?6, ''), ?7, ?8, ?9, ?10, ?11, ?12,
                COALESCE(?13, 0))
            ON CONFLICT(identifier) DO UPDATE SET
                project_identifier = excluded.project_identifier,
                huly_id = COALESCE(issues.huly_id, ?3),
                beads_issue_id = COALESCE(issues.beads_issue_id, ?4),
                vibe_task_id = COALESCE(issues.vibe_task_id, ?5),
                title = COALESCE(?6, issues.title),
                description = COALESCE(?7, issues.description),
                status = COALESCE(?8, issues.status),
                priority = COALESCE(?9, issues.priority),
                beads_status = COALESCE(?10, issues.beads_status),
                huly_modified_at = COALESCE(?11, issues.huly_modified_at),
                beads_modified_at = COALESCE(?12, issues.beads_modified_at),
                sub_issue_count = COALESCE(?13, issues.sub_issue_count),
                updated_at = CURRENT_TIMESTAMP
            RETURNING {ISSUE_COLUMNS}"#
        ))
        .bind(&patch.identifier)
        .bind(&patch.project_identifier)
        .bind(&patch.huly_id)
        .bind(&patch.beads_issue_id)
        .bind(&patch.vibe_task_id)
        .bind(&patch.title)
        .bind(&patch.description)
        .bind(&patch.status)
        .bind(&patch.priority)
        .bind(&patch.beads_status)
        .bind(patch.huly_modified_at)
        .bind(patch.beads_modified_at)
        .bind(patch.sub_issue_count)
        .fetch_one(executor)
        .await
    }

    /// Apply a batch of patches transactionally: either all rows are visible
    /// to the next phase or none.
    pub async fn upsert_many(
        pool: &SqlitePool,
        patches: &[IssuePatch],
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let mut rows = Vec::with_capacity(patches.len());
        for patch in patches {
            rows.push(Self::upsert(&mut *tx, patch).await?);
        }
        tx.commit().await?;
        Ok(rows)
    }

    /// Atomic pair write of the stored parent linkage.
    pub async fn update_parent_child(
        pool: &SqlitePool,
        child_identifier: &str,
        parent_huly_id: Option<&str>,
        parent_beads_id: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE issues SET parent_huly_id = ?2, parent_beads_id = ?3,
                updated_at = CURRENT_TIMESTAMP
             WHERE identifier = ?1",
        )
        .bind(child_identifier)
        .bind(parent_huly_id)
        .bind(parent_beads_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn update_sub_issue_count(
        pool: &SqlitePool,
        identifier: &str,
        n: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE issues SET sub_issue_count = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE identifier = ?1",
        )
        .bind(identifier)
        .bind(n)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Record that Huly returned 404 for this identifier. Tombstoned rows are
    /// never written to Huly again and inbound states for them are ignored.
    pub async fn mark_deleted_from_huly(
        pool: &SqlitePool,
        identifier: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE issues SET deleted_from_huly = 1, updated_at = CURRENT_TIMESTAMP
             WHERE identifier = ?1",
        )
        .bind(identifier)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Clear a Beads mapping that no longer resolves (reconciliation sweep).
    pub async fn clear_beads_mapping(
        pool: &SqlitePool,
        identifier: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE issues SET beads_issue_id = NULL, beads_status = NULL,
                parent_beads_id = NULL, updated_at = CURRENT_TIMESTAMP
             WHERE identifier = ?1",
        )
        .bind(identifier)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn delete<'e, E>(executor: E, identifier: &str) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM issues WHERE identifier = ?1")
            .bind(identifier)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DBService;

    fn patch(identifier: &str) -> IssuePatch {
        IssuePatch {
            identifier: identifier.to_string(),
            project_identifier: "ACME".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_partial_upsert_preserves_columns() {
        let db = DBService::new_in_memory().await.unwrap();

        Issue::upsert(
            &db.pool,
            &IssuePatch {
                title: Some("Add retry".to_string()),
                status: Some("Backlog".to_string()),
                vibe_task_id: Some("vt-1".to_string()),
                ..patch("ACME-17")
            },
        )
        .await
        .unwrap();

        // Partial update: only status provided.
        let row = Issue::upsert(
            &db.pool,
            &IssuePatch {
                status: Some("In Progress".to_string()),
                ..patch("ACME-17")
            },
        )
        .await
        .unwrap();

        assert_eq!(row.title, "Add retry");
        assert_eq!(row.status.as_deref(), Some("In Progress"));
        assert_eq!(row.vibe_task_id.as_deref(), Some("vt-1"));
    }

    #[tokio::test]
    async fn test_cross_system_ids_are_write_once() {
        let db = DBService::new_in_memory().await.unwrap();

        Issue::upsert(
            &db.pool,
            &IssuePatch {
                beads_issue_id: Some("bd-001".to_string()),
                ..patch("ACME-1")
            },
        )
        .await
        .unwrap();

        let row = Issue::upsert(
            &db.pool,
            &IssuePatch {
                beads_issue_id: Some("bd-999".to_string()),
                ..patch("ACME-1")
            },
        )
        .await
        .unwrap();

        // The first linkage wins for the life of the row.
        assert_eq!(row.beads_issue_id.as_deref(), Some("bd-001"));
    }

    #[tokio::test]
    async fn test_beads_id_unique_per_project() {
        let db = DBService::new_in_memory().await.unwrap();

        Issue::upsert(
            &db.pool,
            &IssuePatch {
                beads_issue_id: Some("bd-001".to_string()),
                ..patch("ACME-1")
            },
        )
        .await
        .unwrap();

        let duplicate = Issue::upsert(
            &db.pool,
            &IssuePatch {
                beads_issue_id: Some("bd-001".to_string()),
                ..patch("ACME-2")
            },
        )
        .await;
        assert!(duplicate.is_err(), "duplicate (project, beads_id) must be rejected");
    }

    #[tokio::test]
    async fn test_tombstone_and_parent_pair() {
        let db = DBService::new_in_memory().await.unwrap();
        Issue::upsert(&db.pool, &patch("ACME-3")).await.unwrap();

        Issue::update_parent_child(&db.pool, "ACME-3", Some("huly-p2"), Some("bd-p2"))
            .await
            .unwrap();
        Issue::mark_deleted_from_huly(&db.pool, "ACME-3").await.unwrap();

        let row = Issue::find_by_identifier(&db.pool, "ACME-3")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.parent_huly_id.as_deref(), Some("huly-p2"));
        assert_eq!(row.parent_beads_id.as_deref(), Some("bd-p2"));
        assert!(row.deleted_from_huly);
    }

    #[tokio::test]
    async fn test_upsert_many_is_transactional() {
        let db = DBService::new_in_memory().await.unwrap();

        // Second patch violates the (project, beads_id) uniqueness, so the
        // whole batch must roll back.
        let batch = vec![
            IssuePatch {
                beads_issue_id: Some("bd-1".to_string()),
                ..patch("ACME-10")
            },
            IssuePatch {
                beads_issue_id: Some("bd-1".to_string()),
                ..patch("ACME-11")
            },
        ];
        assert!(Issue::upsert_many(&db.pool, &batch).await.is_err());
        assert!(Issue::find_by_identifier(&db.pool, "ACME-10")
            .await
            .unwrap()
            .is_none());
    }
}
