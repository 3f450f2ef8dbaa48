use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;

/// A tracked project, keyed by the short identifier shared by all three
/// external systems. Created on first observation from Huly; never deleted.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Project {
    pub identifier: String,
    pub name: String,
    pub vibe_id: Option<String>,
    pub filesystem_path: Option<String>,
    pub git_url: Option<String>,
    /// ISO-8601 high-water mark of the latest `modifiedOn` seen from Huly.
    pub huly_sync_cursor: Option<String>,
    pub letta_last_sync_at: Option<DateTime<Utc>>,
    pub is_empty: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial attributes for `Project::upsert`; `None` leaves the stored column
/// unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct ProjectAttrs {
    pub name: Option<String>,
    pub vibe_id: Option<String>,
    pub filesystem_path: Option<String>,
    pub git_url: Option<String>,
}

const PROJECT_COLUMNS: &str = r#"identifier, name, vibe_id, filesystem_path, git_url,
    huly_sync_cursor, letta_last_sync_at, is_empty, created_at, updated_at"#;

impl Project {
    pub async fn find_by_identifier(
        pool: &SqlitePool,
        identifier: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Project>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE identifier = ?1"
        ))
        .bind(identifier)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_all(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Project>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects ORDER BY identifier ASC"
        ))
        .fetch_all(pool)
        .await
    }

    /// Insert or merge by identifier. Unprovided attributes keep their stored
    /// values.
    pub async fn upsert(
        pool: &SqlitePool,
        identifier: &str,
        attrs: &ProjectAttrs,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Project>(&format!(
            r#"INSERT INTO projects (identifier, name, vibe_id, filesystem_path, git_url)
            VALUES (?1, COALESCE(?2, ?1), ?3, ?4, ?5)
            ON CONFLICT(identifier) DO UPDATE SET
                name = COALESCE(?2, projects.name),
                vibe_id = COALESCE(?3, projects.vibe_id),
                filesystem_path = COALESCE(?4, projects.filesystem_path),
                git_url = COALESCE(?5, projects.git_url),
                updated_at = CURRENT_TIMESTAMP
            RETURNING {PROJECT_COLUMNS}"#
        ))
        .bind(identifier)
        .bind(&attrs.name)
        .bind(&attrs.vibe_id)
        .bind(&attrs.filesystem_path)
        .bind(&attrs.git_url)
        .fetch_one(pool)
        .await
    }

    pub async fn get_huly_sync_cursor(
        pool: &SqlitePool,
        identifier: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        let cursor: Option<(Option<String>,)> =
            sqlx::query_as("SELECT huly_sync_cursor FROM projects WHERE identifier = ?1")
                .bind(identifier)
                .fetch_optional(pool)
                .await?;
        Ok(cursor.and_then(|(c,)| c))
    }

    pub async fn set_huly_sync_cursor(
        pool: &SqlitePool,
        identifier: &str,
        iso: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE projects SET huly_sync_cursor = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE identifier = ?1",
        )
        .bind(identifier)
        .bind(iso)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn set_is_empty(
        pool: &SqlitePool,
        identifier: &str,
        is_empty: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE projects SET is_empty = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE identifier = ?1",
        )
        .bind(identifier)
        .bind(is_empty)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn set_letta_last_sync_at(
        pool: &SqlitePool,
        identifier: &str,
        at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE projects SET letta_last_sync_at = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE identifier = ?1",
        )
        .bind(identifier)
        .bind(at)
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DBService;

    #[tokio::test]
    async fn test_upsert_merges_partial_attrs() {
        let db = DBService::new_in_memory().await.unwrap();

        let created = Project::upsert(
            &db.pool,
            "ACME",
            &ProjectAttrs {
                name: Some("Acme Corp".to_string()),
                vibe_id: Some("vibe-1".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(created.name, "Acme Corp");
        assert_eq!(created.vibe_id.as_deref(), Some("vibe-1"));

        // A later upsert without vibe_id must not clear it.
        let merged = Project::upsert(
            &db.pool,
            "ACME",
            &ProjectAttrs {
                filesystem_path: Some("/srv/projects/acme".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(merged.vibe_id.as_deref(), Some("vibe-1"));
        assert_eq!(merged.filesystem_path.as_deref(), Some("/srv/projects/acme"));
    }

    #[tokio::test]
    async fn test_cursor_get_set() {
        let db = DBService::new_in_memory().await.unwrap();
        Project::upsert(&db.pool, "ACME", &ProjectAttrs::default())
            .await
            .unwrap();

        assert_eq!(
            Project::get_huly_sync_cursor(&db.pool, "ACME").await.unwrap(),
            None
        );

        Project::set_huly_sync_cursor(&db.pool, "ACME", "2026-03-01T12:00:00.000Z")
            .await
            .unwrap();
        assert_eq!(
            Project::get_huly_sync_cursor(&db.pool, "ACME").await.unwrap(),
            Some("2026-03-01T12:00:00.000Z".to_string())
        );
    }
}
