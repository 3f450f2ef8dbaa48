use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;

/// File-tracking row surfaced to the external AST indexer. Not part of the
/// sync pipeline itself.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct ProjectFile {
    pub project_identifier: String,
    pub relative_path: String,
    pub content_hash: String,
    pub size_bytes: i64,
    pub uploaded_at: DateTime<Utc>,
}

impl ProjectFile {
    pub async fn upsert(
        pool: &SqlitePool,
        project_identifier: &str,
        relative_path: &str,
        content_hash: &str,
        size_bytes: i64,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, ProjectFile>(
            r#"INSERT INTO project_files (project_identifier, relative_path, content_hash, size_bytes)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(project_identifier, relative_path) DO UPDATE SET
                content_hash = excluded.content_hash,
                size_bytes = excluded.size_bytes,
                uploaded_at = CURRENT_TIMESTAMP
            RETURNING project_identifier, relative_path, content_hash, size_bytes, uploaded_at"#,
        )
        .bind(project_identifier)
        .bind(relative_path)
        .bind(content_hash)
        .bind(size_bytes)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_project(
        pool: &SqlitePool,
        project_identifier: &str,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, ProjectFile>(
            "SELECT project_identifier, relative_path, content_hash, size_bytes, uploaded_at
             FROM project_files WHERE project_identifier = ?1 ORDER BY relative_path ASC",
        )
        .bind(project_identifier)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DBService;

    #[tokio::test]
    async fn test_upsert_replaces_hash() {
        let db = DBService::new_in_memory().await.unwrap();

        ProjectFile::upsert(&db.pool, "ACME", "src/main.rs", "aaaa", 120)
            .await
            .unwrap();
        let updated = ProjectFile::upsert(&db.pool, "ACME", "src/main.rs", "bbbb", 130)
            .await
            .unwrap();
        assert_eq!(updated.content_hash, "bbbb");

        let files = ProjectFile::find_by_project(&db.pool, "ACME").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size_bytes, 130);
    }
}
