//! Row model and gate queries for the `files` table.
//!
//! One row per unique `file_path`. The pipeline guarantees at most one
//! in-flight writer per path, so writes here need no per-record locking;
//! SQLite's own write serialization covers concurrent distinct-path upserts.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// Full record as stored in the database, one per file path.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StoredRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub file_path: String,
    pub file_hash: String,
    pub file_size: i64,
    pub last_modified: String,
    pub extracted_text: String,
    pub retention_score: i64,
    pub category: String,
    pub suggested_action: String,
    pub confidence: f64,
    pub reasoning: String,
    pub processed_at: String,
}

/// Record-store gate: true if `path` has never been classified, or if its
/// stored content hash differs from `new_hash`. A rename shows up as a new
/// path and is processed fresh; identical content at an identical path is
/// skipped.
pub async fn should_process(pool: &SqlitePool, path: &str, new_hash: &str) -> anyhow::Result<bool> {
    let prior: Option<(String,)> =
        sqlx::query_as("SELECT file_hash FROM files WHERE file_path = ?1")
            .bind(path)
            .fetch_optional(pool)
            .await
            .with_context(|| format!("gate lookup failed for {path}"))?;

    Ok(match prior {
        Some((stored_hash,)) => stored_hash != new_hash,
        None => true,
    })
}

/// Idempotent overwrite keyed by `file_path`. Last writer wins.
pub async fn upsert(pool: &SqlitePool, record: &StoredRecord) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO files
            (file_path, file_hash, file_size, last_modified,
             extracted_text, retention_score, category,
             suggested_action, confidence, reasoning, processed_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        ON CONFLICT(file_path) DO UPDATE SET
            file_hash        = excluded.file_hash,
            file_size        = excluded.file_size,
            last_modified    = excluded.last_modified,
            extracted_text   = excluded.extracted_text,
            retention_score  = excluded.retention_score,
            category         = excluded.category,
            suggested_action = excluded.suggested_action,
            confidence       = excluded.confidence,
            reasoning        = excluded.reasoning,
            processed_at     = excluded.processed_at
        "#,
    )
    .bind(&record.file_path)
    .bind(&record.file_hash)
    .bind(record.file_size)
    .bind(&record.last_modified)
    .bind(&record.extracted_text)
    .bind(record.retention_score)
    .bind(&record.category)
    .bind(&record.suggested_action)
    .bind(record.confidence)
    .bind(&record.reasoning)
    .bind(&record.processed_at)
    .execute(pool)
    .await
    .with_context(|| format!("upsert failed for {}", record.file_path))?;
    Ok(())
}

/// All records, highest retention score first.
pub async fn fetch_all(pool: &SqlitePool) -> anyhow::Result<Vec<StoredRecord>> {
    let rows = sqlx::query_as::<_, StoredRecord>(
        "SELECT * FROM files ORDER BY retention_score DESC, file_path ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Records whose suggested action is one of `actions`.
pub async fn fetch_by_actions(
    pool: &SqlitePool,
    actions: &[String],
) -> anyhow::Result<Vec<StoredRecord>> {
    if actions.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders: Vec<String> = (1..=actions.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT * FROM files WHERE suggested_action IN ({}) ORDER BY retention_score DESC, file_path ASC",
        placeholders.join(",")
    );
    let mut query = sqlx::query_as::<_, StoredRecord>(&sql);
    for action in actions {
        query = query.bind(action);
    }
    Ok(query.fetch_all(pool).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, hash: &str) -> StoredRecord {
        StoredRecord {
            id: None,
            file_path: path.to_string(),
            file_hash: hash.to_string(),
            file_size: 42,
            last_modified: "2026-01-01T00:00:00+00:00".to_string(),
            extracted_text: "preview".to_string(),
            retention_score: 10,
            category: "ephemeral".to_string(),
            suggested_action: "delete".to_string(),
            confidence: 0.4,
            reasoning: "stale temp file".to_string(),
            processed_at: "2026-01-02T00:00:00+00:00".to_string(),
        }
    }

    async fn test_pool() -> SqlitePool {
        let pool = crate::connect("sqlite::memory:").await.unwrap();
        crate::migrate(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn gate_passes_unknown_path_and_changed_hash() {
        let pool = test_pool().await;
        assert!(should_process(&pool, "/a.pdf", "h1").await.unwrap());

        upsert(&pool, &record("/a.pdf", "h1")).await.unwrap();
        assert!(!should_process(&pool, "/a.pdf", "h1").await.unwrap());
        assert!(should_process(&pool, "/a.pdf", "h2").await.unwrap());
        // Same content at a new path still needs processing.
        assert!(should_process(&pool, "/b.pdf", "h1").await.unwrap());
    }

    #[tokio::test]
    async fn upsert_overwrites_by_path() {
        let pool = test_pool().await;
        upsert(&pool, &record("/a.pdf", "h1")).await.unwrap();

        let mut updated = record("/a.pdf", "h2");
        updated.suggested_action = "retain".to_string();
        updated.retention_score = 90;
        upsert(&pool, &updated).await.unwrap();

        let all = fetch_all(&pool).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].file_hash, "h2");
        assert_eq!(all[0].suggested_action, "retain");
    }

    #[tokio::test]
    async fn fetch_by_actions_filters() {
        let pool = test_pool().await;
        upsert(&pool, &record("/a.pdf", "h1")).await.unwrap();
        let mut keep = record("/b.pdf", "h2");
        keep.suggested_action = "retain".to_string();
        upsert(&pool, &keep).await.unwrap();

        let hits = fetch_by_actions(&pool, &["delete".to_string(), "archive".to_string()])
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_path, "/a.pdf");

        assert!(fetch_by_actions(&pool, &[]).await.unwrap().is_empty());
    }
}
