//! Storage layer: SQLite record store for retention decisions.
//!
//! Holds DB pool setup, the schema bootstrap, and the record-store gate
//! used by the pipeline for content-addressed dedup.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

pub mod records;

pub use records::StoredRecord;

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let mut url = database_url.to_string();
    if !database_url.starts_with("sqlite:") {
        let path = std::path::PathBuf::from(database_url);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let norm = path.to_string_lossy().replace('\\', "/");
        if path.is_absolute() {
            url = format!("sqlite:///{}?mode=rwc", norm.trim_start_matches('/'));
        } else {
            url = format!("sqlite://{}?mode=rwc", norm);
        }
    }
    let mut opts = SqlitePoolOptions::new();
    if url.contains("memory") {
        opts = opts.max_connections(1);
    } else {
        opts = opts.max_connections(5);
    }
    let pool = opts.connect(&url).await?;
    Ok(pool)
}

const SCHEMA_SQL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS files (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        file_path        TEXT    UNIQUE NOT NULL,
        file_hash        TEXT    NOT NULL,
        file_size        INTEGER NOT NULL,
        last_modified    TEXT    NOT NULL,
        extracted_text   TEXT    NOT NULL DEFAULT '',
        retention_score  INTEGER NOT NULL DEFAULT 0,
        category         TEXT    NOT NULL DEFAULT 'unknown',
        suggested_action TEXT    NOT NULL DEFAULT 'review',
        confidence       REAL    NOT NULL DEFAULT 0.0,
        reasoning        TEXT    NOT NULL DEFAULT '',
        processed_at     TEXT    NOT NULL DEFAULT ''
    );
    "#,
    "CREATE INDEX IF NOT EXISTS idx_files_action ON files(suggested_action);",
];

/// Create the schema if it does not exist. Safe to run multiple times.
pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    for stmt in SCHEMA_SQL {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}
