//! Run report: one JSON document per run covering every scanned file, plus
//! the full-store export consumed by UIs and audits.

use crate::actions::ActionMode;
use crate::pipeline::{FileOutcome, FileState};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use storage::records;

#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub scanned: usize,
    pub classified: usize,
    pub skipped: usize,
    pub errored: usize,
    /// Classified files per suggested action.
    pub by_action: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub mode: ActionMode,
    pub started_at: String,
    pub finished_at: String,
    pub summary: RunSummary,
    pub files: Vec<FileOutcome>,
}

impl RunReport {
    pub fn new(
        mode: ActionMode,
        started_at: String,
        finished_at: String,
        mut files: Vec<FileOutcome>,
    ) -> Self {
        files.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        let mut summary = RunSummary {
            scanned: files.len(),
            ..RunSummary::default()
        };
        for outcome in &files {
            match outcome.state {
                FileState::Skipped => summary.skipped += 1,
                FileState::Errored => summary.errored += 1,
                _ => {
                    summary.classified += 1;
                    if let Some(record) = &outcome.record {
                        *summary
                            .by_action
                            .entry(record.suggested_action.clone())
                            .or_insert(0) += 1;
                    }
                }
            }
        }
        Self {
            mode,
            started_at,
            finished_at,
            summary,
            files,
        }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Every stored record as a JSON array, highest retention score first.
pub async fn export_records(pool: &SqlitePool) -> anyhow::Result<String> {
    let all = records::fetch_all(pool).await?;
    Ok(serde_json::to_string_pretty(&all)?)
}
