//! Pipeline orchestrator: drives one file through hash, dedup gate,
//! extraction, classification, persistence, and action execution; the
//! scheduler runs many instances concurrently under a semaphore.
//!
//! Failures are isolated per file. A remote failure that survives the retry
//! wrapper still produces a persisted `review` record carrying the reason,
//! so no scanned file ever drops out of the report.

use crate::actions::{self, ActionMode, ActionOutcome};
use crate::hasher;
use crate::models::{build_record, truncate_text, Decision, Fingerprint, ScannedFile};
use crate::report::RunReport;
use chrono::Utc;
use providers::retry::{with_retry, RetryPolicy};
use providers::{ClassifyRequest, Classifier, ExtractRequest, Extraction, TextExtractor};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use storage::records;
use storage::StoredRecord;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Per-file processing states. Each file moves strictly forward through
/// these; `Skipped`, `ActionApplied`, and `Errored` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Scanned,
    Hashed,
    Skipped,
    Extracting,
    Extracted,
    Classifying,
    Classified,
    ActionApplied,
    Errored,
}

/// Terminal result for one file in one run.
#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub file_path: String,
    pub state: FileState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<StoredRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileOutcome {
    fn skipped(path: &str) -> Self {
        Self {
            file_path: path.to_string(),
            state: FileState::Skipped,
            record: None,
            action: None,
            error: None,
        }
    }

    fn errored(path: &str, error: impl Into<String>, record: Option<StoredRecord>) -> Self {
        Self {
            file_path: path.to_string(),
            state: FileState::Errored,
            record,
            action: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Clone)]
pub struct Pipeline {
    pool: SqlitePool,
    extractor: Arc<dyn TextExtractor>,
    classifier: Arc<dyn Classifier>,
    retry: RetryPolicy,
    max_concurrency: usize,
    max_text_chars: usize,
}

impl Pipeline {
    pub fn new(
        pool: SqlitePool,
        extractor: Arc<dyn TextExtractor>,
        classifier: Arc<dyn Classifier>,
        retry: RetryPolicy,
        max_concurrency: usize,
        max_text_chars: usize,
    ) -> Self {
        Self {
            pool,
            extractor,
            classifier,
            retry,
            max_concurrency: max_concurrency.max(1),
            max_text_chars,
        }
    }

    /// Run every scanned file through the pipeline with at most
    /// `max_concurrency` instances in flight, one per distinct path.
    /// Completion order is unordered; the report covers every input file.
    pub async fn run(
        &self,
        files: Vec<ScannedFile>,
        mode: ActionMode,
        cancel: Arc<AtomicBool>,
    ) -> anyhow::Result<RunReport> {
        let started_at = Utc::now().to_rfc3339();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut join_set: JoinSet<FileOutcome> = JoinSet::new();
        let mut outcomes = Vec::with_capacity(files.len());
        let mut seen_paths: HashSet<String> = HashSet::with_capacity(files.len());

        info!(
            files = files.len(),
            max_concurrency = self.max_concurrency,
            mode = ?mode,
            "pipeline starting"
        );

        for file in files {
            let path_str = file.path.to_string_lossy().into_owned();
            // One in-flight instance per distinct path.
            if !seen_paths.insert(path_str.clone()) {
                warn!(path = %path_str, "duplicate scan entry ignored");
                continue;
            }
            if cancel.load(Ordering::Relaxed) {
                outcomes.push(FileOutcome::errored(&path_str, "run cancelled", None));
                continue;
            }

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| anyhow::anyhow!("scheduler semaphore closed"))?;
            let pipeline = self.clone();
            let cancel = cancel.clone();

            join_set.spawn(async move {
                let _permit = permit;
                if cancel.load(Ordering::Relaxed) {
                    return FileOutcome::errored(&path_str, "run cancelled", None);
                }
                pipeline.process_file(&file, &path_str, mode, &cancel).await
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(error = %e, "pipeline task aborted"),
            }
        }

        let report = RunReport::new(mode, started_at, Utc::now().to_rfc3339(), outcomes);
        info!(
            scanned = report.summary.scanned,
            classified = report.summary.classified,
            skipped = report.summary.skipped,
            errored = report.summary.errored,
            "pipeline finished"
        );
        Ok(report)
    }

    /// One file through the whole state machine. Never returns early without
    /// a terminal outcome.
    async fn process_file(
        &self,
        file: &ScannedFile,
        path_str: &str,
        mode: ActionMode,
        cancel: &AtomicBool,
    ) -> FileOutcome {
        // Scanned -> Hashed
        let hash_path = file.path.clone();
        let fingerprint =
            match tokio::task::spawn_blocking(move || hasher::fingerprint(&hash_path)).await {
                Ok(Ok(fp)) => fp,
                Ok(Err(e)) => {
                    warn!(path = %path_str, error = %e, "unreadable file");
                    return FileOutcome::errored(path_str, format!("unreadable file: {e}"), None);
                }
                Err(e) => {
                    return FileOutcome::errored(path_str, format!("hash task failed: {e}"), None)
                }
            };

        // Hashed -> Skipped?
        match records::should_process(&self.pool, path_str, &fingerprint.hash).await {
            Ok(true) => {}
            Ok(false) => {
                info!(path = %path_str, "unchanged, skipping");
                return FileOutcome::skipped(path_str);
            }
            Err(e) => return FileOutcome::errored(path_str, format!("gate lookup failed: {e}"), None),
        }

        if cancel.load(Ordering::Relaxed) {
            return FileOutcome::errored(path_str, "run cancelled", None);
        }

        // Hashed -> Extracting
        info!(path = %path_str, "extracting");
        let bytes = match tokio::fs::read(&file.path).await {
            Ok(b) => b,
            Err(e) => {
                warn!(path = %path_str, error = %e, "unreadable file");
                return FileOutcome::errored(path_str, format!("unreadable file: {e}"), None);
            }
        };
        let extract_req = ExtractRequest {
            file_name: file
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path_str.to_string()),
            file_type: file.file_type,
            bytes,
        };
        let extraction = {
            let extractor = self.extractor.clone();
            match with_retry(&self.retry, "extract", || {
                let extractor = extractor.clone();
                let req = extract_req.clone();
                async move { extractor.extract(&req).await }
            })
            .await
            {
                Ok(extraction) => extraction,
                Err(e) => {
                    let reason = format!("extraction failed: {}", e.reason());
                    error!(path = %path_str, %reason, "extraction gave up");
                    return self
                        .persist_errored(path_str, &fingerprint, "", reason)
                        .await;
                }
            }
        };

        if cancel.load(Ordering::Relaxed) {
            return FileOutcome::errored(path_str, "run cancelled", None);
        }

        // Extracted -> Classifying -> Classified
        let decision = if extraction.text.trim().is_empty() {
            warn!(path = %path_str, "empty extraction, using fallback decision");
            Decision::fallback("no text extracted from document")
        } else {
            info!(path = %path_str, "classifying");
            match self
                .classify(path_str, fingerprint.size, &fingerprint.last_modified, &extraction)
                .await
            {
                Ok(decision) => decision,
                Err(reason) => {
                    error!(path = %path_str, %reason, "classification gave up");
                    return self
                        .persist_errored(path_str, &fingerprint, &extraction.text, reason)
                        .await;
                }
            }
        };

        // Classified: persist before any filesystem action.
        let record = build_record(
            path_str,
            &fingerprint,
            &extraction.text,
            &decision,
            Utc::now().to_rfc3339(),
        );
        if let Err(e) = records::upsert(&self.pool, &record).await {
            return FileOutcome::errored(path_str, format!("persist failed: {e}"), None);
        }
        info!(
            path = %path_str,
            action = decision.suggested_action.as_str(),
            score = decision.retention_score,
            confidence = decision.confidence,
            "classified"
        );

        // Classified -> ActionApplied. Action failures are reported, never
        // rolled back into the store.
        let action = actions::apply(path_str, decision.suggested_action, mode);
        let error = action.error.clone();
        FileOutcome {
            file_path: path_str.to_string(),
            state: FileState::ActionApplied,
            record: Some(record),
            action: Some(action),
            error,
        }
    }

    async fn classify(
        &self,
        path_str: &str,
        size: u64,
        last_modified: &str,
        extraction: &Extraction,
    ) -> Result<Decision, String> {
        let classify_req = ClassifyRequest {
            file_path: path_str.to_string(),
            file_size: size,
            last_modified: last_modified.to_string(),
            stats: extraction.stats.clone(),
            text_preview: truncate_text(&extraction.text, self.max_text_chars),
            preview_chars: self.max_text_chars,
        };
        let classifier = self.classifier.clone();
        let payload = with_retry(&self.retry, "classify", || {
            let classifier = classifier.clone();
            let req = classify_req.clone();
            async move { classifier.classify(&req).await }
        })
        .await
        .map_err(|e| format!("classification failed: {}", e.reason()))?;

        Decision::try_from(payload).map_err(|e| format!("classification rejected: {e}"))
    }

    /// Persist the safe fallback so the file still appears in the store and
    /// the report, then return the Errored outcome.
    async fn persist_errored(
        &self,
        path_str: &str,
        fingerprint: &Fingerprint,
        extracted_text: &str,
        reason: String,
    ) -> FileOutcome {
        let record = build_record(
            path_str,
            fingerprint,
            extracted_text,
            &Decision::fallback(reason.as_str()),
            Utc::now().to_rfc3339(),
        );
        match records::upsert(&self.pool, &record).await {
            Ok(()) => FileOutcome::errored(path_str, reason, Some(record)),
            Err(e) => {
                FileOutcome::errored(path_str, format!("{reason}; persist failed: {e}"), None)
            }
        }
    }
}
