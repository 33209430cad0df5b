//! End-to-end pipeline tests against mock remote services and an in-memory
//! record store.

use providers::retry::RetryPolicy;
use providers::{
    ClassifyRequest, Classifier, DecisionPayload, ExtractRequest, Extraction, ExtractionStats,
    FileType, RemoteError, TextExtractor,
};
use retention_core::actions::{ActionMode, ActionStatus};
use retention_core::models::ScannedFile;
use retention_core::pipeline::{FileState, Pipeline};
use retention_core::report::RunReport;
use retention_core::scanner;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Default)]
struct MockExtractor {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay_ms: u64,
    always_transient: bool,
    empty_for: Option<String>,
}

#[async_trait::async_trait]
impl TextExtractor for MockExtractor {
    async fn extract(&self, req: &ExtractRequest) -> Result<Extraction, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.always_transient {
            return Err(RemoteError::transient("simulated 503"));
        }
        if self.empty_for.as_deref() == Some(req.file_name.as_str()) {
            return Ok(Extraction::default());
        }
        Ok(Extraction {
            text: format!("Extracted text of {}", req.file_name),
            stats: ExtractionStats {
                word_count: Some(4),
                page_count: Some(1),
            },
        })
    }
}

/// Replays a scripted response sequence per file name, then falls back to a
/// default "retain" decision.
struct ScriptedClassifier {
    calls: AtomicUsize,
    scripts: Mutex<HashMap<String, VecDeque<Result<DecisionPayload, RemoteError>>>>,
}

impl ScriptedClassifier {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            scripts: Mutex::new(HashMap::new()),
        }
    }

    fn script(
        self,
        file_name: &str,
        responses: Vec<Result<DecisionPayload, RemoteError>>,
    ) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(file_name.to_string(), responses.into());
        self
    }
}

#[async_trait::async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, req: &ClassifyRequest) -> Result<DecisionPayload, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = Path::new(&req.file_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(queue) = self.scripts.lock().unwrap().get_mut(&name) {
            if let Some(response) = queue.pop_front() {
                return response;
            }
        }
        Ok(payload(80, "operational", "retain", 0.9, "routine document"))
    }
}

fn payload(score: i64, category: &str, action: &str, confidence: f64, why: &str) -> DecisionPayload {
    DecisionPayload {
        retention_score: score,
        category: category.to_string(),
        suggested_action: action.to_string(),
        confidence,
        reasoning: why.to_string(),
    }
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(8),
        jitter: false,
    }
}

async fn test_pool() -> SqlitePool {
    let pool = storage::connect("sqlite::memory:").await.unwrap();
    storage::migrate(&pool).await.unwrap();
    pool
}

fn pipeline(
    pool: &SqlitePool,
    extractor: Arc<MockExtractor>,
    classifier: Arc<ScriptedClassifier>,
    max_concurrency: usize,
) -> Pipeline {
    Pipeline::new(
        pool.clone(),
        extractor,
        classifier,
        fast_retry(3),
        max_concurrency,
        2000,
    )
}

fn not_cancelled() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

fn write_tree(files: &[(&str, &[u8])]) -> TempDir {
    let temp = tempfile::tempdir().unwrap();
    for (name, bytes) in files {
        fs::write(temp.path().join(name), bytes).unwrap();
    }
    temp
}

fn scan_dir(dir: &TempDir) -> Vec<ScannedFile> {
    let exts: Vec<String> = ["jpg", "jpeg", "png", "pdf"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    scanner::scan(&[dir.path().to_path_buf()], &[], &exts).unwrap()
}

fn outcome_for<'a>(
    report: &'a RunReport,
    file_name: &str,
) -> &'a retention_core::pipeline::FileOutcome {
    report
        .files
        .iter()
        .find(|o| o.file_path.ends_with(file_name))
        .unwrap_or_else(|| panic!("no outcome for {file_name}"))
}

/// Byte-level snapshot of a directory tree, for dry-run purity checks.
fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut map = BTreeMap::new();
    for entry in walkdir::WalkDir::new(root) {
        let entry = entry.unwrap();
        if entry.file_type().is_file() {
            map.insert(
                entry.path().to_path_buf(),
                fs::read(entry.path()).unwrap(),
            );
        }
    }
    map
}

#[tokio::test]
async fn scenario_new_unchanged_and_retrying_files() {
    let temp = write_tree(&[
        ("a.pdf", b"file a contents"),
        ("b.pdf", b"file b contents"),
        ("c.pdf", b"file c contents"),
    ]);
    let pool = test_pool().await;

    // Prior run covered only b.pdf, so this run sees it as unchanged.
    let seed = pipeline(
        &pool,
        Arc::new(MockExtractor::default()),
        Arc::new(ScriptedClassifier::new()),
        2,
    );
    let b_only: Vec<ScannedFile> = scan_dir(&temp)
        .into_iter()
        .filter(|f| f.path.ends_with("b.pdf"))
        .collect();
    seed.run(b_only, ActionMode::DryRun, not_cancelled())
        .await
        .unwrap();

    let classifier = Arc::new(ScriptedClassifier::new().script(
        "c.pdf",
        vec![
            Err(RemoteError::transient("rate limited (429)")),
            Err(RemoteError::transient("rate limited (429)")),
            Ok(payload(10, "ephemeral", "delete", 0.4, "stale temp file")),
        ],
    ));
    let report = pipeline(&pool, Arc::new(MockExtractor::default()), classifier.clone(), 2)
        .run(scan_dir(&temp), ActionMode::DryRun, not_cancelled())
        .await
        .unwrap();

    let a = outcome_for(&report, "a.pdf");
    assert_eq!(a.state, FileState::ActionApplied);
    assert_eq!(
        a.record.as_ref().unwrap().suggested_action,
        "retain"
    );

    let b = outcome_for(&report, "b.pdf");
    assert_eq!(b.state, FileState::Skipped);

    let c = outcome_for(&report, "c.pdf");
    assert_eq!(c.state, FileState::ActionApplied);
    let c_record = c.record.as_ref().unwrap();
    assert_eq!(c_record.suggested_action, "delete");
    assert_eq!(c_record.retention_score, 10);
    assert_eq!(c_record.reasoning, "stale temp file");
    let c_action = c.action.as_ref().unwrap();
    assert_eq!(c_action.status, ActionStatus::DryRun);
    assert!(c_action
        .destination
        .as_ref()
        .unwrap()
        .ends_with(".trash/c.pdf"));

    // a classified once, c after two retries: 1 + 3 calls in this run.
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 4);
    // Dry run: c.pdf untouched.
    assert!(temp.path().join("c.pdf").exists());
    assert_eq!(report.summary.classified, 2);
    assert_eq!(report.summary.skipped, 1);
}

#[tokio::test]
async fn second_run_on_unchanged_tree_is_idempotent() {
    let temp = write_tree(&[("a.pdf", b"alpha"), ("b.png", b"beta")]);
    let pool = test_pool().await;
    let classifier = Arc::new(ScriptedClassifier::new());
    let p = pipeline(&pool, Arc::new(MockExtractor::default()), classifier.clone(), 4);

    p.run(scan_dir(&temp), ActionMode::DryRun, not_cancelled())
        .await
        .unwrap();
    let calls_after_first = classifier.calls.load(Ordering::SeqCst);
    assert_eq!(calls_after_first, 2);
    let records_after_first =
        serde_json::to_string(&storage::records::fetch_all(&pool).await.unwrap()).unwrap();

    let second = p
        .run(scan_dir(&temp), ActionMode::DryRun, not_cancelled())
        .await
        .unwrap();
    assert_eq!(second.summary.skipped, 2);
    assert_eq!(second.summary.classified, 0);
    assert_eq!(classifier.calls.load(Ordering::SeqCst), calls_after_first);

    let records_after_second =
        serde_json::to_string(&storage::records::fetch_all(&pool).await.unwrap()).unwrap();
    assert_eq!(records_after_first, records_after_second);
}

#[tokio::test]
async fn changed_bytes_force_reprocessing() {
    let temp = write_tree(&[("doc.pdf", b"original")]);
    let pool = test_pool().await;
    let classifier = Arc::new(ScriptedClassifier::new());
    let p = pipeline(&pool, Arc::new(MockExtractor::default()), classifier.clone(), 2);

    p.run(scan_dir(&temp), ActionMode::DryRun, not_cancelled())
        .await
        .unwrap();
    let first_hash = storage::records::fetch_all(&pool).await.unwrap()[0]
        .file_hash
        .clone();

    fs::write(temp.path().join("doc.pdf"), b"edited").unwrap();
    let report = p
        .run(scan_dir(&temp), ActionMode::DryRun, not_cancelled())
        .await
        .unwrap();

    assert_eq!(report.summary.classified, 1);
    assert_eq!(report.summary.skipped, 0);
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 2);
    let records = storage::records::fetch_all(&pool).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_ne!(records[0].file_hash, first_hash);
}

#[tokio::test]
async fn concurrency_never_exceeds_bound() {
    let files: Vec<(String, Vec<u8>)> = (0..8)
        .map(|i| (format!("f{i}.pdf"), format!("contents {i}").into_bytes()))
        .collect();
    let refs: Vec<(&str, &[u8])> = files
        .iter()
        .map(|(n, b)| (n.as_str(), b.as_slice()))
        .collect();
    let temp = write_tree(&refs);
    let pool = test_pool().await;

    let extractor = Arc::new(MockExtractor {
        delay_ms: 25,
        ..MockExtractor::default()
    });
    let report = pipeline(&pool, extractor.clone(), Arc::new(ScriptedClassifier::new()), 2)
        .run(scan_dir(&temp), ActionMode::DryRun, not_cancelled())
        .await
        .unwrap();

    assert_eq!(report.summary.classified, 8);
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 8);
    assert!(
        extractor.max_in_flight.load(Ordering::SeqCst) <= 2,
        "observed {} simultaneous extractions",
        extractor.max_in_flight.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn permanent_classifier_failure_persists_review_record() {
    let temp = write_tree(&[("bad.pdf", b"contents")]);
    let pool = test_pool().await;
    let classifier = Arc::new(ScriptedClassifier::new().script(
        "bad.pdf",
        vec![Err(RemoteError::permanent("401 unauthorized"))],
    ));

    let report = pipeline(&pool, Arc::new(MockExtractor::default()), classifier.clone(), 2)
        .run(scan_dir(&temp), ActionMode::Apply, not_cancelled())
        .await
        .unwrap();

    let outcome = outcome_for(&report, "bad.pdf");
    assert_eq!(outcome.state, FileState::Errored);
    // No retry on permanent failures.
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);

    let records = storage::records::fetch_all(&pool).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].suggested_action, "review");
    assert!(records[0].reasoning.contains("401 unauthorized"));
    // Errored files never reach the action engine.
    assert!(temp.path().join("bad.pdf").exists());
}

#[tokio::test]
async fn transient_exhaustion_persists_review_record() {
    let temp = write_tree(&[("flaky.pdf", b"contents")]);
    let pool = test_pool().await;
    let extractor = Arc::new(MockExtractor {
        always_transient: true,
        ..MockExtractor::default()
    });

    let report = pipeline(&pool, extractor.clone(), Arc::new(ScriptedClassifier::new()), 2)
        .run(scan_dir(&temp), ActionMode::Apply, not_cancelled())
        .await
        .unwrap();

    assert_eq!(outcome_for(&report, "flaky.pdf").state, FileState::Errored);
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 3);

    let records = storage::records::fetch_all(&pool).await.unwrap();
    assert_eq!(records[0].suggested_action, "review");
    assert!(records[0].reasoning.contains("retries exhausted"));
}

#[tokio::test]
async fn apply_mode_moves_deletes_into_trash() {
    let temp = write_tree(&[("stale.pdf", b"old bytes")]);
    let pool = test_pool().await;
    let classifier = Arc::new(ScriptedClassifier::new().script(
        "stale.pdf",
        vec![Ok(payload(5, "ephemeral", "delete", 0.8, "obsolete"))],
    ));

    let report = pipeline(&pool, Arc::new(MockExtractor::default()), classifier, 2)
        .run(scan_dir(&temp), ActionMode::Apply, not_cancelled())
        .await
        .unwrap();

    let outcome = outcome_for(&report, "stale.pdf");
    assert_eq!(outcome.action.as_ref().unwrap().status, ActionStatus::Moved);
    assert!(!temp.path().join("stale.pdf").exists());
    // Never erased, only moved aside with bytes intact.
    assert_eq!(
        fs::read(temp.path().join(".trash/stale.pdf")).unwrap(),
        b"old bytes"
    );
}

#[tokio::test]
async fn dry_run_leaves_the_tree_byte_identical() {
    let temp = write_tree(&[("kill.pdf", b"a"), ("box.png", b"b"), ("keep.jpg", b"c")]);
    let pool = test_pool().await;
    let classifier = Arc::new(
        ScriptedClassifier::new()
            .script(
                "kill.pdf",
                vec![Ok(payload(1, "ephemeral", "delete", 0.9, "junk"))],
            )
            .script(
                "box.png",
                vec![Ok(payload(60, "financial", "archive", 0.7, "old invoice"))],
            ),
    );

    let before = snapshot(temp.path());
    pipeline(&pool, Arc::new(MockExtractor::default()), classifier, 3)
        .run(scan_dir(&temp), ActionMode::DryRun, not_cancelled())
        .await
        .unwrap();
    assert_eq!(before, snapshot(temp.path()));
}

#[tokio::test]
async fn empty_extraction_falls_back_to_review_without_classifying() {
    let temp = write_tree(&[("blank.png", b"pixels")]);
    let pool = test_pool().await;
    let extractor = Arc::new(MockExtractor {
        empty_for: Some("blank.png".to_string()),
        ..MockExtractor::default()
    });
    let classifier = Arc::new(ScriptedClassifier::new());

    let report = pipeline(&pool, extractor, classifier.clone(), 2)
        .run(scan_dir(&temp), ActionMode::Apply, not_cancelled())
        .await
        .unwrap();

    assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    let outcome = outcome_for(&report, "blank.png");
    assert_eq!(outcome.state, FileState::ActionApplied);
    let record = outcome.record.as_ref().unwrap();
    assert_eq!(record.suggested_action, "review");
    assert!(record.reasoning.contains("no text extracted"));
    assert_eq!(outcome.action.as_ref().unwrap().status, ActionStatus::Flagged);
}

#[tokio::test]
async fn unreadable_file_does_not_abort_the_batch() {
    let temp = write_tree(&[("good.pdf", b"fine")]);
    let pool = test_pool().await;
    let mut files = scan_dir(&temp);
    files.push(ScannedFile {
        path: temp.path().join("missing.pdf"),
        file_type: FileType::Pdf,
    });

    let report = pipeline(
        &pool,
        Arc::new(MockExtractor::default()),
        Arc::new(ScriptedClassifier::new()),
        2,
    )
    .run(files, ActionMode::DryRun, not_cancelled())
    .await
    .unwrap();

    assert_eq!(report.summary.scanned, 2);
    assert_eq!(report.summary.classified, 1);
    let bad = outcome_for(&report, "missing.pdf");
    assert_eq!(bad.state, FileState::Errored);
    assert!(bad.error.as_ref().unwrap().contains("unreadable"));
    assert!(bad.record.is_none());
}

#[tokio::test]
async fn cancelled_run_starts_no_new_work() {
    let temp = write_tree(&[("a.pdf", b"a"), ("b.pdf", b"b")]);
    let pool = test_pool().await;
    let classifier = Arc::new(ScriptedClassifier::new());
    let cancel = Arc::new(AtomicBool::new(true));

    let report = pipeline(&pool, Arc::new(MockExtractor::default()), classifier.clone(), 2)
        .run(scan_dir(&temp), ActionMode::Apply, cancel)
        .await
        .unwrap();

    assert_eq!(report.summary.errored, 2);
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    assert!(storage::records::fetch_all(&pool).await.unwrap().is_empty());
    for outcome in &report.files {
        assert_eq!(outcome.error.as_deref(), Some("run cancelled"));
    }
}
