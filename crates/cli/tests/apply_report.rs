//! Apply-from-store and report-export flow against a real temp directory
//! and an on-disk SQLite database, the way the binary wires them together.

use retention_core::actions::{self, ActionMode};
use retention_core::models::SuggestedAction;
use retention_core::report;
use std::fs;
use storage::records::{self, StoredRecord};

fn record(path: &str, action: &str, score: i64) -> StoredRecord {
    StoredRecord {
        id: None,
        file_path: path.to_string(),
        file_hash: format!("hash-of-{path}"),
        file_size: 3,
        last_modified: "2026-05-01T08:00:00+00:00".to_string(),
        extracted_text: "preview".to_string(),
        retention_score: score,
        category: "ephemeral".to_string(),
        suggested_action: action.to_string(),
        confidence: 0.5,
        reasoning: "test".to_string(),
        processed_at: "2026-05-02T08:00:00+00:00".to_string(),
    }
}

#[tokio::test]
async fn stored_decisions_apply_and_export() {
    let temp = tempfile::tempdir().unwrap();
    let doomed = temp.path().join("doomed.pdf");
    let boxed = temp.path().join("boxed.pdf");
    let kept = temp.path().join("kept.pdf");
    for file in [&doomed, &boxed, &kept] {
        fs::write(file, b"abc").unwrap();
    }

    let db_path = temp.path().join("retention.db");
    let pool = storage::connect(&db_path.to_string_lossy()).await.unwrap();
    storage::migrate(&pool).await.unwrap();
    records::upsert(&pool, &record(&doomed.to_string_lossy(), "delete", 5))
        .await
        .unwrap();
    records::upsert(&pool, &record(&boxed.to_string_lossy(), "archive", 40))
        .await
        .unwrap();
    records::upsert(&pool, &record(&kept.to_string_lossy(), "retain", 95))
        .await
        .unwrap();

    // Default apply filter: delete and archive only.
    let filter = vec![SuggestedAction::Delete, SuggestedAction::Archive];
    let targets = records::fetch_by_actions(&pool, &["delete".to_string(), "archive".to_string()])
        .await
        .unwrap();
    assert_eq!(targets.len(), 2);

    // Preview first: nothing moves.
    let (previews, _) = actions::apply_all(&targets, &filter, ActionMode::DryRun);
    assert_eq!(previews.len(), 2);
    assert!(doomed.exists() && boxed.exists());

    let (outcomes, summary) = actions::apply_all(&targets, &filter, ActionMode::Apply);
    assert_eq!(outcomes.len(), 2);
    assert_eq!(summary.counts.get("moved"), Some(&2));
    assert!(!doomed.exists());
    assert!(temp.path().join(".trash/doomed.pdf").exists());
    assert!(temp.path().join(".archive/boxed.pdf").exists());
    assert!(kept.exists());

    // The export still lists every record, action outcomes notwithstanding.
    let exported = report::export_records(&pool).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&exported).unwrap();
    let rows = parsed.as_array().unwrap();
    assert_eq!(rows.len(), 3);
    // Highest retention score first.
    assert_eq!(rows[0]["retention_score"], 95);
    assert_eq!(rows[2]["suggested_action"], "delete");
}
