//! Action engine: applies a retention decision to the filesystem, or
//! previews it.
//!
//! Nothing here ever unlinks content. "delete" moves the file into a
//! sibling `.trash` directory and "archive" into `.archive`; a later manual
//! sweep of those directories is the only thing that can reclaim space.

use crate::models::SuggestedAction;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use storage::StoredRecord;
use tracing::{info, warn};

pub const TRASH_DIR: &str = ".trash";
pub const ARCHIVE_DIR: &str = ".archive";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionMode {
    DryRun,
    Apply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Intended effect computed, filesystem untouched.
    DryRun,
    Moved,
    /// Retain, or an action that needs no filesystem change.
    Skipped,
    /// Review: recorded for a human, no filesystem change.
    Flagged,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub file_path: String,
    pub action: SuggestedAction,
    pub status: ActionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    fn new(path: &str, action: SuggestedAction, status: ActionStatus) -> Self {
        Self {
            file_path: path.to_string(),
            action,
            status,
            destination: None,
            error: None,
        }
    }
}

/// Apply one decision. Failures are folded into the outcome; the caller's
/// persisted classification is never rolled back because a move failed.
pub fn apply(path: &str, action: SuggestedAction, mode: ActionMode) -> ActionOutcome {
    match action {
        SuggestedAction::Delete => move_into_sibling(path, action, TRASH_DIR, mode),
        SuggestedAction::Archive => move_into_sibling(path, action, ARCHIVE_DIR, mode),
        SuggestedAction::Retain => ActionOutcome::new(path, action, ActionStatus::Skipped),
        SuggestedAction::Review => {
            info!(path, "flagged for review");
            ActionOutcome::new(path, action, ActionStatus::Flagged)
        }
    }
}

fn move_into_sibling(
    path: &str,
    action: SuggestedAction,
    dir_name: &str,
    mode: ActionMode,
) -> ActionOutcome {
    let src = PathBuf::from(path);
    let dest_dir = match src.parent() {
        Some(parent) => parent.join(dir_name),
        None => {
            let mut outcome = ActionOutcome::new(path, action, ActionStatus::Failed);
            outcome.error = Some("path has no parent directory".to_string());
            return outcome;
        }
    };
    let file_name = src
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "file".into());

    if mode == ActionMode::DryRun {
        let mut outcome = ActionOutcome::new(path, action, ActionStatus::DryRun);
        outcome.destination = Some(dest_dir.join(&file_name).to_string_lossy().into_owned());
        return outcome;
    }

    if !src.exists() {
        let mut outcome = ActionOutcome::new(path, action, ActionStatus::Failed);
        outcome.error = Some("source file not found".to_string());
        return outcome;
    }

    // create_dir_all succeeds if the directory already exists, so concurrent
    // instances sharing a parent cannot race into a creation error.
    if let Err(e) = fs::create_dir_all(&dest_dir) {
        let mut outcome = ActionOutcome::new(path, action, ActionStatus::Failed);
        outcome.error = Some(format!("cannot create {}: {e}", dest_dir.display()));
        return outcome;
    }

    let dest = resolve_collision(&dest_dir, Path::new(&file_name));
    match rename_or_copy(&src, &dest) {
        Ok(()) => {
            info!(from = %src.display(), to = %dest.display(), "moved");
            let mut outcome = ActionOutcome::new(path, action, ActionStatus::Moved);
            outcome.destination = Some(dest.to_string_lossy().into_owned());
            outcome
        }
        Err(e) => {
            warn!(from = %src.display(), to = %dest.display(), error = %e, "move failed");
            let mut outcome = ActionOutcome::new(path, action, ActionStatus::Failed);
            outcome.destination = Some(dest.to_string_lossy().into_owned());
            outcome.error = Some(e.to_string());
            outcome
        }
    }
}

/// Pick a destination name that does not exist yet, appending `_1`, `_2`, ..
/// before the extension. Never overwrites.
fn resolve_collision(dest_dir: &Path, file_name: &Path) -> PathBuf {
    let candidate = dest_dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }
    let stem = file_name
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file")
        .to_string();
    let ext = file_name
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_string();
    let mut counter = 1;
    loop {
        let name = if ext.is_empty() {
            format!("{stem}_{counter}")
        } else {
            format!("{stem}_{counter}.{ext}")
        };
        let candidate = dest_dir.join(name);
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Atomic rename when source and destination share a filesystem; otherwise
/// copy, verify the copied length, and only then remove the source.
fn rename_or_copy(src: &Path, dest: &Path) -> io::Result<()> {
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(_) => {
            let copied = fs::copy(src, dest)?;
            let expected = fs::metadata(src)?.len();
            if copied != expected {
                let _ = fs::remove_file(dest);
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("partial copy: {copied} of {expected} bytes"),
                ));
            }
            fs::remove_file(src)
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct ApplySummary {
    pub counts: BTreeMap<String, usize>,
}

impl ApplySummary {
    fn record(&mut self, status: ActionStatus) {
        let key = match status {
            ActionStatus::DryRun => "dry_run",
            ActionStatus::Moved => "moved",
            ActionStatus::Skipped => "skipped",
            ActionStatus::Flagged => "flagged",
            ActionStatus::Failed => "failed",
        };
        *self.counts.entry(key.to_string()).or_insert(0) += 1;
    }
}

/// Apply stored decisions, optionally filtered by action. Records whose
/// stored action no longer parses are flagged instead of acted on.
pub fn apply_all(
    records: &[StoredRecord],
    filter: &[SuggestedAction],
    mode: ActionMode,
) -> (Vec<ActionOutcome>, ApplySummary) {
    let mut outcomes = Vec::new();
    let mut summary = ApplySummary::default();

    for record in records {
        let action = match record.suggested_action.parse::<SuggestedAction>() {
            Ok(a) => a,
            Err(e) => {
                warn!(path = %record.file_path, error = %e, "unrecognized stored action");
                let mut outcome = ActionOutcome::new(
                    &record.file_path,
                    SuggestedAction::Review,
                    ActionStatus::Flagged,
                );
                outcome.error = Some(e.to_string());
                summary.record(outcome.status);
                outcomes.push(outcome);
                continue;
            }
        };
        if !filter.is_empty() && !filter.contains(&action) {
            continue;
        }
        let outcome = apply(&record.file_path, action, mode);
        summary.record(outcome.status);
        outcomes.push(outcome);
    }

    info!(mode = ?mode, processed = outcomes.len(), "actions applied");
    (outcomes, summary)
}
