//! Typed decision model and the pipeline's in-memory value types.
//!
//! The remote classifier returns an untrusted payload; [`Decision`] is the
//! closed, validated form. Range and enum checks happen at construction so
//! an out-of-range score or unknown action can never reach the store.

use providers::{DecisionPayload, FileType};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// At most this many characters of extracted text are ever persisted.
pub const SNIPPET_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Legal,
    Financial,
    Operational,
    Personal,
    Ephemeral,
    Unknown,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Legal => "legal",
            Category::Financial => "financial",
            Category::Operational => "operational",
            Category::Personal => "personal",
            Category::Ephemeral => "ephemeral",
            Category::Unknown => "unknown",
        }
    }
}

impl FromStr for Category {
    type Err = DecisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "legal" => Ok(Category::Legal),
            "financial" => Ok(Category::Financial),
            "operational" => Ok(Category::Operational),
            "personal" => Ok(Category::Personal),
            "ephemeral" => Ok(Category::Ephemeral),
            "unknown" => Ok(Category::Unknown),
            other => Err(DecisionError::UnknownCategory(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestedAction {
    Delete,
    Archive,
    Retain,
    Review,
}

impl SuggestedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestedAction::Delete => "delete",
            SuggestedAction::Archive => "archive",
            SuggestedAction::Retain => "retain",
            SuggestedAction::Review => "review",
        }
    }
}

impl FromStr for SuggestedAction {
    type Err = DecisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delete" => Ok(SuggestedAction::Delete),
            "archive" => Ok(SuggestedAction::Archive),
            "retain" => Ok(SuggestedAction::Retain),
            "review" => Ok(SuggestedAction::Review),
            other => Err(DecisionError::UnknownAction(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("retention_score {0} outside 0-100")]
    ScoreOutOfRange(i64),
    #[error("confidence {0} outside 0.0-1.0")]
    ConfidenceOutOfRange(f64),
    #[error("unknown category '{0}'")]
    UnknownCategory(String),
    #[error("unknown suggested_action '{0}'")]
    UnknownAction(String),
}

/// Structured retention decision for one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub retention_score: u8,
    pub category: Category,
    pub suggested_action: SuggestedAction,
    pub confidence: f64,
    pub reasoning: String,
}

impl Decision {
    pub fn new(
        retention_score: i64,
        category: Category,
        suggested_action: SuggestedAction,
        confidence: f64,
        reasoning: String,
    ) -> Result<Self, DecisionError> {
        if !(0..=100).contains(&retention_score) {
            return Err(DecisionError::ScoreOutOfRange(retention_score));
        }
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(DecisionError::ConfidenceOutOfRange(confidence));
        }
        Ok(Self {
            retention_score: retention_score as u8,
            category,
            suggested_action,
            confidence,
            reasoning,
        })
    }

    /// Safe decision when no trustworthy classification exists: flag the
    /// file for human review and record why.
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            retention_score: 50,
            category: Category::Unknown,
            suggested_action: SuggestedAction::Review,
            confidence: 0.0,
            reasoning: reason.into(),
        }
    }
}

impl TryFrom<DecisionPayload> for Decision {
    type Error = DecisionError;

    fn try_from(payload: DecisionPayload) -> Result<Self, Self::Error> {
        Decision::new(
            payload.retention_score,
            payload.category.parse()?,
            payload.suggested_action.parse()?,
            payload.confidence,
            payload.reasoning,
        )
    }
}

/// A file discovered by the scanner, not yet fingerprinted.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub file_type: FileType,
}

/// Content fingerprint and metadata snapshot from the hasher.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub hash: String,
    pub size: u64,
    pub last_modified: String,
}

/// Truncate to at most `max_chars` characters, marking the cut. Operates on
/// characters, not bytes, so multi-byte text never splits mid-codepoint.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{kept}\n... [truncated, {} chars omitted]", total - max_chars)
}

/// First `SNIPPET_CHARS` characters of the extracted text, the only part
/// that is ever persisted.
pub fn text_snippet(text: &str) -> String {
    text.chars().take(SNIPPET_CHARS).collect()
}

/// Assemble the row persisted for a classified file.
pub fn build_record(
    path: &str,
    fingerprint: &Fingerprint,
    extracted_text: &str,
    decision: &Decision,
    processed_at: String,
) -> storage::StoredRecord {
    storage::StoredRecord {
        id: None,
        file_path: path.to_string(),
        file_hash: fingerprint.hash.clone(),
        file_size: fingerprint.size as i64,
        last_modified: fingerprint.last_modified.clone(),
        extracted_text: text_snippet(extracted_text),
        retention_score: decision.retention_score as i64,
        category: decision.category.as_str().to_string(),
        suggested_action: decision.suggested_action.as_str().to_string(),
        confidence: decision.confidence,
        reasoning: decision.reasoning.clone(),
        processed_at,
    }
}
