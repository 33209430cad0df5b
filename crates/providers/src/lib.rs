//! Provider abstractions for the remote extraction and classification services.
//!
//! Defines the transient/permanent error taxonomy shared by every remote
//! call, the capability traits the pipeline consumes, and the wire-level
//! request/response shapes. The concrete HTTP clients live in [`sarvam`];
//! the generic bounded-retry decorator lives in [`retry`].

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub mod retry;
pub mod sarvam;

/// Classified failure of a remote call.
///
/// `Transient` covers rate limits, server-side faults, and timeouts; the
/// retry wrapper backs off and tries again. `Permanent` covers malformed
/// requests, auth failures, and unparseable responses, where retrying
/// cannot help, so it propagates immediately.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("transient remote failure: {reason}")]
    Transient {
        reason: String,
        /// Server-supplied wait hint (Retry-After), honored over backoff.
        retry_after: Option<Duration>,
    },
    #[error("permanent remote failure: {reason}")]
    Permanent { reason: String },
}

impl RemoteError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent {
            reason: reason.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Declared type of the document sent for extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Image,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Image => "image",
        }
    }

    /// Maps a lowercase file extension to the API's declared type.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "pdf" => Some(FileType::Pdf),
            "jpg" | "jpeg" | "png" => Some(FileType::Image),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub file_name: String,
    pub file_type: FileType,
    pub bytes: Vec<u8>,
}

/// Counters the extraction service reports alongside the text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionStats {
    #[serde(default)]
    pub word_count: Option<u64>,
    #[serde(default)]
    pub page_count: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Extraction {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub stats: ExtractionStats,
}

/// Classification input. `text_preview` is already truncated by the caller;
/// the adapter never truncates.
#[derive(Debug, Clone)]
pub struct ClassifyRequest {
    pub file_path: String,
    pub file_size: u64,
    pub last_modified: String,
    pub stats: ExtractionStats,
    pub text_preview: String,
    pub preview_chars: usize,
}

/// Raw decision payload as returned by the classification service, before
/// range and enum validation upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionPayload {
    pub retention_score: i64,
    pub category: String,
    pub suggested_action: String,
    pub confidence: f64,
    pub reasoning: String,
}

#[async_trait::async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, req: &ExtractRequest) -> Result<Extraction, RemoteError>;
}

#[async_trait::async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, req: &ClassifyRequest) -> Result<DecisionPayload, RemoteError>;
}
