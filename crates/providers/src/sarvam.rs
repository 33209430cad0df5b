//! HTTP clients for the Sarvam Document Intelligence and Chat Completion
//! APIs. Each call returns a classified [`RemoteError`] so the retry wrapper
//! can decide what is worth repeating.

use crate::{
    ClassifyRequest, Classifier, DecisionPayload, ExtractRequest, Extraction, RemoteError,
    TextExtractor,
};
use base64::Engine as _;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SarvamConfig {
    pub api_key: String,
    pub doc_endpoint: String,
    pub chat_endpoint: String,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct SarvamClient {
    client: Client,
    cfg: Arc<SarvamConfig>,
}

impl SarvamClient {
    pub fn new(cfg: SarvamConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(cfg.timeout).build()?;
        Ok(Self {
            client,
            cfg: Arc::new(cfg),
        })
    }

    async fn post_json(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<Response, RemoteError> {
        self.client
            .post(endpoint)
            .bearer_auth(&self.cfg.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RemoteError::transient(format!("request timed out: {e}"))
                } else {
                    RemoteError::permanent(format!("request failed: {e}"))
                }
            })
    }
}

/// Map a non-success HTTP status to the error taxonomy: 429 and 5xx are
/// retryable, everything else is not.
async fn classify_status(response: Response) -> RemoteError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64);
    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(200).collect();

    if status == StatusCode::TOO_MANY_REQUESTS {
        RemoteError::Transient {
            reason: format!("rate limited (429): {snippet}"),
            retry_after,
        }
    } else if status.is_server_error() {
        RemoteError::transient(format!("server error {status}: {snippet}"))
    } else {
        RemoteError::permanent(format!("HTTP {status}: {snippet}"))
    }
}

#[async_trait::async_trait]
impl TextExtractor for SarvamClient {
    async fn extract(&self, req: &ExtractRequest) -> Result<Extraction, RemoteError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&req.bytes);
        let body = json!({
            "file_name": req.file_name,
            "file_type": req.file_type.as_str(),
            "file_content_base64": encoded,
            "extract_tables": true,
            "extract_key_values": true,
        });

        debug!(file = %req.file_name, bytes = req.bytes.len(), "extraction request");
        let response = self.post_json(&self.cfg.doc_endpoint, &body).await?;
        if !response.status().is_success() {
            return Err(classify_status(response).await);
        }
        response
            .json::<Extraction>()
            .await
            .map_err(|e| RemoteError::permanent(format!("unparseable extraction response: {e}")))
    }
}

const SYSTEM_PROMPT: &str = "You are a data retention classification engine. \
Always respond in strict JSON with these exact fields:\n\
retention_score (integer 0-100), \
category (one of: legal, financial, operational, personal, ephemeral, unknown), \
suggested_action (one of: delete, archive, retain, review), \
confidence (float 0.0-1.0), \
reasoning (string with detailed explanation).";

fn build_user_message(req: &ClassifyRequest) -> String {
    let word_count = req
        .stats
        .word_count
        .map_or_else(|| "N/A".to_string(), |n| n.to_string());
    let page_count = req
        .stats
        .page_count
        .map_or_else(|| "N/A".to_string(), |n| n.to_string());
    format!(
        "Classify the following document for data retention purposes.\n\n\
         **File Metadata:**\n\
         - Path: {path}\n\
         - Size: {size}\n\
         - Last Modified: {modified}\n\
         - Word Count: {word_count}\n\
         - Page Count: {page_count}\n\n\
         **Extracted Text Preview (first {limit} chars):**\n\
         ```\n{preview}\n```\n\n\
         Based on the above, provide a JSON retention decision.",
        path = req.file_path,
        size = format_size(req.file_size),
        modified = req.last_modified,
        limit = req.preview_chars,
        preview = req.text_preview,
    )
}

/// Human-readable size for the classification prompt (e.g. "1.2 MB").
fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} PB")
}

/// Strip a ```json ... ``` wrapper some models put around their JSON reply.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[async_trait::async_trait]
impl Classifier for SarvamClient {
    async fn classify(&self, req: &ClassifyRequest) -> Result<DecisionPayload, RemoteError> {
        let body = json!({
            "model": self.cfg.model,
            "temperature": 0,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": build_user_message(req)},
            ],
        });

        debug!(file = %req.file_path, preview_chars = req.text_preview.len(), "classification request");
        let response = self.post_json(&self.cfg.chat_endpoint, &body).await?;
        if !response.status().is_success() {
            return Err(classify_status(response).await);
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::permanent(format!("unparseable chat response: {e}")))?;
        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| RemoteError::permanent("chat response had no choices"))?;

        serde_json::from_str::<DecisionPayload>(strip_code_fence(content)).map_err(|e| {
            let snippet: String = content.chars().take(200).collect();
            RemoteError::permanent(format!("invalid decision JSON ({e}): {snippet}"))
        })
    }
}
