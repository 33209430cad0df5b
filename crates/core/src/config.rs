use providers::sarvam::SarvamConfig;
use providers::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub scan: ScanConfig,
    pub api: ApiConfig,
    pub processing: ProcessingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "retention.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// File extensions the extraction service supports.
    pub extensions: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            extensions: ["jpg", "jpeg", "png", "pdf"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Bearer token; may also come from SARVAM_API_KEY at load time.
    pub key: String,
    pub doc_endpoint: String,
    pub chat_endpoint: String,
    pub model: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            key: String::new(),
            doc_endpoint: "https://api.sarvam.ai/v1/document-intelligence/extract".to_string(),
            chat_endpoint: "https://api.sarvam.ai/v1/chat/completions".to_string(),
            model: "sarvam-2b".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Upper bound on simultaneously in-flight pipeline instances.
    pub max_concurrency: usize,
    /// Total attempts per remote call, including the first.
    pub max_retries: u32,
    pub http_timeout_secs: u64,
    /// Extracted text is truncated to this many characters before
    /// classification.
    pub max_text_chars: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            max_retries: 3,
            http_timeout_secs: 60,
            max_text_chars: 2000,
        }
    }
}

impl ProcessingConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            ..RetryPolicy::default()
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl ApiConfig {
    pub fn client_config(&self, timeout: Duration) -> SarvamConfig {
        SarvamConfig {
            api_key: self.key.clone(),
            doc_endpoint: self.doc_endpoint.clone(),
            chat_endpoint: self.chat_endpoint.clone(),
            model: self.model.clone(),
            timeout,
        }
    }
}

/// Load configuration from a TOML file, falling back to `config/default`
/// and then to built-in defaults. The API key can be injected through the
/// SARVAM_API_KEY environment variable; nothing else reads the environment,
/// and the pipeline itself only ever sees the resulting [`AppConfig`].
pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    let mut cfg: AppConfig = settings.build()?.try_deserialize()?;
    if cfg.api.key.is_empty() {
        if let Ok(key) = std::env::var("SARVAM_API_KEY") {
            cfg.api.key = key;
        }
    }
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.processing.max_concurrency, 5);
        assert_eq!(cfg.processing.max_retries, 3);
        assert_eq!(cfg.processing.max_text_chars, 2000);
        assert_eq!(cfg.processing.http_timeout_secs, 60);
        assert!(cfg.scan.extensions.contains(&"pdf".to_string()));
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[processing]\nmax_concurrency = 2",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.processing.max_concurrency, 2);
        assert_eq!(cfg.processing.max_retries, 3);
        assert_eq!(cfg.database.path, "retention.db");
    }
}
