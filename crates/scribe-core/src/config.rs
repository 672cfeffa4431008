//! ============================================================================
//! Configuration - Explicit settings for clients, stores and the query path
//! ============================================================================
//! Built once at process start (after `.env` is loaded by the binary) and
//! passed into constructors. Nothing in the core reads the environment on
//! its own.
//! ============================================================================

use std::path::PathBuf;

use crate::error::{RagError, RagResult};

/// Default OpenAI-compatible API root
pub const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default chat model used to synthesise answers
pub const DEFAULT_COMPLETION_MODEL: &str = "gpt-4o-mini";

/// Number of sources retrieved per question
pub const DEFAULT_TOP_K: usize = 6;

/// Per-request timeout for API calls
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct RagConfig {
    /// API credential; `None` means the embedding client is not configured
    pub api_key: Option<String>,
    pub api_base_url: String,
    pub embedding_model: String,
    pub completion_model: String,
    pub top_k: usize,
    /// `None` resolves to ~/.scribe/scribe.redb
    pub db_path: Option<PathBuf>,
    pub request_timeout_secs: u64,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            completion_model: DEFAULT_COMPLETION_MODEL.to_string(),
            top_k: DEFAULT_TOP_K,
            db_path: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl RagConfig {
    /// Build from process environment variables.
    ///
    /// | variable                  | field                |
    /// |---------------------------|----------------------|
    /// | `OPENAI_API_KEY`          | `api_key`            |
    /// | `SCRIBE_API_BASE_URL`     | `api_base_url`       |
    /// | `SCRIBE_EMBEDDING_MODEL`  | `embedding_model`    |
    /// | `SCRIBE_COMPLETION_MODEL` | `completion_model`   |
    /// | `SCRIBE_TOP_K`            | `top_k`              |
    /// | `SCRIBE_DB_PATH`          | `db_path`            |
    /// | `SCRIBE_REQUEST_TIMEOUT`  | `request_timeout_secs` |
    pub fn from_env() -> RagResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> RagResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let top_k = match get("SCRIBE_TOP_K") {
            Some(raw) => parse_positive(&raw, "SCRIBE_TOP_K")? as usize,
            None => defaults.top_k,
        };
        let request_timeout_secs = match get("SCRIBE_REQUEST_TIMEOUT") {
            Some(raw) => parse_positive(&raw, "SCRIBE_REQUEST_TIMEOUT")?,
            None => defaults.request_timeout_secs,
        };

        Ok(Self {
            api_key: get("OPENAI_API_KEY"),
            api_base_url: get("SCRIBE_API_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base_url),
            embedding_model: get("SCRIBE_EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            completion_model: get("SCRIBE_COMPLETION_MODEL").unwrap_or(defaults.completion_model),
            top_k,
            db_path: get("SCRIBE_DB_PATH").map(PathBuf::from),
            request_timeout_secs,
        })
    }

    /// Builder-style credential override, mostly for tests and tools
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().map(|k| !k.is_empty()).unwrap_or(false)
    }

    /// Resolve the database path, creating ~/.scribe when falling back to it
    pub fn resolve_db_path(&self) -> RagResult<PathBuf> {
        if let Some(path) = &self.db_path {
            return Ok(path.clone());
        }
        let home = dirs::home_dir()
            .ok_or_else(|| RagError::Configuration("Cannot determine home directory".into()))?;
        let dir = home.join(".scribe");
        std::fs::create_dir_all(&dir)
            .map_err(|e| RagError::Configuration(format!("Failed to create {}: {}", dir.display(), e)))?;
        Ok(dir.join("scribe.redb"))
    }
}

fn parse_positive(raw: &str, key: &str) -> RagResult<u64> {
    match raw.parse::<u64>() {
        Ok(0) | Err(_) => Err(RagError::Configuration(format!(
            "{} must be a positive integer, got '{}'",
            key, raw
        ))),
        Ok(v) => Ok(v),
    }
}
