//! ============================================================================
//! Embedding Service - Vector embeddings for transcription search
//! ============================================================================
//! Generates text embeddings through an OpenAI-compatible `/embeddings`
//! endpoint. Callers depend on the `EmbeddingProvider` trait so batch runs
//! and queries can be exercised against deterministic stubs.
//! ============================================================================

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::RagConfig;
use crate::error::{RagError, RagResult};

/// Text -> vector
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Whether a credential is present. Pure; never touches the network.
    fn is_configured(&self) -> bool;

    /// Embed one text. `Configuration` when not configured, `Upstream` on
    /// any transport or API failure. Never retries.
    async fn embed(&self, text: &str) -> RagResult<Vec<f32>>;

    fn model(&self) -> &str;
}

/// Embedding service for generating text vectors
pub struct OpenAiEmbeddingService {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    model: String,
    usage: Option<EmbeddingUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct EmbeddingUsage {
    prompt_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub(crate) struct ErrorDetail {
    pub(crate) message: String,
    #[serde(rename = "type")]
    pub(crate) error_type: Option<String>,
}

impl OpenAiEmbeddingService {
    pub fn new(config: &RagConfig) -> RagResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| RagError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            base_url: config.api_base_url.clone(),
            model: config.embedding_model.clone(),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingService {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn embed(&self, text: &str) -> RagResult<Vec<f32>> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| RagError::Configuration("OPENAI_API_KEY is not set".into()))?;

        debug!("Generating embedding for {} chars", text.len());

        let request = EmbeddingRequest {
            model: &self.model,
            input: vec![text],
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::upstream(format!("Failed to send embedding request: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RagError::upstream(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(RagError::upstream_status(
                status.as_u16(),
                format!("Embedding API error: {}", api_error_message(&body)),
            ));
        }

        let embedding_response: EmbeddingResponse = serde_json::from_str(&body)
            .map_err(|e| RagError::upstream(format!("Failed to parse embedding response: {}", e)))?;

        if let Some(usage) = &embedding_response.usage {
            debug!(
                "Embedding tokens used: {} (model: {})",
                usage.total_tokens, embedding_response.model
            );
        }

        embedding_response
            .data
            .into_iter()
            .min_by_key(|d| d.index)
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| RagError::upstream("No embedding returned"))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Pull `error.message` out of an OpenAI error envelope, else the raw body
pub(crate) fn api_error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(error) => error.error.message,
        Err(_) => body.to_string(),
    }
}
