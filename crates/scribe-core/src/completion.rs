//! ============================================================================
//! Completion Service - Answer synthesis via chat completions
//! ============================================================================
//! Sends a grounded prompt to an OpenAI-compatible `/chat/completions`
//! endpoint and returns the first choice's text.
//! ============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::RagConfig;
use crate::embeddings::api_error_message;
use crate::error::{RagError, RagResult};

/// Prompt -> text
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> RagResult<String>;
}

pub struct OpenAiCompletionService {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiCompletionService {
    pub fn new(config: &RagConfig) -> RagResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| RagError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            base_url: config.api_base_url.clone(),
            model: config.completion_model.clone(),
            temperature: 0.2, // Low temperature keeps answers close to the sources
            max_tokens: 800,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompletionService {
    async fn complete(&self, prompt: &str) -> RagResult<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| RagError::Configuration("OPENAI_API_KEY is not set".into()))?;

        debug!("Calling completion API with {} chars", prompt.len());

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::upstream(format!("Failed to call completion API: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::upstream_status(
                status.as_u16(),
                format!("Completion API error: {}", api_error_message(&body)),
            ));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| RagError::upstream(format!("Failed to parse API response: {}", e)))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| RagError::upstream("No response from API"))
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_omits_unset_sampling() {
        let request = ChatRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![ChatMessage {
                role: "user".into(),
                content: "hi".into(),
            }],
            temperature: None,
            max_tokens: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("temperature").is_none());
        assert!(json.get("max_tokens").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":" The meeting moved to Tuesday. "}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content.trim(), "The meeting moved to Tuesday.");
    }

    #[tokio::test]
    async fn test_unconfigured_is_configuration_error() {
        let service = OpenAiCompletionService::new(&RagConfig::default()).unwrap();
        assert_eq!(service.model(), "gpt-4o-mini");
        let err = service.complete("prompt").await.unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
    }
}
