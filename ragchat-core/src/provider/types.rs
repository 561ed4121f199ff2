//! Common types for LLM providers.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur when interacting with a provider.
///
/// All variants describe a failure of the upstream model server.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("Provider error: {0}")]
    Other(String),
}

impl ProviderError {
    pub fn kind(&self) -> &'static str {
        "UpstreamError"
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// A lazy, single-pass sequence of generated text fragments.
///
/// The stream ends after the final fragment. A failure is yielded once as an
/// `Err`, after which the stream ends; fragments delivered before it stand.
pub type FragmentStream = BoxStream<'static, Result<String>>;

/// Provider trait for LLM backends.
///
/// Implementations provide text generation and embeddings.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Generate a completion and wait for the full text.
    async fn generate(&self, request: GenerateRequest) -> Result<String>;

    /// Generate a completion as fragments arrive from the backend.
    async fn generate_stream(&self, request: GenerateRequest) -> Result<FragmentStream>;

    /// Generate an embedding vector for the given text.
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>>;

    /// Generate one embedding per input text, in input order.
    async fn embed_batch(&self, texts: &[&str], model: &str) -> Result<Vec<Vec<f32>>>;

    /// Models available on the backend.
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;
}

/// Request for a single-prompt completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<HashMap<String, serde_json::Value>>,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            stream: false,
            options: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        let mut options = self.options.unwrap_or_default();
        options.insert("temperature".to_string(), serde_json::json!(temperature));
        self.options = Some(options);
        self
    }
}

/// One line of a generate response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Request for generating embeddings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedRequest {
    pub model: String,
    pub input: EmbedInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbedInput {
    Single(String),
    Batch(Vec<String>),
}

/// Response containing embeddings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedResponse {
    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub embeddings: Vec<Vec<f32>>,
}

/// A model installed on the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_request_builder() {
        let req = GenerateRequest::new("llama3", "hi").with_temperature(0.2);

        assert_eq!(req.model, "llama3");
        assert!(!req.stream);
        assert_eq!(req.options.unwrap()["temperature"], serde_json::json!(0.2));
    }

    #[test]
    fn test_embed_input_serialization() {
        let single = serde_json::to_value(EmbedRequest {
            model: "m".into(),
            input: EmbedInput::Single("a".into()),
        })
        .unwrap();
        assert_eq!(single["input"], serde_json::json!("a"));

        let batch = serde_json::to_value(EmbedRequest {
            model: "m".into(),
            input: EmbedInput::Batch(vec!["a".into(), "b".into()]),
        })
        .unwrap();
        assert_eq!(batch["input"], serde_json::json!(["a", "b"]));
    }
}
