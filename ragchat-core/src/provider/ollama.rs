//! Ollama provider implementation.
//!
//! This module provides an Ollama HTTP API client that implements the Provider trait.

use super::types::*;
use async_trait::async_trait;

use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use std::collections::VecDeque;
use tracing::debug;

/// Ollama HTTP API provider.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    base_url: String,
    http_client: reqwest::Client,
}

impl OllamaProvider {
    /// Creates a new Ollama provider for the server at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &crate::Config) -> Self {
        Self::new(&config.llm.base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns true when the server answers `/api/tags`.
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.http_client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn post_generate(&self, request: &GenerateRequest) -> Result<reqwest::Response> {
        let url = format!("{}/api/generate", self.base_url);
        debug!(model = %request.model, stream = request.stream, prompt_len = request.prompt.len(), "Sending generate request");

        let response = self.http_client.post(&url).json(request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(ProviderError::Api(format!("{status}: {error_text}")));
        }

        Ok(response)
    }

    async fn post_embed(&self, request: &EmbedRequest) -> Result<EmbedResponse> {
        let url = format!("{}/api/embed", self.base_url);

        let response = self.http_client.post(&url).json(request).send().await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(ProviderError::Api(error_text));
        }

        Ok(response.json::<EmbedResponse>().await?)
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::from_config(&crate::Config::default())
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    async fn generate(&self, mut request: GenerateRequest) -> Result<String> {
        request.stream = false;
        let response = self.post_generate(&request).await?;
        let body = response.json::<GenerateResponse>().await?;

        if let Some(error) = body.error {
            return Err(ProviderError::Api(error));
        }
        Ok(body.response)
    }

    async fn generate_stream(&self, mut request: GenerateRequest) -> Result<FragmentStream> {
        request.stream = true;
        let response = self.post_generate(&request).await?;
        Ok(decode_fragments(Box::pin(response.bytes_stream())).boxed())
    }

    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>> {
        let embed_request = EmbedRequest {
            model: model.to_string(),
            input: EmbedInput::Single(text.to_string()),
        };

        self.post_embed(&embed_request)
            .await?
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Other("No embeddings returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str], model: &str) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let embed_request = EmbedRequest {
            model: model.to_string(),
            input: EmbedInput::Batch(texts.iter().map(|t| t.to_string()).collect()),
        };

        let embeddings = self.post_embed(&embed_request).await?.embeddings;
        if embeddings.len() != texts.len() {
            return Err(ProviderError::Other(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }
        Ok(embeddings)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        #[derive(Deserialize)]
        struct TagsResponse {
            models: Vec<ModelInfo>,
        }

        let url = format!("{}/api/tags", self.base_url);
        let response = self.http_client.get(&url).send().await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(ProviderError::Api(error_text));
        }

        Ok(response.json::<TagsResponse>().await?.models)
    }
}

struct DecodeState<S> {
    bytes: S,
    buffer: Vec<u8>,
    pending: VecDeque<Result<String>>,
    finished: bool,
}

impl<S> DecodeState<S> {
    /// Parses every complete line currently buffered.
    fn drain_lines(&mut self) {
        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.drain(..=newline_pos).collect::<Vec<_>>();
            self.decode_line(&line[..line.len() - 1]);
            if self.finished {
                return;
            }
        }
    }

    fn decode_line(&mut self, line: &[u8]) {
        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        match serde_json::from_str::<GenerateResponse>(line) {
            Ok(GenerateResponse { error: Some(error), .. }) => {
                self.pending.push_back(Err(ProviderError::Api(error)));
                self.finished = true;
            }
            Ok(chunk) => {
                if !chunk.response.is_empty() {
                    self.pending.push_back(Ok(chunk.response));
                }
                if chunk.done {
                    self.finished = true;
                }
            }
            Err(e) => {
                self.pending.push_back(Err(ProviderError::Json(e)));
                self.finished = true;
            }
        }
    }
}

/// Turns a newline-delimited JSON byte stream into text fragments.
///
/// Lines may be split across network chunks. Decoding stops at the first
/// `done: true` line, the first error, or the end of the body.
pub(crate) fn decode_fragments<S, B, E>(bytes: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = std::result::Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<ProviderError> + Send,
{
    let state = DecodeState {
        bytes,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                if item.is_err() {
                    state.pending.clear();
                }
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(chunk.as_ref());
                    state.drain_lines();
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state.pending.push_back(Err(e.into()));
                }
                None => {
                    let rest = std::mem::take(&mut state.buffer);
                    state.decode_line(&rest);
                    state.finished = true;
                }
            }
        }
    })
}
