//! Deterministic in-process provider for tests.

use super::types::*;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub(crate) const MOCK_DIM: usize = 64;

/// Embeds text as a hashed bag of words and answers every prompt with a
/// canned reply derived from its last `User:` line.
#[derive(Default)]
pub(crate) struct MockProvider {
    prompts: Mutex<Vec<String>>,
    fail_generation: AtomicBool,
    fail_stream_after: Mutex<Option<usize>>,
    stall_stream_after: Mutex<Option<usize>>,
    embed_calls: AtomicUsize,
}

impl MockProvider {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every prompt received by `generate`/`generate_stream`, in order.
    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub(crate) fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().last().cloned()
    }

    pub(crate) fn set_fail_generation(&self, fail: bool) {
        self.fail_generation.store(fail, Ordering::SeqCst);
    }

    /// Makes streams fail after yielding `n` fragments.
    pub(crate) fn set_fail_stream_after(&self, n: Option<usize>) {
        *self.fail_stream_after.lock() = n;
    }

    /// Makes streams hang forever after yielding `n` fragments.
    pub(crate) fn set_stall_stream_after(&self, n: Option<usize>) {
        *self.stall_stream_after.lock() = n;
    }

    pub(crate) fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn embed_text(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; MOCK_DIM];
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let hash = word
                .to_lowercase()
                .bytes()
                .fold(0xcbf29ce484222325u64, |h, b| (h ^ b as u64).wrapping_mul(0x100000001b3));
            vector[(hash % MOCK_DIM as u64) as usize] += 1.0;
        }
        vector
    }

    fn reply_for(prompt: &str) -> String {
        let question = prompt
            .lines()
            .rev()
            .find_map(|line| line.trim().strip_prefix("User: "))
            .unwrap_or_default();
        format!("  Answer to: {question} (from the knowledge base)  ")
    }

    fn record(&self, request: &GenerateRequest) -> Result<String> {
        self.prompts.lock().push(request.prompt.clone());
        if self.fail_generation.load(Ordering::SeqCst) {
            return Err(ProviderError::Api("model not loaded".to_string()));
        }
        Ok(Self::reply_for(&request.prompt))
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        self.record(&request)
    }

    async fn generate_stream(&self, request: GenerateRequest) -> Result<FragmentStream> {
        let reply = self.record(&request)?;
        let fragments: Vec<String> = reply.split_inclusive(' ').map(str::to_string).collect();

        let mut items: Vec<Result<String>> = fragments.into_iter().map(Ok).collect();
        if let Some(n) = *self.fail_stream_after.lock() {
            items.truncate(n);
            items.push(Err(ProviderError::Other("stream interrupted".to_string())));
        }
        if let Some(n) = *self.stall_stream_after.lock() {
            items.truncate(n);
            return Ok(stream::iter(items).chain(stream::pending()).boxed());
        }
        Ok(stream::iter(items).boxed())
    }

    async fn embed(&self, text: &str, _model: &str) -> Result<Vec<f32>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::embed_text(text))
    }

    async fn embed_batch(&self, texts: &[&str], _model: &str) -> Result<Vec<Vec<f32>>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::embed_text(t)).collect())
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(vec![ModelInfo {
            name: "llama3:latest".to_string(),
            size: 4_661_224_676,
        }])
    }
}
