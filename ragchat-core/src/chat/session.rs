//! A single conversation over a knowledge base.
//!
//! The session retrieves context from the loaded knowledge base, folds the
//! recent history and that context into an augmented prompt, and records the
//! exchange once the model has answered.

use super::history::{Entry, History};
use super::prompt::build_prompt;
use super::Result;
use crate::config::Config;
use crate::provider::{GenerateRequest, Provider};
use crate::rag::{KnowledgeBaseInfo, RagError, VectorIndexManager, VectorStore};
use futures::StreamExt;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Snapshot of a session for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub model: String,
    pub knowledge_base: Option<String>,
    pub chunk_count: Option<usize>,
    pub available: Vec<KnowledgeBaseInfo>,
}

/// Multi-turn chat grounded in one knowledge base at a time.
///
/// # Examples
///
/// ```no_run
/// use ragchat_core::{Config, ConversationSession, OllamaProvider};
/// use ragchat_core::rag::create_vector_store;
/// use std::sync::Arc;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::load_or_default();
/// let provider = Arc::new(OllamaProvider::from_config(&config));
/// let store = create_vector_store(&config.storage, config.rag.embedding_dim).await?;
///
/// let mut session = ConversationSession::new(&config, provider, store);
/// session.build_index("handbook.pdf".as_ref(), None).await?;
/// let answer = session.query("How many vacation days do I get?", 3).await?;
/// println!("{answer}");
/// # Ok(())
/// # }
/// ```
pub struct ConversationSession {
    manager: VectorIndexManager,
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f64,
    top_k: usize,
    preamble: String,
    history: History,
    history_window: usize,
}

impl ConversationSession {
    pub fn new(config: &Config, provider: Arc<dyn Provider>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            manager: VectorIndexManager::from_config(config, provider.clone(), store),
            provider,
            model: config.llm.model.clone(),
            temperature: config.llm.temperature,
            top_k: config.rag.top_k,
            preamble: config.system_prompt.clone(),
            history: History::new(config.chat.max_history),
            history_window: config.chat.history_window,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn set_temperature(&mut self, temperature: f64) {
        self.temperature = temperature;
    }

    /// Default number of chunks retrieved per query.
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn history(&self) -> &[Entry] {
        self.history.entries()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn knowledge_base(&self) -> Option<&str> {
        self.manager.active_name()
    }

    pub fn manager(&self) -> &VectorIndexManager {
        &self.manager
    }

    async fn prepare(&self, text: &str, k: usize) -> Result<GenerateRequest> {
        let context = self.manager.retrieve(text, k).await?;
        let prompt = build_prompt(
            &self.preamble,
            self.history.recent(self.history_window),
            &context,
            text,
        );

        debug!(
            model = %self.model,
            context_chunks = context.len(),
            prompt_len = prompt.len(),
            "Built augmented prompt"
        );
        Ok(GenerateRequest::new(&self.model, prompt).with_temperature(self.temperature))
    }

    /// Answers `text` using the `k` most relevant chunks of the active
    /// knowledge base.
    ///
    /// The exchange is recorded (with the answer trimmed) only when
    /// generation succeeds; the untrimmed answer is returned.
    ///
    /// # Errors
    ///
    /// - [`RagError::NoActiveKnowledgeBase`] if nothing is loaded
    /// - [`ChatError::Upstream`](super::ChatError::Upstream) if the model server fails
    pub async fn query(&mut self, text: &str, k: usize) -> Result<String> {
        let request = self.prepare(text, k).await?;
        let response = self.provider.generate(request).await?;

        self.history.push_exchange(text, response.trim());
        Ok(response)
    }

    /// Streaming version of [`query`](Self::query).
    ///
    /// `on_fragment` receives each piece of the answer as it arrives and the
    /// full answer is returned at the end. A failure mid-stream is returned
    /// after the fragments already delivered and leaves the history as it
    /// was. Dropping the future cancels the generation.
    pub async fn query_stream<F>(&mut self, text: &str, k: usize, mut on_fragment: F) -> Result<String>
    where
        F: FnMut(&str) + Send,
    {
        let request = self.prepare(text, k).await?;
        let mut fragments = self.provider.generate_stream(request).await?;

        let mut response = String::new();
        while let Some(fragment) = fragments.next().await {
            let fragment = fragment?;
            on_fragment(&fragment);
            response.push_str(&fragment);
        }

        self.history.push_exchange(text, response.trim());
        Ok(response)
    }

    /// Makes `name` the active knowledge base. History is kept.
    pub async fn switch_knowledge_base(&mut self, name: &str) -> Result<()> {
        self.manager.load_knowledge_base(name).await?;
        info!(knowledge_base = name, "Switched knowledge base");
        Ok(())
    }

    /// Ingests `file` into `name` (default: derived from the file name),
    /// creating the knowledge base if needed, and makes it active.
    ///
    /// # Returns
    ///
    /// The knowledge base's chunk count.
    pub async fn build_index(&mut self, file: &Path, name: Option<&str>) -> Result<usize> {
        let name = match name {
            Some(name) => name.to_string(),
            None => default_name(file),
        };

        let count = self.manager.ingest(file, &name).await?;
        self.manager.load_knowledge_base(&name).await?;
        Ok(count)
    }

    /// Loads `name`, or the first available knowledge base when `None`.
    ///
    /// # Returns
    ///
    /// The name that was loaded.
    pub async fn load_index(&mut self, name: Option<&str>) -> Result<String> {
        let name = match name {
            Some(name) => name.to_string(),
            None => self
                .manager
                .list_knowledge_bases()
                .await?
                .into_iter()
                .next()
                .map(|info| info.name)
                .ok_or(RagError::NoKnowledgeBases)?,
        };

        self.manager.load_knowledge_base(&name).await?;
        Ok(name)
    }

    pub async fn list_knowledge_bases(&self) -> Result<Vec<KnowledgeBaseInfo>> {
        Ok(self.manager.list_knowledge_bases().await?)
    }

    pub async fn delete_knowledge_base(&mut self, name: &str) -> Result<()> {
        Ok(self.manager.delete_knowledge_base(name).await?)
    }

    pub async fn status(&self) -> Result<SessionStatus> {
        let active = self.manager.active_info().await.or_else(|e| match e {
            // The active collection was deleted elsewhere.
            RagError::NotFound(_) => Ok(None),
            other => Err(other),
        })?;

        Ok(SessionStatus {
            model: self.model.clone(),
            knowledge_base: self.manager.active_name().map(str::to_string),
            chunk_count: active.map(|info| info.chunk_count),
            available: self.manager.list_knowledge_bases().await?,
        })
    }
}

/// Knowledge-base name for a file: its stem with disallowed characters
/// replaced by `_`.
pub fn default_name(file: &Path) -> String {
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let name: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let name = name.trim_start_matches('.');
    let name: String = name.chars().take(64).collect();
    if name.is_empty() {
        "knowledge_base".to_string()
    } else {
        name
    }
}
