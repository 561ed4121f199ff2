use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// A chunk record stored in a knowledge-base collection.
///
/// Each document carries the chunk text, its vector embedding for similarity
/// search, and string metadata (`source` file path and `chunk` index).
///
/// # Example
///
/// ```no_run
/// # use ragchat_core::rag::Document;
/// let embedding = vec![0.1, 0.2, 0.3];
/// let doc = Document::new("handbook_0", "Hello world", embedding)
///     .with_metadata("source", "handbook.pdf")
///     .with_metadata("chunk", "0");
/// ```
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: HashMap<String, String>,
}

impl Document {
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            embedding,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A search result containing a document and its similarity score.
///
/// Higher scores indicate better matches. With cosine similarity scores range
/// from -1.0 to 1.0.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub document: Document,
    pub score: f32,
}

/// Name and size of a knowledge base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KnowledgeBaseInfo {
    pub name: String,
    pub chunk_count: usize,
}

/// Outcome of [`VectorIndexManager::health_check`](super::VectorIndexManager::health_check).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub message: String,
}

impl HealthStatus {
    pub(crate) fn unhealthy(message: impl Into<String>) -> Self {
        Self { healthy: false, message: message.into() }
    }
}

/// Per-file result of a batch ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub file: PathBuf,
    /// Chunks contributed by this file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks_added: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
}

/// Report of [`VectorIndexManager::ingest_batch`](super::VectorIndexManager::ingest_batch).
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub files: Vec<FileOutcome>,
    /// Collection size after the batch
    pub chunk_count: usize,
}

impl BatchReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &FileOutcome> {
        self.files.iter().filter(|f| f.error.is_none())
    }

    pub fn failed(&self) -> impl Iterator<Item = &FileOutcome> {
        self.files.iter().filter(|f| f.error.is_some())
    }

    pub fn any_succeeded(&self) -> bool {
        self.succeeded().next().is_some()
    }
}
