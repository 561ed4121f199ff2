//! Retrieval Augmented Generation (RAG) system.
//!
//! This module manages named knowledge bases and retrieves context for
//! prompts.
//!
//! # Architecture
//!
//! - [`VectorIndexManager`]: creates, extends, lists, deletes and loads
//!   knowledge bases, and retrieves from the loaded one
//! - [`Embedder`]: converts text to vector embeddings via the provider
//! - [`VectorStore`]: named collections with similarity search (LanceDB,
//!   Qdrant or in-memory)
//! - [`Chunker`]: fixed-size overlapping text windows
//!
//! # How It Works
//!
//! 1. **Indexing Phase**:
//!    - Text is extracted from the file and split into chunks (default: 512
//!      characters with 50 character overlap)
//!    - Chunks are embedded in batches
//!    - Embeddings are stored in the knowledge base's collection
//!
//! 2. **Retrieval Phase**:
//!    - The query is converted to a vector embedding
//!    - The store finds the top-k most similar chunks
//!    - Their texts become the prompt context (handled by the chat session)

mod chunker;
mod embedder;
mod lancedb_store;
mod manager;
mod memory_store;
mod qdrant_store;
mod store;
mod types;

pub use chunker::Chunker;
pub use embedder::{Embedder, EmbedderError, BATCH_SIZE};
pub use lancedb_store::LanceDbStore;
pub use manager::{validate_name, KnowledgeBase, VectorIndexManager};
pub use memory_store::MemoryStore;
pub use qdrant_store::QdrantStore;
pub use store::{create_vector_store, StoreError, VectorStore};
pub use types::{
    BatchReport, Document, FileOutcome, HealthStatus, KnowledgeBaseInfo, SearchResult,
};

use crate::extract::ExtractError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("No text could be extracted from {}", .0.display())]
    EmptyDocument(PathBuf),

    #[error("Knowledge base '{0}' already exists")]
    DuplicateName(String),

    #[error("Knowledge base '{0}' not found")]
    NotFound(String),

    #[error("No knowledge base loaded")]
    NoActiveKnowledgeBase,

    #[error("No knowledge bases available. Create one first.")]
    NoKnowledgeBases,

    #[error("Invalid knowledge base name '{0}': use letters, digits, '_', '-' or '.' (at most 64, not starting with '.')")]
    InvalidName(String),

    #[error("Embedding error: {0}")]
    Embedder(#[from] EmbedderError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for RagError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::CollectionNotFound(name) => RagError::NotFound(name),
            StoreError::CollectionExists(name) => RagError::DuplicateName(name),
            other => RagError::Store(other),
        }
    }
}

impl RagError {
    pub fn kind(&self) -> &'static str {
        match self {
            RagError::Extract(e) => e.kind(),
            RagError::EmptyDocument(_) => "EmptyInput",
            RagError::DuplicateName(_) => "DuplicateName",
            RagError::NotFound(_) => "NotFound",
            RagError::NoActiveKnowledgeBase => "NoActiveKnowledgeBase",
            RagError::NoKnowledgeBases => "NoKnowledgeBases",
            RagError::InvalidName(_) => "InvalidName",
            RagError::Embedder(e) => e.kind(),
            RagError::Store(e) => e.kind(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_domain_errors() {
        let err: RagError = StoreError::CollectionNotFound("kb".into()).into();
        assert!(matches!(err, RagError::NotFound(ref n) if n == "kb"));

        let err: RagError = StoreError::CollectionExists("kb".into()).into();
        assert_eq!(err.kind(), "DuplicateName");

        let err: RagError = StoreError::Backend(anyhow::anyhow!("io")).into();
        assert_eq!(err.kind(), "StoreError");
    }

    #[test]
    fn test_extract_kind_passes_through() {
        let err: RagError = ExtractError::UnsupportedFormat("md".into()).into();
        assert_eq!(err.kind(), "UnsupportedFormat");
    }
}
