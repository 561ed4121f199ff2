//! Vector store abstraction and factory.
//!
//! This module provides a unified interface for different vector database
//! implementations. A store holds many named collections, one per knowledge
//! base.

use super::lancedb_store::LanceDbStore;
use super::memory_store::MemoryStore;
use super::qdrant_store::QdrantStore;
use super::types::{Document, SearchResult};
use crate::config::{StorageConfig, StorageMode};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Collection '{0}' not found")]
    CollectionNotFound(String),

    #[error("Collection '{0}' already exists")]
    CollectionExists(String),

    #[error("Vector store error: {0:#}")]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::CollectionNotFound(_) => "NotFound",
            StoreError::CollectionExists(_) => "DuplicateName",
            StoreError::Backend(_) => "StoreError",
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified interface for vector database operations.
///
/// Implementations handle collection lifecycle, document storage and
/// similarity search across different backends (LanceDB for embedded, Qdrant
/// for gRPC, a process-local map for tests).
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Names of all collections, in no particular order.
    async fn collection_names(&self) -> Result<Vec<String>>;

    async fn collection_exists(&self, name: &str) -> Result<bool>;

    /// Creates an empty collection. Fails with
    /// [`StoreError::CollectionExists`] if the name is taken.
    async fn create_collection(&self, name: &str) -> Result<()>;

    /// Removes a collection and all of its documents.
    async fn drop_collection(&self, name: &str) -> Result<()>;

    /// Appends documents to an existing collection.
    async fn add(&self, collection: &str, documents: Vec<Document>) -> Result<()>;

    /// Searches for the most similar documents using vector similarity.
    ///
    /// # Returns
    ///
    /// At most `top_k` results, sorted by descending similarity score.
    async fn search(
        &self,
        collection: &str,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>>;

    /// Returns the number of documents in a collection.
    async fn count(&self, collection: &str) -> Result<usize>;

    /// Reads up to `limit` documents without a query vector.
    async fn peek(&self, collection: &str, limit: usize) -> Result<Vec<Document>>;
}

/// Creates a vector store instance based on the storage mode.
///
/// - `Embedded` mode uses LanceDB for zero-setup, in-process storage
/// - `Grpc` mode uses Qdrant for remote server connectivity
/// - `Memory` mode keeps everything in the process
///
/// # Arguments
///
/// * `storage_config` - Storage configuration including storage mode
/// * `vector_size` - Dimension of the embedding vectors
pub async fn create_vector_store(
    storage_config: &StorageConfig,
    vector_size: usize,
) -> Result<Arc<dyn VectorStore>> {
    info!(mode = ?storage_config.storage_mode, vector_size, "Opening vector store");

    match &storage_config.storage_mode {
        StorageMode::Embedded { path } => {
            let store = LanceDbStore::new(path, vector_size).await?;
            Ok(Arc::new(store))
        }
        StorageMode::Grpc { url } => {
            let store = QdrantStore::new(url, vector_size)?;
            Ok(Arc::new(store))
        }
        StorageMode::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_kinds() {
        assert_eq!(StoreError::CollectionNotFound("kb".into()).kind(), "NotFound");
        assert_eq!(StoreError::CollectionExists("kb".into()).kind(), "DuplicateName");
        assert_eq!(
            StoreError::Backend(anyhow::anyhow!("disk full")).kind(),
            "StoreError"
        );
    }

    #[tokio::test]
    async fn test_create_memory_store() {
        let config = StorageConfig {
            storage_mode: StorageMode::Memory,
            ..StorageConfig::default()
        };
        let store = create_vector_store(&config, 8).await.unwrap();
        assert!(store.collection_names().await.unwrap().is_empty());
    }
}
