//! Qdrant vector database storage implementation.
//!
//! This module provides integration with a Qdrant server over gRPC. Each
//! knowledge base maps to one Qdrant collection.

use super::store::{Result, StoreError, VectorStore};
use super::types::{Document, SearchResult};
use anyhow::Context;
use async_trait::async_trait;
use qdrant_client::{
    qdrant::{
        vectors_config::Config, CountPointsBuilder, CreateCollectionBuilder, Distance, Payload,
        PointStruct, ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder,
        VectorParamsBuilder, VectorsConfig, Value,
    },
    Qdrant,
};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

/// Qdrant-based vector store for document embeddings.
///
/// Record ids are hashed into Qdrant's numeric point ids; the original id is
/// kept in the payload next to the content and metadata.
#[derive(Clone)]
pub struct QdrantStore {
    client: Arc<Qdrant>,
    vector_size: usize,
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn collection_names(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .list_collections()
            .await
            .context("Failed to list collections")?;
        Ok(response.collections.into_iter().map(|c| c.name).collect())
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let exists = self
            .client
            .collection_exists(name)
            .await
            .context("Failed to check collection")?;
        Ok(exists)
    }

    async fn create_collection(&self, name: &str) -> Result<()> {
        if self.collection_exists(name).await? {
            return Err(StoreError::CollectionExists(name.to_string()));
        }

        self.client
            .create_collection(CreateCollectionBuilder::new(name).vectors_config(VectorsConfig {
                config: Some(Config::Params(
                    VectorParamsBuilder::new(self.vector_size as u64, Distance::Cosine).build(),
                )),
            }))
            .await
            .context("Failed to create collection")?;

        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        self.ensure_exists(name).await?;
        self.client
            .delete_collection(name)
            .await
            .context("Failed to delete collection")?;
        Ok(())
    }

    async fn add(&self, collection: &str, documents: Vec<Document>) -> Result<()> {
        self.ensure_exists(collection).await?;
        if documents.is_empty() {
            return Ok(());
        }

        let points: Vec<PointStruct> = documents
            .into_iter()
            .map(|document| {
                let numeric_id = point_id(&document.id);

                let payload: serde_json::Map<String, serde_json::Value> = document
                    .metadata
                    .iter()
                    .map(|(k, v)| (k.clone(), json!(v)))
                    .chain([
                        ("content".to_string(), json!(document.content)),
                        ("id".to_string(), json!(document.id)),
                    ])
                    .collect();

                PointStruct::new(numeric_id, document.embedding, Payload::from(payload))
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, points).wait(true))
            .await
            .context("Failed to upsert points")?;

        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        self.ensure_exists(collection).await?;
        let search_result = self
            .client
            .search_points(
                SearchPointsBuilder::new(collection, query_embedding.to_vec(), top_k as u64)
                    .with_payload(true),
            )
            .await
            .context("Failed to search points")?;

        Ok(search_result
            .result
            .into_iter()
            .map(|point| SearchResult {
                document: document_from_payload(point.payload),
                score: point.score,
            })
            .collect())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        self.ensure_exists(collection).await?;
        let response = self
            .client
            .count(CountPointsBuilder::new(collection).exact(true))
            .await
            .context("Failed to count points")?;

        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }

    async fn peek(&self, collection: &str, limit: usize) -> Result<Vec<Document>> {
        self.ensure_exists(collection).await?;
        let scroll_result = self
            .client
            .scroll(
                ScrollPointsBuilder::new(collection)
                    .limit(limit as u32)
                    .with_payload(true),
            )
            .await
            .context("Failed to scroll points")?;

        Ok(scroll_result
            .result
            .into_iter()
            .map(|point| document_from_payload(point.payload))
            .collect())
    }
}

fn document_from_payload(payload: HashMap<String, Value>) -> Document {
    let text = |key: &str| {
        payload
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_default()
    };

    let metadata: HashMap<String, String> = payload
        .iter()
        .filter(|(k, _)| k.as_str() != "content" && k.as_str() != "id")
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect();

    Document {
        id: text("id"),
        content: text("content"),
        embedding: vec![],
        metadata,
    }
}

impl QdrantStore {
    /// Creates a client for the Qdrant server at `url`.
    ///
    /// The connection is established lazily on the first request.
    pub fn new(url: &str, vector_size: usize) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .build()
            .context("Failed to connect to Qdrant server")?;

        Ok(Self {
            client: Arc::new(client),
            vector_size,
        })
    }

    async fn ensure_exists(&self, name: &str) -> Result<()> {
        if self.collection_exists(name).await? {
            Ok(())
        } else {
            Err(StoreError::CollectionNotFound(name.to_string()))
        }
    }
}

/// Numeric Qdrant id for a record id, stable across builds.
fn point_id(record_id: &str) -> u64 {
    let digest = Sha256::digest(record_id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_id_is_stable() {
        // SHA-256("") starts with e3b0c44298fc1c14.
        assert_eq!(point_id("docs_0"), point_id("docs_0"));
        assert_ne!(point_id("docs_0"), point_id("docs_1"));
        assert_eq!(point_id(""), 0xe3b0c44298fc1c14);
    }

    #[test]
    fn test_document_from_payload() {
        let payload: HashMap<String, Value> = [
            ("id", "kb_3"),
            ("content", "chunk text"),
            ("source", "a.pdf"),
            ("chunk", "3"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), Value::from(v)))
        .collect();

        let doc = document_from_payload(payload);
        assert_eq!(doc.id, "kb_3");
        assert_eq!(doc.content, "chunk text");
        assert_eq!(doc.metadata.len(), 2);
        assert_eq!(doc.metadata.get("chunk").unwrap(), "3");
    }

    #[tokio::test]
    #[ignore] // Requires Qdrant server running
    async fn test_qdrant_store_grpc() {
        let store = QdrantStore::new("http://localhost:6334", 3).unwrap();
        let name = "ragchat_test_collection";
        let _ = store.drop_collection(name).await;

        store.create_collection(name).await.unwrap();
        let doc = Document::new("ragchat_test_0", "Hello world", vec![1.0, 0.0, 0.0]);
        store.add(name, vec![doc]).await.unwrap();

        assert_eq!(store.count(name).await.unwrap(), 1);
        let results = store.search(name, &[1.0, 0.0, 0.0], 3).await.unwrap();
        assert_eq!(results[0].document.content, "Hello world");

        store.drop_collection(name).await.unwrap();
    }
}
