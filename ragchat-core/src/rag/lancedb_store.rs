//! LanceDB vector database storage implementation.
//!
//! This module provides integration with LanceDB for embedded, in-process
//! vector storage. Each knowledge base is one table in the database directory.

use super::store::{Result, StoreError, VectorStore};
use super::types::{Document, SearchResult};
use anyhow::Context;
use arrow_array::{
    array::{ArrayRef, FixedSizeListArray, Float32Array, StringArray},
    Array, RecordBatch, RecordBatchIterator,
};
use async_trait::async_trait;
use futures::stream::TryStreamExt;
use lancedb::arrow::arrow_schema::{DataType, Field, Schema};
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, DistanceType, Table};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// LanceDB-based vector store for embedded deployment.
///
/// Provides zero-setup, in-process vector storage using LanceDB.
pub struct LanceDbStore {
    conn: Connection,
    vector_size: usize,
}

#[async_trait]
impl VectorStore for LanceDbStore {
    async fn collection_names(&self) -> Result<Vec<String>> {
        let names = self
            .conn
            .table_names()
            .execute()
            .await
            .context("Failed to list LanceDB tables")?;
        Ok(names)
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.collection_names().await?.iter().any(|n| n == name))
    }

    async fn create_collection(&self, name: &str) -> Result<()> {
        if self.collection_exists(name).await? {
            return Err(StoreError::CollectionExists(name.to_string()));
        }

        self.conn
            .create_empty_table(name, Self::create_schema(self.vector_size))
            .execute()
            .await
            .context("Failed to create LanceDB table")?;

        debug!(table = name, "Created LanceDB table");
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        if !self.collection_exists(name).await? {
            return Err(StoreError::CollectionNotFound(name.to_string()));
        }

        self.conn
            .drop_table(name, &[])
            .await
            .context("Failed to drop table")?;
        Ok(())
    }

    async fn add(&self, collection: &str, documents: Vec<Document>) -> Result<()> {
        let table = self.open(collection).await?;
        if documents.is_empty() {
            return Ok(());
        }

        let batch = self.to_record_batch(&documents)?;
        let schema_ref = batch.schema();
        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema_ref);

        table
            .add(reader)
            .execute()
            .await
            .context("Failed to add documents to LanceDB")?;

        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        let table = self.open(collection).await?;
        let results = table
            .query()
            .nearest_to(query_embedding)
            .context("Invalid query vector")?
            .distance_type(DistanceType::Cosine)
            .limit(top_k)
            .execute()
            .await
            .context("Failed to execute LanceDB query")?;

        let batches: Vec<RecordBatch> = results
            .try_collect()
            .await
            .context("Failed to collect query results")?;

        let mut search_results = Vec::new();
        for batch in &batches {
            let distance_array = column::<Float32Array>(batch, "_distance")?;
            for (i, document) in Self::read_documents(batch)?.into_iter().enumerate() {
                search_results.push(SearchResult {
                    document,
                    score: 1.0 - distance_array.value(i),
                });
            }
        }

        Ok(search_results)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let table = self.open(collection).await?;
        let count = table
            .count_rows(None)
            .await
            .context("Failed to count rows")?;
        Ok(count)
    }

    async fn peek(&self, collection: &str, limit: usize) -> Result<Vec<Document>> {
        let table = self.open(collection).await?;
        let results = table
            .query()
            .limit(limit)
            .execute()
            .await
            .context("Failed to query documents")?;

        let batches: Vec<RecordBatch> = results
            .try_collect()
            .await
            .context("Failed to collect query results")?;

        let mut documents = Vec::new();
        for batch in &batches {
            documents.extend(Self::read_documents(batch)?);
        }
        Ok(documents)
    }
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> anyhow::Result<&'a T> {
    batch
        .column_by_name(name)
        .with_context(|| format!("Missing '{name}' column"))?
        .as_any()
        .downcast_ref::<T>()
        .with_context(|| format!("Unexpected type for '{name}' column"))
}

impl LanceDbStore {
    fn create_schema(vector_size: usize) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    vector_size as i32,
                ),
                false,
            ),
            Field::new("source", DataType::Utf8, true),
            Field::new("chunk", DataType::Utf8, true),
        ]))
    }

    /// Connects to (or creates) the LanceDB database at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory path where LanceDB should store data
    /// * `vector_size` - Dimension of the embedding vectors
    pub async fn new(path: &str, vector_size: usize) -> Result<Self> {
        let conn = connect(path)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self { conn, vector_size })
    }

    async fn open(&self, name: &str) -> Result<Table> {
        if !self.collection_exists(name).await? {
            return Err(StoreError::CollectionNotFound(name.to_string()));
        }
        let table = self
            .conn
            .open_table(name)
            .execute()
            .await
            .context("Failed to open LanceDB table")?;
        Ok(table)
    }

    fn to_record_batch(&self, documents: &[Document]) -> anyhow::Result<RecordBatch> {
        if let Some(bad) = documents.iter().find(|d| d.embedding.len() != self.vector_size) {
            anyhow::bail!(
                "Embedding for '{}' has dimension {}, table expects {}",
                bad.id,
                bad.embedding.len(),
                self.vector_size
            );
        }

        let ids = StringArray::from_iter_values(documents.iter().map(|d| d.id.as_str()));
        let contents = StringArray::from_iter_values(documents.iter().map(|d| d.content.as_str()));
        let sources: StringArray = documents
            .iter()
            .map(|d| d.metadata.get("source").map(String::as_str))
            .collect();
        let chunks: StringArray = documents
            .iter()
            .map(|d| d.metadata.get("chunk").map(String::as_str))
            .collect();

        let values = Float32Array::from_iter_values(
            documents.iter().flat_map(|d| d.embedding.iter().copied()),
        );
        let vectors = FixedSizeListArray::try_new(
            Arc::new(Field::new("item", DataType::Float32, true)),
            self.vector_size as i32,
            Arc::new(values),
            None,
        )
        .context("Failed to build vector column")?;

        RecordBatch::try_new(
            Self::create_schema(self.vector_size),
            vec![
                Arc::new(ids) as ArrayRef,
                Arc::new(contents) as ArrayRef,
                Arc::new(vectors) as ArrayRef,
                Arc::new(sources) as ArrayRef,
                Arc::new(chunks) as ArrayRef,
            ],
        )
        .context("Failed to create record batch")
    }

    /// Rebuilds documents (without embeddings) from a result batch.
    fn read_documents(batch: &RecordBatch) -> anyhow::Result<Vec<Document>> {
        let id_array = column::<StringArray>(batch, "id")?;
        let content_array = column::<StringArray>(batch, "content")?;
        let source_array = column::<StringArray>(batch, "source")?;
        let chunk_array = column::<StringArray>(batch, "chunk")?;

        let documents = (0..batch.num_rows())
            .map(|i| {
                let mut metadata = HashMap::new();
                if !source_array.is_null(i) {
                    metadata.insert("source".to_string(), source_array.value(i).to_string());
                }
                if !chunk_array.is_null(i) {
                    metadata.insert("chunk".to_string(), chunk_array.value(i).to_string());
                }

                Document {
                    id: id_array.value(i).to_string(),
                    content: content_array.value(i).to_string(),
                    embedding: vec![],
                    metadata,
                }
            })
            .collect();

        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, embedding: Vec<f32>) -> Document {
        Document::new(id, format!("text {id}"), embedding)
            .with_metadata("source", "notes.txt")
            .with_metadata("chunk", "0")
    }

    #[tokio::test]
    async fn test_lancedb_tables_per_collection() {
        let dir = tempfile::tempdir().unwrap();
        let store = LanceDbStore::new(dir.path().to_str().unwrap(), 3).await.unwrap();

        store.create_collection("alpha").await.unwrap();
        store.create_collection("beta").await.unwrap();
        assert!(matches!(
            store.create_collection("alpha").await,
            Err(StoreError::CollectionExists(_))
        ));

        store
            .add(
                "alpha",
                vec![doc("alpha_0", vec![1.0, 0.0, 0.0]), doc("alpha_1", vec![0.0, 1.0, 0.0])],
            )
            .await
            .unwrap();

        assert_eq!(store.count("alpha").await.unwrap(), 2);
        assert_eq!(store.count("beta").await.unwrap(), 0);

        let results = store.search("alpha", &[1.0, 0.1, 0.0], 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.id, "alpha_0");
        assert_eq!(results[0].document.metadata.get("source").unwrap(), "notes.txt");

        assert_eq!(store.peek("alpha", 1).await.unwrap().len(), 1);

        store.drop_collection("alpha").await.unwrap();
        assert_eq!(store.collection_names().await.unwrap(), vec!["beta"]);
        assert!(matches!(
            store.count("alpha").await,
            Err(StoreError::CollectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_lancedb_rejects_wrong_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let store = LanceDbStore::new(dir.path().to_str().unwrap(), 3).await.unwrap();
        store.create_collection("kb").await.unwrap();

        let err = store.add("kb", vec![doc("kb_0", vec![1.0])]).await.unwrap_err();
        assert_eq!(err.kind(), "StoreError");
    }
}
