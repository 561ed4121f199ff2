//! Knowledge-base lifecycle and retrieval.
//!
//! [`VectorIndexManager`] turns files into chunk records, keeps one collection
//! per knowledge base and owns the handle of the knowledge base currently used
//! for retrieval.

use super::chunker::Chunker;
use super::embedder::Embedder;
use super::store::VectorStore;
use super::types::{BatchReport, Document, FileOutcome, HealthStatus, KnowledgeBaseInfo};
use super::{RagError, Result};
use crate::config::Config;
use crate::extract;
use crate::provider::Provider;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const MAX_NAME_LEN: usize = 64;

/// Checks that `name` can be used as a knowledge-base (and directory) name.
pub fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

    if valid {
        Ok(())
    } else {
        Err(RagError::InvalidName(name.to_string()))
    }
}

/// Handle to a loaded knowledge base.
///
/// Cheap to clone. Holding a handle does not keep the collection alive: once
/// the knowledge base is deleted every operation fails with
/// [`RagError::NotFound`].
#[derive(Clone)]
pub struct KnowledgeBase {
    name: String,
    store: Arc<dyn VectorStore>,
    embedder: Embedder,
}

impl std::fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("name", &self.name)
            .field("embedding_model", &self.embedder.model())
            .finish()
    }
}

impl KnowledgeBase {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn count(&self) -> Result<usize> {
        Ok(self.store.count(&self.name).await?)
    }

    /// Returns the texts of the `k` chunks most similar to `query`.
    ///
    /// Results are ordered by descending score; equal scores are ordered by
    /// record id so repeated queries return the same sequence.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<String>> {
        if !self.store.collection_exists(&self.name).await? {
            return Err(RagError::NotFound(self.name.clone()));
        }

        let query_embedding = self.embedder.embed(query).await?;
        let mut results = self.store.search(&self.name, &query_embedding, k).await?;

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.document.id.cmp(&b.document.id))
        });

        debug!(
            knowledge_base = %self.name,
            results = results.len(),
            top_score = results.first().map(|r| r.score),
            "Retrieved context"
        );

        Ok(results.into_iter().map(|r| r.document.content).collect())
    }

    /// Reads up to `limit` stored records.
    pub async fn sample(&self, limit: usize) -> Result<Vec<Document>> {
        Ok(self.store.peek(&self.name, limit).await?)
    }
}

/// Creates, extends, lists, deletes and loads knowledge bases.
///
/// The store and embedder are shared; the active handle belongs to this
/// manager alone.
pub struct VectorIndexManager {
    store: Arc<dyn VectorStore>,
    embedder: Embedder,
    chunker: Chunker,
    active: Option<KnowledgeBase>,
}

impl VectorIndexManager {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Embedder, chunker: Chunker) -> Self {
        Self {
            store,
            embedder,
            chunker,
            active: None,
        }
    }

    pub fn from_config(
        config: &Config,
        provider: Arc<dyn Provider>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self::new(
            store,
            Embedder::new(provider, config.rag.embedding_model.clone()),
            Chunker::from_config(&config.rag),
        )
    }

    /// Extracts, chunks and embeds `file` into records numbered from `first_id`.
    async fn prepare(&self, file: &Path, name: &str, first_id: usize) -> Result<Vec<Document>> {
        let text = extract::extract(file).await?;
        let chunks = self.chunker.chunk_text(&text);
        if chunks.is_empty() {
            return Err(RagError::EmptyDocument(file.to_path_buf()));
        }

        let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
        let embeddings = self.embedder.embed_batch(&refs).await?;
        let source = file.display().to_string();

        Ok(chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (chunk, embedding))| {
                Document::new(format!("{name}_{}", first_id + i), chunk, embedding)
                    .with_metadata("source", source.as_str())
                    .with_metadata("chunk", i.to_string())
            })
            .collect())
    }

    /// Creates a knowledge base from a single file.
    ///
    /// The file is fully processed before the collection is created, so a
    /// file that cannot be read leaves nothing behind.
    ///
    /// # Returns
    ///
    /// The number of chunks stored.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidName`] for a name that fails [`validate_name`]
    /// - [`RagError::DuplicateName`] if the knowledge base exists
    /// - extraction, embedding and store failures
    pub async fn create_knowledge_base(&self, file: &Path, name: &str) -> Result<usize> {
        validate_name(name)?;
        if self.store.collection_exists(name).await? {
            return Err(RagError::DuplicateName(name.to_string()));
        }

        let documents = self.prepare(file, name, 0).await?;
        let chunk_count = documents.len();

        self.store.create_collection(name).await?;
        if let Err(e) = self.store.add(name, documents).await {
            warn!(knowledge_base = name, error = %e, "Append failed, removing new collection");
            if let Err(drop_err) = self.store.drop_collection(name).await {
                warn!(knowledge_base = name, error = %drop_err, "Failed to remove collection");
            }
            return Err(e.into());
        }

        info!(knowledge_base = name, file = %file.display(), chunks = chunk_count, "Created knowledge base");
        Ok(chunk_count)
    }

    /// Appends a file's chunks to an existing knowledge base.
    ///
    /// # Returns
    ///
    /// The knowledge base's total chunk count afterwards.
    pub async fn add_to_knowledge_base(&self, file: &Path, name: &str) -> Result<usize> {
        validate_name(name)?;
        if !self.store.collection_exists(name).await? {
            return Err(RagError::NotFound(name.to_string()));
        }

        let before = self.store.count(name).await?;
        let documents = self.prepare(file, name, before).await?;
        let added = documents.len();
        self.store.add(name, documents).await?;

        let total = self.store.count(name).await?;
        info!(knowledge_base = name, file = %file.display(), added, total, "Extended knowledge base");
        Ok(total)
    }

    /// Creates the knowledge base from `file`, or extends it if it exists.
    ///
    /// # Returns
    ///
    /// The knowledge base's total chunk count afterwards.
    pub async fn ingest(&self, file: &Path, name: &str) -> Result<usize> {
        if self.exists(name).await? {
            self.add_to_knowledge_base(file, name).await
        } else {
            self.create_knowledge_base(file, name).await
        }
    }

    /// Ingests several files into one knowledge base, in order.
    ///
    /// The first file that succeeds creates the knowledge base; later files
    /// are appended. A failing file is recorded in the report and does not
    /// undo the files around it.
    pub async fn ingest_batch(&self, name: &str, files: &[PathBuf]) -> Result<BatchReport> {
        validate_name(name)?;
        let mut report = BatchReport::default();

        for file in files {
            let before = if self.store.collection_exists(name).await? {
                self.store.count(name).await?
            } else {
                0
            };

            let outcome = match self.ingest(file, name).await {
                Ok(total) => FileOutcome {
                    file: file.clone(),
                    chunks_added: Some(total.saturating_sub(before)),
                    error: None,
                    kind: None,
                },
                Err(e) => {
                    warn!(knowledge_base = name, file = %file.display(), error = %e, "Skipping file");
                    FileOutcome {
                        file: file.clone(),
                        chunks_added: None,
                        kind: Some(e.kind()),
                        error: Some(e.to_string()),
                    }
                }
            };
            report.files.push(outcome);
        }

        if self.store.collection_exists(name).await? {
            report.chunk_count = self.store.count(name).await?;
        }
        Ok(report)
    }

    /// Makes `name` the active knowledge base and returns its handle.
    pub async fn load_knowledge_base(&mut self, name: &str) -> Result<KnowledgeBase> {
        if !self.store.collection_exists(name).await? {
            return Err(RagError::NotFound(name.to_string()));
        }

        let kb = KnowledgeBase {
            name: name.to_string(),
            store: self.store.clone(),
            embedder: self.embedder.clone(),
        };
        self.active = Some(kb.clone());
        debug!(knowledge_base = name, "Loaded knowledge base");
        Ok(kb)
    }

    /// All knowledge bases with their chunk counts, sorted by name.
    pub async fn list_knowledge_bases(&self) -> Result<Vec<KnowledgeBaseInfo>> {
        let mut names = self.store.collection_names().await?;
        names.sort();

        let mut infos = Vec::with_capacity(names.len());
        for name in names {
            let chunk_count = self.store.count(&name).await?;
            infos.push(KnowledgeBaseInfo { name, chunk_count });
        }
        Ok(infos)
    }

    /// Drops the knowledge base and clears the active handle if it pointed
    /// at it.
    pub async fn delete_knowledge_base(&mut self, name: &str) -> Result<()> {
        if !self.store.collection_exists(name).await? {
            return Err(RagError::NotFound(name.to_string()));
        }

        self.store.drop_collection(name).await?;
        if self.active_name() == Some(name) {
            self.active = None;
        }

        info!(knowledge_base = name, "Deleted knowledge base");
        Ok(())
    }

    pub async fn knowledge_base_info(&self, name: &str) -> Result<KnowledgeBaseInfo> {
        if !self.store.collection_exists(name).await? {
            return Err(RagError::NotFound(name.to_string()));
        }
        Ok(KnowledgeBaseInfo {
            name: name.to_string(),
            chunk_count: self.store.count(name).await?,
        })
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.store.collection_exists(name).await?)
    }

    pub fn active(&self) -> Option<&KnowledgeBase> {
        self.active.as_ref()
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active.as_ref().map(KnowledgeBase::name)
    }

    /// Name and size of the active knowledge base, if any.
    pub async fn active_info(&self) -> Result<Option<KnowledgeBaseInfo>> {
        match &self.active {
            Some(kb) => Ok(Some(KnowledgeBaseInfo {
                name: kb.name.clone(),
                chunk_count: kb.count().await?,
            })),
            None => Ok(None),
        }
    }

    /// Retrieves the `k` best chunks from the active knowledge base.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<String>> {
        self.active
            .as_ref()
            .ok_or(RagError::NoActiveKnowledgeBase)?
            .retrieve(query, k)
            .await
    }

    /// Reports whether the active knowledge base can serve queries.
    pub async fn health_check(&self) -> HealthStatus {
        let Some(kb) = &self.active else {
            return HealthStatus::unhealthy("No collection loaded");
        };

        match kb.count().await {
            Ok(0) => HealthStatus::unhealthy("Collection is empty"),
            Ok(count) => match kb.sample(1).await {
                Ok(sample) if !sample.is_empty() => HealthStatus {
                    healthy: true,
                    message: format!("Collection '{}' is healthy with {count} chunks", kb.name),
                },
                Ok(_) => HealthStatus::unhealthy("No documents found in collection"),
                Err(e) => HealthStatus::unhealthy(format!("Health check failed: {e}")),
            },
            Err(e) => HealthStatus::unhealthy(format!("Health check failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::MockProvider;
    use crate::rag::MemoryStore;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        store: Arc<MemoryStore>,
        provider: Arc<MockProvider>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                store: Arc::new(MemoryStore::new()),
                provider: Arc::new(MockProvider::new()),
            }
        }

        fn manager(&self) -> VectorIndexManager {
            VectorIndexManager::new(
                self.store.clone(),
                Embedder::new(self.provider.clone(), "all-minilm"),
                Chunker::new(100, 10),
            )
        }

        fn file(&self, name: &str, content: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            fs::write(&path, content).unwrap();
            path
        }
    }

    fn words(n: usize, word: &str) -> String {
        vec![word; n].join(" ")
    }

    #[test]
    fn test_validate_name() {
        for ok in ["docs", "team-notes_2", "v1.2", &"a".repeat(64)] {
            assert!(validate_name(ok).is_ok(), "{ok}");
        }
        for bad in ["", ".hidden", "../etc", "a/b", "with space", &"a".repeat(65)] {
            assert!(matches!(validate_name(bad), Err(RagError::InvalidName(_))), "{bad}");
        }
    }

    #[tokio::test]
    async fn test_create_then_add_grows_by_chunk_count() {
        let fx = Fixture::new();
        let manager = fx.manager();
        let first = fx.file("first.txt", &words(60, "apple"));
        let second = fx.file("second.txt", &words(90, "banana"));

        let created = manager.create_knowledge_base(&first, "fruit").await.unwrap();
        let expected_second = Chunker::new(100, 10).chunk_text(&words(90, "banana")).len();

        let total = manager.add_to_knowledge_base(&second, "fruit").await.unwrap();
        assert_eq!(total, created + expected_second);

        let ids: Vec<String> = fx
            .store
            .peek("fruit", usize::MAX)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        let expected: Vec<String> = (0..total).map(|i| format!("fruit_{i}")).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_records_carry_source_and_chunk() {
        let fx = Fixture::new();
        let file = fx.file("notes.txt", &words(80, "note"));
        fx.manager().create_knowledge_base(&file, "notes").await.unwrap();

        let docs = fx.store.peek("notes", usize::MAX).await.unwrap();
        assert!(docs.len() > 1);
        for (i, doc) in docs.iter().enumerate() {
            assert_eq!(doc.metadata.get("source"), Some(&file.display().to_string()));
            assert_eq!(doc.metadata.get("chunk"), Some(&i.to_string()));
        }
    }

    #[tokio::test]
    async fn test_duplicate_create_leaves_count_unchanged() {
        let fx = Fixture::new();
        let manager = fx.manager();
        let file = fx.file("a.txt", &words(50, "alpha"));

        let count = manager.create_knowledge_base(&file, "kb").await.unwrap();
        let err = manager.create_knowledge_base(&file, "kb").await.unwrap_err();

        assert!(matches!(err, RagError::DuplicateName(ref n) if n == "kb"));
        assert_eq!(err.kind(), "DuplicateName");
        assert_eq!(manager.knowledge_base_info("kb").await.unwrap().chunk_count, count);
    }

    #[tokio::test]
    async fn test_failed_extraction_creates_nothing() {
        let fx = Fixture::new();
        let manager = fx.manager();

        let missing = fx.dir.path().join("missing.txt");
        let err = manager.create_knowledge_base(&missing, "kb").await.unwrap_err();
        assert_eq!(err.kind(), "FileNotFound");

        let unsupported = fx.file("slides.md", "# heading");
        let err = manager.create_knowledge_base(&unsupported, "kb").await.unwrap_err();
        assert_eq!(err.kind(), "UnsupportedFormat");

        let empty = fx.file("empty.txt", "");
        let err = manager.create_knowledge_base(&empty, "kb").await.unwrap_err();
        assert!(matches!(err, RagError::EmptyDocument(_)));

        assert!(!manager.exists("kb").await.unwrap());
    }

    #[tokio::test]
    async fn test_add_to_missing_knowledge_base() {
        let fx = Fixture::new();
        let file = fx.file("a.txt", "some text");
        let err = fx.manager().add_to_knowledge_base(&file, "ghost").await.unwrap_err();
        assert!(matches!(err, RagError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_removes_everything() {
        let fx = Fixture::new();
        let mut manager = fx.manager();
        let mut other = fx.manager();
        let file = fx.file("a.txt", &words(30, "alpha"));

        manager.create_knowledge_base(&file, "kb").await.unwrap();
        manager.create_knowledge_base(&file, "keep").await.unwrap();
        let handle = manager.load_knowledge_base("kb").await.unwrap();
        other.load_knowledge_base("kb").await.unwrap();

        manager.delete_knowledge_base("kb").await.unwrap();

        let names: Vec<String> = manager
            .list_knowledge_bases()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["keep"]);
        assert_eq!(manager.active_name(), None);

        assert!(matches!(manager.load_knowledge_base("kb").await, Err(RagError::NotFound(_))));
        assert!(matches!(handle.retrieve("alpha", 3).await, Err(RagError::NotFound(_))));
        assert!(matches!(other.retrieve("alpha", 3).await, Err(RagError::NotFound(_))));
        assert!(matches!(manager.delete_knowledge_base("kb").await, Err(RagError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_retrieve_requires_loaded_knowledge_base() {
        let fx = Fixture::new();
        let mut manager = fx.manager();
        let file = fx.file("a.txt", "The capital of France is Paris.");
        manager.create_knowledge_base(&file, "geo").await.unwrap();

        let err = manager.retrieve("capital", 3).await.unwrap_err();
        assert!(matches!(err, RagError::NoActiveKnowledgeBase));

        manager.load_knowledge_base("geo").await.unwrap();
        let context = manager.retrieve("capital of France", 3).await.unwrap();
        assert_eq!(context, vec!["The capital of France is Paris."]);
    }

    #[tokio::test]
    async fn test_retrieve_order_is_deterministic() {
        let fx = Fixture::new();
        let mut manager = fx.manager();
        fx.store.create_collection("ties").await.unwrap();

        let same = MockProvider::embed_text("shared words");
        let other = MockProvider::embed_text("unrelated");
        let docs = vec![
            Document::new("ties_2", "two", same.clone()),
            Document::new("ties_0", "zero", same.clone()),
            Document::new("ties_3", "three", other),
            Document::new("ties_1", "one", same),
        ];
        fx.store.add("ties", docs).await.unwrap();

        manager.load_knowledge_base("ties").await.unwrap();
        let first = manager.retrieve("shared words", 3).await.unwrap();
        assert_eq!(first, vec!["zero", "one", "two"]);
        for _ in 0..5 {
            assert_eq!(manager.retrieve("shared words", 3).await.unwrap(), first);
        }
    }

    #[tokio::test]
    async fn test_list_sorted_and_empty() {
        let fx = Fixture::new();
        let manager = fx.manager();
        assert!(manager.list_knowledge_bases().await.unwrap().is_empty());

        let file = fx.file("a.txt", "short");
        for name in ["zeta", "alpha", "mid"] {
            manager.create_knowledge_base(&file, name).await.unwrap();
        }
        let names: Vec<String> = manager
            .list_knowledge_bases()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn test_ingest_batch_keeps_good_files() {
        let fx = Fixture::new();
        let manager = fx.manager();
        let files = vec![
            fx.dir.path().join("missing.txt"),
            fx.file("one.txt", &words(40, "one")),
            fx.file("bad.docx", "binary"),
            fx.file("two.txt", &words(40, "two")),
        ];

        let report = manager.ingest_batch("batch", &files).await.unwrap();

        assert_eq!(report.files.len(), 4);
        assert_eq!(report.failed().count(), 2);
        assert_eq!(report.files[0].kind, Some("FileNotFound"));
        assert_eq!(report.files[2].kind, Some("UnsupportedFormat"));

        let added: usize = report.succeeded().filter_map(|f| f.chunks_added).sum();
        assert_eq!(report.chunk_count, added);
        assert_eq!(manager.knowledge_base_info("batch").await.unwrap().chunk_count, added);
    }

    #[tokio::test]
    async fn test_ingest_batch_all_bad_creates_nothing() {
        let fx = Fixture::new();
        let manager = fx.manager();
        let files = vec![fx.file("x.doc", "?")];

        let report = manager.ingest_batch("nothing", &files).await.unwrap();
        assert!(!report.any_succeeded());
        assert_eq!(report.chunk_count, 0);
        assert!(!manager.exists("nothing").await.unwrap());
    }

    #[tokio::test]
    async fn test_health_check() {
        let fx = Fixture::new();
        let mut manager = fx.manager();

        let status = manager.health_check().await;
        assert!(!status.healthy);
        assert_eq!(status.message, "No collection loaded");

        fx.store.create_collection("hollow").await.unwrap();
        manager.load_knowledge_base("hollow").await.unwrap();
        assert_eq!(manager.health_check().await.message, "Collection is empty");

        let file = fx.file("a.txt", "content");
        manager.create_knowledge_base(&file, "full").await.unwrap();
        manager.load_knowledge_base("full").await.unwrap();
        assert!(manager.health_check().await.healthy);
    }

    #[tokio::test]
    async fn test_active_info() {
        let fx = Fixture::new();
        let mut manager = fx.manager();
        assert!(manager.active_info().await.unwrap().is_none());

        let file = fx.file("a.txt", "content");
        manager.ingest(&file, "kb").await.unwrap();
        manager.load_knowledge_base("kb").await.unwrap();
        let info = manager.active_info().await.unwrap().unwrap();
        assert_eq!(info, KnowledgeBaseInfo { name: "kb".into(), chunk_count: 1 });
    }
}
