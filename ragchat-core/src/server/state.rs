//! Shared state for HTTP handlers.

use crate::chat::{ChatError, ConversationSession};
use crate::config::Config;
use crate::provider::Provider;
use crate::rag::{RagError, VectorIndexManager, VectorStore};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

/// A session shared by every request with the same key.
pub type SharedSession = Arc<tokio::sync::Mutex<ConversationSession>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub model: String,
    pub knowledge_base: String,
}

impl SessionKey {
    pub fn new(model: impl Into<String>, knowledge_base: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            knowledge_base: knowledge_base.into(),
        }
    }
}

struct LruEntries {
    sessions: HashMap<SessionKey, SharedSession>,
    /// Least recently used first
    order: VecDeque<SessionKey>,
}

impl LruEntries {
    fn touch(&mut self, key: &SessionKey) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }
}

/// Least-recently-used cache of conversation sessions keyed by
/// `(model, knowledge base)`.
pub struct SessionCache {
    capacity: usize,
    entries: Mutex<LruEntries>,
}

impl SessionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(LruEntries {
                sessions: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn get(&self, key: &SessionKey) -> Option<SharedSession> {
        let mut entries = self.entries.lock();
        let session = entries.sessions.get(key).cloned()?;
        entries.touch(key);
        Some(session)
    }

    /// Inserts `session` unless another request cached one for `key` first,
    /// and returns whichever is cached.
    pub fn insert(&self, key: SessionKey, session: SharedSession) -> SharedSession {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.sessions.get(&key).cloned() {
            entries.touch(&key);
            return existing;
        }

        entries.sessions.insert(key.clone(), session.clone());
        entries.order.push_back(key);

        while entries.order.len() > self.capacity {
            if let Some(oldest) = entries.order.pop_front() {
                debug!(model = %oldest.model, knowledge_base = %oldest.knowledge_base, "Evicting session");
                entries.sessions.remove(&oldest);
            }
        }
        session
    }

    /// Drops every session bound to `knowledge_base`.
    pub fn evict_knowledge_base(&self, knowledge_base: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.sessions.len();
        entries.sessions.retain(|k, _| k.knowledge_base != knowledge_base);
        entries.order.retain(|k| k.knowledge_base != knowledge_base);
        before - entries.sessions.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type LockMap = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// One async mutex per key, created on first use and dropped again once no
/// guard or waiter holds it.
#[derive(Default)]
pub struct KeyedLocks {
    locks: LockMap,
}

impl KeyedLocks {
    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let lock = self.locks.lock().entry(key.to_string()).or_default().clone();
        let guard = lock.lock_owned().await;
        KeyedGuard {
            guard: Some(guard),
            key: key.to_string(),
            locks: self.locks.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Holds one key of a [`KeyedLocks`].
pub struct KeyedGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    locks: LockMap,
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        // Release first so the guard's own reference is not counted.
        self.guard.take();

        // Clones are only taken under the map lock, so a count of one here
        // means nobody else holds or waits for this key.
        let mut locks = self.locks.lock();
        if locks.get(&self.key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.key);
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    provider: Arc<dyn Provider>,
    store: Arc<dyn VectorStore>,
    sessions: SessionCache,
    ingest_locks: KeyedLocks,
}

impl AppState {
    pub fn new(config: Config, provider: Arc<dyn Provider>, store: Arc<dyn VectorStore>) -> Self {
        let sessions = SessionCache::new(config.server.session_cache_capacity);
        Self {
            inner: Arc::new(AppStateInner {
                config,
                provider,
                store,
                sessions,
                ingest_locks: KeyedLocks::default(),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.inner.provider
    }

    pub fn sessions(&self) -> &SessionCache {
        &self.inner.sessions
    }

    /// Serialises ingestion and deletion for one knowledge base.
    pub async fn lock_knowledge_base(&self, name: &str) -> KeyedGuard {
        self.inner.ingest_locks.lock(name).await
    }

    #[cfg(test)]
    pub(crate) fn held_locks(&self) -> usize {
        self.inner.ingest_locks.len()
    }

    /// A manager for management endpoints; it never has an active handle.
    pub fn manager(&self) -> VectorIndexManager {
        VectorIndexManager::from_config(
            &self.inner.config,
            self.inner.provider.clone(),
            self.inner.store.clone(),
        )
    }

    fn new_session(&self, model: &str) -> ConversationSession {
        let mut session = ConversationSession::new(
            &self.inner.config,
            self.inner.provider.clone(),
            self.inner.store.clone(),
        );
        session.set_model(model);
        session
    }

    /// Returns the cached session for `(model, knowledge_base)`, creating and
    /// loading one on a miss.
    ///
    /// When the knowledge base does not exist and a fallback is configured,
    /// an uncached session over the fallback knowledge base is returned.
    pub async fn session(&self, model: &str, knowledge_base: &str) -> Result<SharedSession, ChatError> {
        let key = SessionKey::new(model, knowledge_base);
        if let Some(session) = self.inner.sessions.get(&key) {
            return Ok(session);
        }

        let mut session = self.new_session(model);
        match session.switch_knowledge_base(knowledge_base).await {
            Ok(()) => {}
            Err(ChatError::Rag(RagError::NotFound(_))) if self.inner.config.server.fallback.is_some() => {
                return self.fallback_session(model, knowledge_base).await;
            }
            Err(e) => return Err(e),
        }

        Ok(self
            .inner
            .sessions
            .insert(key, Arc::new(tokio::sync::Mutex::new(session))))
    }

    async fn fallback_session(&self, model: &str, requested: &str) -> Result<SharedSession, ChatError> {
        let Some(fallback) = self.inner.config.server.fallback.as_ref() else {
            return Err(RagError::NotFound(requested.to_string()).into());
        };
        warn!(
            requested,
            fallback = %fallback.knowledge_base,
            "Knowledge base not found, using fallback"
        );

        let mut session = self.new_session(model);
        let _guard = self.lock_knowledge_base(&fallback.knowledge_base).await;
        if self.manager().exists(&fallback.knowledge_base).await? {
            session.switch_knowledge_base(&fallback.knowledge_base).await?;
        } else {
            session
                .build_index(&fallback.file, Some(&fallback.knowledge_base))
                .await?;
        }
        Ok(Arc::new(tokio::sync::Mutex::new(session)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FallbackConfig;
    use crate::provider::mock::MockProvider;
    use crate::rag::MemoryStore;

    fn state(config: Config) -> AppState {
        AppState::new(config, Arc::new(MockProvider::new()), Arc::new(MemoryStore::new()))
    }

    fn dummy_session(state: &AppState) -> SharedSession {
        Arc::new(tokio::sync::Mutex::new(state.new_session("llama3")))
    }

    #[test]
    fn test_lru_eviction_order() {
        let state = state(Config::default());
        let cache = SessionCache::new(2);
        let a = SessionKey::new("llama3", "a");
        let b = SessionKey::new("llama3", "b");
        let c = SessionKey::new("llama3", "c");

        cache.insert(a.clone(), dummy_session(&state));
        cache.insert(b.clone(), dummy_session(&state));
        assert!(cache.get(&a).is_some());

        cache.insert(c.clone(), dummy_session(&state));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&a).is_some());
        assert!(cache.get(&b).is_none());
        assert!(cache.get(&c).is_some());
    }

    #[test]
    fn test_insert_keeps_existing() {
        let state = state(Config::default());
        let cache = SessionCache::new(4);
        let key = SessionKey::new("llama3", "kb");

        let first = cache.insert(key.clone(), dummy_session(&state));
        let second = cache.insert(key, dummy_session(&state));
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_evict_knowledge_base() {
        let state = state(Config::default());
        let cache = SessionCache::new(8);
        cache.insert(SessionKey::new("llama3", "kb"), dummy_session(&state));
        cache.insert(SessionKey::new("mistral", "kb"), dummy_session(&state));
        cache.insert(SessionKey::new("llama3", "other"), dummy_session(&state));

        assert_eq!(cache.evict_knowledge_base("kb"), 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_keyed_locks_serialise_same_key() {
        let locks = Arc::new(KeyedLocks::default());
        let guard = locks.lock("kb").await;

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = other.lock("kb").await;
        });
        // A different key is independent.
        let _unrelated = locks.lock("other").await;

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_keyed_locks_release_entries() {
        let locks = Arc::new(KeyedLocks::default());
        for i in 0..16 {
            let _guard = locks.lock(&format!("kb{i}")).await;
        }
        assert!(locks.is_empty());

        // A waiting task keeps the entry alive until it is done too.
        let guard = locks.lock("kb").await;
        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = other.lock("kb").await;
        });
        tokio::task::yield_now().await;
        drop(guard);
        assert_eq!(locks.len(), 1);

        waiter.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_session_missing_knowledge_base() {
        let state = state(Config::default());
        let err = state.session("llama3", "ghost").await.unwrap_err();
        assert_eq!(err.kind(), "NotFound");
        assert!(state.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_session_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("fallback.txt");
        std::fs::write(&file, "fallback knowledge").unwrap();

        let mut config = Config::default();
        config.server.fallback = Some(FallbackConfig {
            file,
            knowledge_base: "fallback_kb".to_string(),
        });
        let state = state(config);

        let session = state.session("llama3", "ghost").await.unwrap();
        assert_eq!(session.lock().await.knowledge_base(), Some("fallback_kb"));
        assert!(state.sessions().is_empty());

        // Second miss reuses the fallback collection.
        state.session("llama3", "ghost").await.unwrap();
        let kbs = state.manager().list_knowledge_bases().await.unwrap();
        assert_eq!(kbs.len(), 1);
    }
}
