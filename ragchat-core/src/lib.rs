//! ragchat-core - Retrieval-augmented chat over local knowledge bases
//!
//! Provides the components behind the `ragchat` CLI and web server:
//! - Text extraction and chunking of source documents
//! - Knowledge bases stored as vector collections (LanceDB, Qdrant or in memory)
//! - Conversation sessions that answer from retrieved context via Ollama
//! - An HTTP API for the web UI
//!
//! ## Example
//!
//! ```no_run
//! use ragchat_core::{Config, ConversationSession, OllamaProvider};
//! use ragchat_core::rag::create_vector_store;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load_or_default();
//! let provider = Arc::new(OllamaProvider::from_config(&config));
//! let store = create_vector_store(&config.storage, config.rag.embedding_dim).await?;
//!
//! let mut session = ConversationSession::new(&config, provider, store);
//! session.build_index(Path::new("handbook.pdf"), None).await?;
//! let answer = session.query("How many vacation days do I get?", 3).await?;
//! println!("{answer}");
//! # Ok(())
//! # }
//! ```

pub mod chat;
pub mod config;
pub mod extract;
pub mod provider;
pub mod rag;
pub mod server;

pub use chat::{ChatError, ConversationSession, SessionStatus};
pub use config::{Config, ConfigError};
pub use extract::ExtractError;
pub use provider::{OllamaProvider, Provider, ProviderError};
pub use rag::{KnowledgeBaseInfo, RagError, VectorIndexManager, VectorStore};
pub use server::Server;
