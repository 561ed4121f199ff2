//! HTTP server for the web UI.
//!
//! The server is organized into separate concerns:
//! - `types`: Request and response bodies
//! - `routes`: Handlers under `/api`
//! - `state`: Session cache and per-knowledge-base locks
//! - `uploads`: Storage of uploaded source files
//! - `error`: Mapping of error kinds to status codes

mod error;
mod routes;
mod state;
mod types;
mod uploads;

pub use error::ApiError;
pub use routes::api_routes;
pub use state::{AppState, KeyedGuard, KeyedLocks, SessionCache, SessionKey, SharedSession};
pub use types::{ChatRequest, ChatResponse, StreamChunk};
pub use uploads::{allowed_file, remove_all as remove_uploads, secure_filename, ALLOWED_EXTENSIONS};

use crate::config::Config;
use crate::provider::{OllamaProvider, Provider};
use crate::rag::{create_vector_store, StoreError, VectorStore};
use axum::Router;
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to open vector store: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;

/// Web server exposing knowledge-base management and chat over HTTP.
pub struct Server {
    config: Config,
    state: AppState,
}

impl Server {
    pub fn new(config: Config, provider: Arc<dyn Provider>, store: Arc<dyn VectorStore>) -> Self {
        let state = AppState::new(config.clone(), provider, store);
        Self { config, state }
    }

    /// Creates a server backed by Ollama and the configured vector store.
    ///
    /// An unreachable Ollama is only logged; `/api/status` reports it.
    pub async fn from_config(config: Config) -> Result<Self> {
        let provider = OllamaProvider::from_config(&config);
        if !provider.is_available().await {
            warn!(base_url = provider.base_url(), "Ollama is not reachable");
        }

        let store = create_vector_store(&config.storage, config.rag.embedding_dim).await?;
        Ok(Self::new(config, Arc::new(provider), store))
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.config.server.host, self.config.server.port)
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the router with all routes
    pub fn router(&self) -> Router {
        Router::new()
            .nest("/api", api_routes(self.config.server.max_upload_size))
            .fallback_service(ServeDir::new(&self.config.server.static_dir))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Serves until Ctrl-C.
    pub async fn start(&self) -> Result<()> {
        let addr = self.address();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;

        info!("Listening on http://{}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                let _ = signal::ctrl_c().await;
                info!("Shutting down...");
            })
            .await?;

        Ok(())
    }
}
