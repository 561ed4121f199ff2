use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration for the whole application.
///
/// Covers the language model, retrieval settings, conversation behaviour,
/// persistence and the web front end. Every section has sensible defaults so a
/// partial YAML file is enough.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    /// Preamble placed at the top of every augmented prompt.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Configuration for the generation model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub base_url: String,
    pub temperature: f64,
}

/// Configuration for RAG processing.
///
/// This covers embedding settings and text processing behavior (chunking, retrieval).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub embedding_model: String,
    /// Dimension of the vectors produced by `embedding_model`.
    pub embedding_dim: usize,
    /// Window size in characters
    pub chunk_size: usize,
    /// Characters shared by consecutive windows
    pub chunk_overlap: usize,
    /// Number of chunks retrieved per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

/// Conversation history behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// History entries folded into each prompt.
    pub history_window: usize,
    /// Hard cap on stored history entries. `None` keeps the full audit trail.
    #[serde(default)]
    pub max_history: Option<usize>,
}

/// Vector database storage mode
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum StorageMode {
    /// Embedded storage - runs in-process with zero setup (default)
    Embedded { path: String },
    /// gRPC storage - connect to external vector database server
    Grpc { url: String },
    /// Process-local storage, lost on exit
    Memory,
}

impl Default for StorageMode {
    fn default() -> Self {
        Self::Embedded {
            path: "./chroma_store".to_string(),
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Embedded { path } => write!(f, "embedded ({path})"),
            Self::Grpc { url } => write!(f, "grpc ({url})"),
            Self::Memory => f.write_str("memory"),
        }
    }
}

/// Storage configuration for all persistence.
///
/// The vector database holds one collection per knowledge base; uploaded
/// source files live under `upload_dir/<knowledge base>/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(default)]
    pub storage_mode: StorageMode,
    pub upload_dir: PathBuf,
}

/// Web front end configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Maximum number of cached `(model, knowledge base)` sessions
    pub session_cache_capacity: usize,
    pub static_dir: PathBuf,
    /// Request body limit for uploads, in bytes
    pub max_upload_size: usize,
    /// Knowledge base built when a requested one cannot be loaded.
    ///
    /// Off unless configured: a fallback can hide a misspelled name.
    #[serde(default)]
    pub fallback: Option<FallbackConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FallbackConfig {
    pub file: PathBuf,
    pub knowledge_base: String,
}

fn default_top_k() -> usize {
    3
}

fn default_system_prompt() -> String {
    "You are a helpful assistant.\nUse the following conversation history and knowledge base context to answer."
        .to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "llama3".to_string(),
            base_url: "http://localhost:11434".to_string(),
            temperature: 0.7,
        }
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            embedding_model: "all-minilm".to_string(),
            embedding_dim: 384,
            chunk_size: 512,
            chunk_overlap: 50,
            top_k: default_top_k(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_window: 5,
            max_history: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_mode: StorageMode::default(),
            upload_dir: PathBuf::from("./uploaded_files"),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            session_cache_capacity: 32,
            static_dir: PathBuf::from("./web"),
            max_upload_size: 50 * 1024 * 1024,
            fallback: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            system_prompt: default_system_prompt(),
            rag: RagConfig::default(),
            chat: ChatConfig::default(),
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `config.yaml` if it exists, otherwise use defaults.
    pub fn load_or_default() -> Self {
        Self::load_path_or_default("config.yaml")
    }

    /// Like [`Config::load_or_default`] for an arbitrary path. A file that
    /// exists but does not load is reported and replaced by defaults.
    pub fn load_path_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Ignoring config file, using defaults");
            Self::default()
        })
    }

    /// Checks invariants serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.rag.chunk_size == 0 {
            return Err(ConfigError::Invalid("rag.chunk_size must be positive".into()));
        }
        if self.rag.chunk_overlap >= self.rag.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "rag.chunk_overlap ({}) must be smaller than rag.chunk_size ({})",
                self.rag.chunk_overlap, self.rag.chunk_size
            )));
        }
        if self.rag.embedding_dim == 0 {
            return Err(ConfigError::Invalid("rag.embedding_dim must be positive".into()));
        }
        if self.rag.top_k == 0 {
            return Err(ConfigError::Invalid("rag.top_k must be positive".into()));
        }
        if self.server.session_cache_capacity == 0 {
            return Err(ConfigError::Invalid(
                "server.session_cache_capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_rag_config_defaults() {
        let config = RagConfig::default();
        assert_eq!(config.embedding_model, "all-minilm");
        assert_eq!(config.chunk_size, 512);
        assert_eq!(config.chunk_overlap, 50);
        assert_eq!(config.top_k, 3);
    }

    #[test]
    fn test_chat_config_defaults() {
        let config = ChatConfig::default();
        assert_eq!(config.history_window, 5);
        assert!(config.max_history.is_none());
    }

    #[test]
    fn test_storage_config_defaults() {
        let config = StorageConfig::default();
        assert_eq!(
            config.storage_mode,
            StorageMode::Embedded { path: "./chroma_store".to_string() }
        );
        assert_eq!(config.upload_dir, PathBuf::from("./uploaded_files"));
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let mut config = Config::default();
        config.rag.chunk_overlap = config.rag.chunk_size;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_path_or_default() {
        let dir = tempfile::tempdir().unwrap();
        let missing = Config::load_path_or_default(dir.path().join("config.yaml"));
        assert_eq!(missing.llm.model, Config::default().llm.model);

        let broken = dir.path().join("broken.yaml");
        fs::write(&broken, "llm:\n  model: [unterminated\n").unwrap();
        assert_eq!(Config::load_path_or_default(&broken).llm.model, Config::default().llm.model);

        let invalid = dir.path().join("invalid.yaml");
        fs::write(&invalid, "llm:\n  model: mistral\nrag:\n  chunk_size: 10\n  chunk_overlap: 20\n").unwrap();
        assert_eq!(Config::load_path_or_default(&invalid).rag.chunk_size, 512);

        let valid = dir.path().join("valid.yaml");
        fs::write(&valid, "llm:\n  model: mistral\n").unwrap();
        assert_eq!(Config::load_path_or_default(&valid).llm.model, "mistral");
    }

    #[test]
    fn test_load_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "llm:\n  model: mistral\n  base_url: http://ollama:11434\n  temperature: 0.2\nstorage:\n  storage_mode:\n    mode: memory\n  upload_dir: /tmp/uploads\nserver:\n  host: 127.0.0.1\n  port: 8080\n  session_cache_capacity: 4\n  static_dir: ./web\n  max_upload_size: 1024\n  fallback:\n    file: sample.pdf\n    knowledge_base: fallback_kb"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.llm.model, "mistral");
        assert_eq!(config.storage.storage_mode, StorageMode::Memory);
        assert_eq!(config.server.port, 8080);
        assert_eq!(
            config.server.fallback,
            Some(FallbackConfig {
                file: PathBuf::from("sample.pdf"),
                knowledge_base: "fallback_kb".to_string(),
            })
        );
        assert_eq!(config.rag.chunk_size, 512);
        assert_eq!(config.chat.history_window, 5);
    }
}
