//! LLM provider abstraction layer.
//!
//! This module defines a common interface for LLM backends to provide text
//! generation (blocking or streamed) and embeddings.

mod types;
pub mod ollama;

#[cfg(test)]
pub(crate) mod mock;

// Re-export common types
pub use types::{
    Provider,
    ProviderError,
    Result,
    FragmentStream,
    GenerateRequest,
    GenerateResponse,
    EmbedRequest,
    EmbedInput,
    EmbedResponse,
    ModelInfo,
};

// Re-export provider implementations
pub use ollama::OllamaProvider;
