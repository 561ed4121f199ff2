//! Conversations over knowledge bases.
//!
//! A [`ConversationSession`] owns its own [`VectorIndexManager`](crate::rag::VectorIndexManager)
//! and history. Each query retrieves context, builds an augmented prompt
//! ([`build_prompt`]) and calls the model, either waiting for the whole answer
//! or streaming fragments as they arrive.

mod history;
mod prompt;
mod session;

pub use history::{Entry, History, Role};
pub use prompt::build_prompt;
pub use session::{default_name, ConversationSession, SessionStatus};

use crate::provider::ProviderError;
use crate::rag::RagError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Rag(#[from] RagError),

    #[error("Generation failed: {0}")]
    Upstream(#[from] ProviderError),
}

impl ChatError {
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::Rag(e) => e.kind(),
            ChatError::Upstream(e) => e.kind(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
