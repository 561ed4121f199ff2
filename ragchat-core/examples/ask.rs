//! Indexes one file and streams an answer to a single question.
//!
//! cargo run -p ragchat-core --example ask -- handbook.pdf "How many vacation days do I get?"

use anyhow::{Context, Result};
use ragchat_core::rag::create_vector_store;
use ragchat_core::{Config, ConversationSession, OllamaProvider};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let file = PathBuf::from(args.next().context("usage: ask <file> <question>")?);
    let question = args.collect::<Vec<_>>().join(" ");

    let config = Config::load_or_default();
    println!("Model: {}", config.llm.model);
    println!("Base URL: {}", config.llm.base_url);

    let provider = OllamaProvider::from_config(&config);
    if !provider.is_available().await {
        eprintln!("\nTroubleshooting:");
        eprintln!("  1. Is Ollama running? (ollama serve)");
        eprintln!("  2. Are the models pulled? (ollama pull {} / ollama pull {})", config.llm.model, config.rag.embedding_model);
        eprintln!("  3. Is the base URL correct? ({})", config.llm.base_url);
        anyhow::bail!("Ollama is not reachable");
    }

    let store = create_vector_store(&config.storage, config.rag.embedding_dim).await?;
    let mut session = ConversationSession::new(&config, Arc::new(provider), store);

    let chunks = session
        .build_index(&file, None)
        .await
        .with_context(|| format!("Failed to index {}", file.display()))?;
    println!("Indexed {} into '{}' ({chunks} chunks)\n", file.display(), session.knowledge_base().unwrap_or_default());

    let top_k = session.top_k();
    session
        .query_stream(&question, top_k, |fragment| {
            print!("{fragment}");
            std::io::stdout().flush().ok();
        })
        .await?;
    println!();

    Ok(())
}
