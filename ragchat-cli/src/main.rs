mod chat;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use ragchat_core::config::Config;
use ragchat_core::rag::{create_vector_store, BatchReport, RagError, VectorIndexManager, VectorStore};
use ragchat_core::{ChatError, ConfigError, ExtractError, OllamaProvider, Provider, ProviderError, Server};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ragchat")]
#[command(about = "Chat with your documents through a local Ollama model", long_about = None)]
#[command(version)]
struct Cli {
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Interactive chat over a knowledge base (default)")]
    Chat(ChatArgs),

    #[command(about = "Start the web server")]
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,
    },

    #[command(about = "Knowledge base management commands")]
    Kb {
        #[command(subcommand)]
        command: KbCommands,
    },

    #[command(about = "Show current configuration")]
    Show,

    #[command(about = "Model management commands")]
    Model {
        #[command(subcommand)]
        command: ModelCommands,
    },
}

#[derive(clap::Args, Default)]
struct ChatArgs {
    #[arg(long, help = "Knowledge base to load (default: the first available)")]
    kb: Option<String>,

    #[arg(long, help = "Ingest this file first, into --kb or a name derived from the file")]
    file: Option<PathBuf>,

    #[arg(short, long, help = "Override the configured model")]
    model: Option<String>,
}

#[derive(Subcommand)]
enum KbCommands {
    #[command(about = "Create a knowledge base from one or more files")]
    Create {
        name: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    #[command(about = "Add files to an existing knowledge base")]
    Add {
        name: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    #[command(about = "List knowledge bases")]
    List,

    #[command(about = "Delete a knowledge base and its uploaded files")]
    Delete { name: String },

    #[command(about = "Show chunk count and a few sample chunks")]
    Info { name: String },
}

#[derive(Subcommand)]
enum ModelCommands {
    #[command(about = "Show current model")]
    Show,

    #[command(about = "Set the LLM model")]
    Set {
        #[arg(help = "Model name (e.g., 'llama3' or 'mistral:7b')")]
        model: String,
    },

    #[command(about = "List available models from Ollama")]
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or_else(|| Commands::Chat(ChatArgs::default()));

    // Keep logs out of the conversation unless asked for.
    let default_filter = match command {
        Commands::Chat(_) => "ragchat_core=warn",
        _ => "ragchat_core=info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();

    match run(&cli.config, command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(error_kind(&e), &format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}

async fn run(config_path: &Path, command: Commands) -> Result<()> {
    match command {
        Commands::Chat(args) => chat::run(load_config(config_path)?, args.kb, args.file, args.model).await,
        Commands::Serve { host, port } => serve(load_config(config_path)?, host, port).await,
        Commands::Kb { command } => knowledge_base(load_config(config_path)?, command).await,
        Commands::Show => {
            show_config(&load_config(config_path)?);
            Ok(())
        }
        Commands::Model { command } => match command {
            ModelCommands::Show => {
                let config = load_config(config_path)?;
                println!("{}: {}", "Current model".bold(), config.llm.model.cyan());
                Ok(())
            }
            ModelCommands::Set { model } => set_model(config_path, &model),
            ModelCommands::List => list_models(&load_config(config_path)?).await,
        },
    }
}

/// Loads the config file, falling back to defaults when it does not exist.
fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        debug!(path = %path.display(), "No config file, using defaults");
        return Ok(Config::default());
    }
    Config::load(path).with_context(|| format!("Failed to load config from {}", path.display()))
}

/// Best-effort stable kind of the innermost library error.
fn error_kind(error: &anyhow::Error) -> &'static str {
    for cause in error.chain() {
        if let Some(e) = cause.downcast_ref::<ChatError>() {
            return e.kind();
        }
        if let Some(e) = cause.downcast_ref::<RagError>() {
            return e.kind();
        }
        if let Some(e) = cause.downcast_ref::<ProviderError>() {
            return e.kind();
        }
        if let Some(e) = cause.downcast_ref::<ExtractError>() {
            return e.kind();
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return "ConfigError";
        }
    }
    "Error"
}

pub(crate) fn print_error(kind: &str, message: &str) {
    eprintln!("{} {} {}", "✗".red().bold(), format!("[{kind}]").red(), message);
}

pub(crate) async fn open_store(config: &Config) -> Result<Arc<dyn VectorStore>> {
    create_vector_store(&config.storage, config.rag.embedding_dim)
        .await
        .context("Failed to open vector store")
}

fn show_config(config: &Config) {
    println!("{}", "Current Configuration:".bold().green());
    println!();
    println!("{}", "LLM:".bold());
    println!("  Model:          {}", config.llm.model.cyan());
    println!("  Base URL:       {}", config.llm.base_url);
    println!("  Temperature:    {}", config.llm.temperature);
    println!();
    println!("{}", "RAG:".bold());
    println!("  Embedding Model: {} ({} dims)", config.rag.embedding_model.cyan(), config.rag.embedding_dim);
    println!("  Chunk Size:      {}", config.rag.chunk_size);
    println!("  Chunk Overlap:   {}", config.rag.chunk_overlap);
    println!("  Top K:           {}", config.rag.top_k);
    println!();
    println!("{}", "Chat:".bold());
    println!("  History Window:  {}", config.chat.history_window);
    match config.chat.max_history {
        Some(max) => println!("  Max History:     {max}"),
        None => println!("  Max History:     unlimited"),
    }
    println!();
    println!("{}", "Storage:".bold());
    println!("  Vector DB:       {}", config.storage.storage_mode);
    println!("  Uploads:         {}", config.storage.upload_dir.display());
    println!();
    println!("{}", "Server:".bold());
    println!("  Address:         {}:{}", config.server.host, config.server.port);
    println!("  Static Files:    {}", config.server.static_dir.display());
    println!("  Session Cache:   {}", config.server.session_cache_capacity);
    if let Some(fallback) = &config.server.fallback {
        println!(
            "  Fallback:        {} ({})",
            fallback.knowledge_base,
            fallback.file.display()
        );
    }
}

fn set_model(config_path: &Path, model: &str) -> Result<()> {
    let content = if config_path.exists() {
        std::fs::read_to_string(config_path).context("Failed to read config file")?
    } else {
        String::new()
    };

    let mut config: serde_yaml::Value = if content.trim().is_empty() {
        serde_yaml::Value::Mapping(Default::default())
    } else {
        serde_yaml::from_str(&content).context("Failed to parse config")?
    };

    let Some(root) = config.as_mapping_mut() else {
        bail!("Config file must be a YAML mapping");
    };
    let llm = root
        .entry(serde_yaml::Value::String("llm".to_string()))
        .or_insert_with(|| serde_yaml::Value::Mapping(Default::default()));
    let Some(llm_map) = llm.as_mapping_mut() else {
        bail!("'llm' must be a YAML mapping");
    };
    llm_map.insert(
        serde_yaml::Value::String("model".to_string()),
        serde_yaml::Value::String(model.to_string()),
    );

    let updated_content = serde_yaml::to_string(&config).context("Failed to serialize config")?;
    std::fs::write(config_path, updated_content).context("Failed to write config file")?;

    println!("{} Model updated to: {}", "✓".green().bold(), model.cyan());
    Ok(())
}

async fn list_models(config: &Config) -> Result<()> {
    let provider = OllamaProvider::from_config(config);
    println!("{} Fetching models from {}...", "→".blue(), provider.base_url());
    println!();

    let models = provider
        .list_models()
        .await
        .context("Failed to connect to Ollama. Is it running?")?;

    if models.is_empty() {
        println!("{}", "No models found. Pull a model with 'ollama pull <model>'".yellow());
        return Ok(());
    }

    println!("{}", "Available models:".bold().green());
    println!();
    for model in models {
        let size_gb = model.size as f64 / (1024.0 * 1024.0 * 1024.0);
        println!("  {} {} ({:.2} GB)", "•".cyan(), model.name.bold(), size_gb);
    }

    println!();
    println!("Use {} to set a model", "ragchat model set <model>".bold());
    Ok(())
}

async fn serve(mut config: Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let server = Server::from_config(config).await?;
    println!("{} Web interface at {}", "→".blue(), format!("http://{}", server.address()).bold());
    server.start().await?;
    Ok(())
}

async fn knowledge_base(config: Config, command: KbCommands) -> Result<()> {
    let provider: Arc<dyn Provider> = Arc::new(OllamaProvider::from_config(&config));
    let store = open_store(&config).await?;
    let mut manager = VectorIndexManager::from_config(&config, provider, store);

    match command {
        KbCommands::Create { name, files } => {
            if manager.exists(&name).await? {
                return Err(RagError::DuplicateName(name).into());
            }
            let report = manager.ingest_batch(&name, &files).await?;
            print_report(&report);
            if !report.any_succeeded() {
                bail!("No files could be ingested into '{name}'");
            }
            println!("{} Created '{}' with {} chunks", "✓".green().bold(), name.cyan(), report.chunk_count);
        }
        KbCommands::Add { name, files } => {
            if !manager.exists(&name).await? {
                return Err(RagError::NotFound(name).into());
            }
            let report = manager.ingest_batch(&name, &files).await?;
            print_report(&report);
            if !report.any_succeeded() {
                bail!("No files could be added to '{name}'");
            }
            println!("{} '{}' now has {} chunks", "✓".green().bold(), name.cyan(), report.chunk_count);
        }
        KbCommands::List => {
            let knowledge_bases = manager.list_knowledge_bases().await?;
            if knowledge_bases.is_empty() {
                println!("{}", "No knowledge bases. Create one with 'ragchat kb create <name> <files>'".yellow());
                return Ok(());
            }
            println!("{}", "Knowledge bases:".bold().green());
            for kb in knowledge_bases {
                println!("  {} {} ({} chunks)", "•".cyan(), kb.name.bold(), kb.chunk_count);
            }
        }
        KbCommands::Delete { name } => {
            manager.delete_knowledge_base(&name).await?;
            ragchat_core::server::remove_uploads(&config.storage.upload_dir, &name)
                .await
                .context("Failed to remove uploaded files")?;
            println!("{} Deleted '{}'", "✓".green().bold(), name.cyan());
        }
        KbCommands::Info { name } => {
            let info = manager.knowledge_base_info(&name).await?;
            println!("{}: {}", "Name".bold(), info.name.cyan());
            println!("{}: {}", "Chunks".bold(), info.chunk_count);

            let kb = manager.load_knowledge_base(&name).await?;
            for document in kb.sample(3).await? {
                let source = document.metadata.get("source").map(String::as_str).unwrap_or("?");
                let preview: String = document.content.chars().take(80).collect();
                println!("  {} [{}] {}", "•".cyan(), source, preview.replace('\n', " ").dimmed());
            }
        }
    }

    Ok(())
}

fn print_report(report: &BatchReport) {
    for file in &report.files {
        match (&file.chunks_added, &file.error) {
            (Some(chunks), _) => println!(
                "  {} {} ({} chunks)",
                "✓".green(),
                file.file.display(),
                chunks
            ),
            (None, error) => println!(
                "  {} {} [{}] {}",
                "✗".red(),
                file.file.display(),
                file.kind.unwrap_or("Error"),
                error.as_deref().unwrap_or_default()
            ),
        }
    }
}
