//! Interactive chat loop.

use crate::{open_store, print_error};
use anyhow::{bail, Result};
use colored::Colorize;
use ragchat_core::{Config, ConversationSession, OllamaProvider};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "Commands: /switch <name>, /list, /status, /clear, /help. Type 'exit' to quit.";

pub async fn run(config: Config, kb: Option<String>, file: Option<PathBuf>, model: Option<String>) -> Result<()> {
    let provider = OllamaProvider::from_config(&config);
    if !provider.is_available().await {
        bail!(
            "Ollama is not reachable at {}. Start it with 'ollama serve'",
            provider.base_url()
        );
    }

    let store = open_store(&config).await?;
    let mut session = ConversationSession::new(&config, Arc::new(provider), store);
    if let Some(model) = model {
        session.set_model(model);
    }

    let loaded = match file {
        Some(file) => {
            println!("{} Indexing {}...", "→".blue(), file.display());
            session.build_index(&file, kb.as_deref()).await?;
            session.knowledge_base().unwrap_or_default().to_string()
        }
        None => session.load_index(kb.as_deref()).await?,
    };

    println!(
        "{} Chatting with {} over '{}' (type 'exit' to quit, /help for commands)",
        "✓".green().bold(),
        session.model().cyan(),
        loaded.cyan()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n{} ", "You:".bold().green());
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input.to_lowercase().as_str(), "exit" | "quit") {
            break;
        }
        if let Some(command) = input.strip_prefix('/') {
            run_command(&mut session, command).await;
            continue;
        }

        print!("{} ", "Assistant:".bold().cyan());
        let top_k = session.top_k();
        let result = session
            .query_stream(input, top_k, |fragment| {
                print!("{fragment}");
                let _ = std::io::stdout().flush();
            })
            .await;
        println!();

        if let Err(e) = result {
            print_error(e.kind(), &e.to_string());
        }
    }

    println!("Goodbye!");
    Ok(())
}

async fn run_command(session: &mut ConversationSession, command: &str) {
    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };

    let result = match name {
        "switch" if arg.is_empty() => {
            println!("Usage: /switch <name>");
            Ok(())
        }
        "switch" => session.switch_knowledge_base(arg).await.map(|()| {
            println!("{} Switched to '{}' (history kept)", "✓".green().bold(), arg.cyan());
        }),
        "list" => session.list_knowledge_bases().await.map(|knowledge_bases| {
            let active = session.knowledge_base();
            for kb in knowledge_bases {
                let marker = if Some(kb.name.as_str()) == active { "*" } else { " " };
                println!("  {} {} ({} chunks)", marker.green(), kb.name.bold(), kb.chunk_count);
            }
        }),
        "status" => session.status().await.map(|status| {
            println!("{}: {}", "Model".bold(), status.model.cyan());
            match (status.knowledge_base, status.chunk_count) {
                (Some(kb), Some(count)) => println!("{}: {} ({} chunks)", "Knowledge base".bold(), kb.cyan(), count),
                (Some(kb), None) => println!("{}: {} (missing)", "Knowledge base".bold(), kb.yellow()),
                (None, _) => println!("{}: none", "Knowledge base".bold()),
            }
            println!("{}: {} entries", "History".bold(), session.history().len());
            println!("{}: {}", "Available".bold(), status.available.len());
        }),
        "clear" => {
            session.clear_history();
            println!("{} History cleared", "✓".green().bold());
            Ok(())
        }
        "help" => {
            println!("{HELP}");
            Ok(())
        }
        other => {
            println!("Unknown command '/{other}'. {HELP}");
            Ok(())
        }
    };

    if let Err(e) = result {
        print_error(e.kind(), &e.to_string());
    }
}
