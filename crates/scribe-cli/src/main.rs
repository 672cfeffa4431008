// ============================================================================
// scribe - CLI for the Scribe recording search index
// ============================================================================
// Usage:
//   scribe stats [--detailed]            Show embedding counts
//   scribe ask "question"                Answer from your recordings
//   scribe import items.json             Add or update source items
//   scribe delete-recording REC_ID       Remove a recording's items and vectors
//   scribe serve --addr 127.0.0.1:7410   Serve the JSON API
// ============================================================================

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::error;

use scribe_cli::server::{self, ApiContext};
use scribe_cli::{init_environment, open_database};
use scribe_core::{embedding_stats, RagConfig, RagService, ScribeDb, SourceItemInput, SourceKind};

/// Scribe recording search tool
#[derive(Parser)]
#[command(name = "scribe", version, about = "Search and question your recordings")]
struct Cli {
    /// Path to the database file (default: ~/.scribe/scribe.redb)
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show embedded record counts per source kind
    Stats {
        /// Compare against content and report pending items
        #[arg(long)]
        detailed: bool,
    },

    /// Ask a question answered from your recordings
    Ask {
        question: String,
    },

    /// Import source items from a JSON array
    Import {
        file: PathBuf,
    },

    /// Delete every item (and its embedding) of a recording
    DeleteRecording {
        recording_id: String,
    },

    /// Serve the JSON API over HTTP
    Serve {
        #[arg(long, default_value = "127.0.0.1:7410")]
        addr: String,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = init_environment() {
        eprintln!("Failed to initialize: {:#}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(Cli::parse()).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = RagConfig::from_env()?;
    if let Some(path) = cli.db_path {
        config.db_path = Some(path);
    }
    let db = open_database(&config)?;

    match cli.command {
        Commands::Stats { detailed } => cmd_stats(&db, detailed),
        Commands::Ask { question } => cmd_ask(&config, &db, &question).await,
        Commands::Import { file } => cmd_import(&db, &file),
        Commands::DeleteRecording { recording_id } => cmd_delete_recording(&db, &recording_id),
        Commands::Serve { addr } => cmd_serve(&config, &db, addr).await,
    }
}

fn cmd_stats(db: &ScribeDb, detailed: bool) -> Result<()> {
    let value = if detailed {
        serde_json::to_value(embedding_stats(&db.content(), &db.vectors())?)?
    } else {
        serde_json::to_value(db.vectors().stats()?)?
    };
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn cmd_ask(config: &RagConfig, db: &ScribeDb, question: &str) -> Result<()> {
    let rag = RagService::from_config(config, db)?;
    let result = rag.answer(question).await?;

    println!("{}\n", result.answer_text);
    if result.is_grounded() {
        println!("{}", serde_json::to_string_pretty(&result.citations)?);
    }
    Ok(())
}

fn cmd_import(db: &ScribeDb, file: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let inputs: Vec<SourceItemInput> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array of source items", file.display()))?;

    let content = db.content();
    let mut created = 0;
    let mut updated = 0;
    let mut unchanged = 0;
    for input in inputs {
        let item = input.into_item();
        let before = content.get_item(item.kind, &item.id)?;
        let stored = content.put_item(&item)?;
        match before {
            None => created += 1,
            Some(prev) if prev.revision != stored.revision => updated += 1,
            Some(_) => unchanged += 1,
        }
    }

    println!(
        "Imported: {} new, {} updated, {} unchanged",
        created, updated, unchanged
    );
    for kind in SourceKind::ALL {
        println!("  {:14} {}", kind.plural(), content.count(kind)?);
    }
    Ok(())
}

fn cmd_delete_recording(db: &ScribeDb, recording_id: &str) -> Result<()> {
    let removed = db.content().delete_recording(recording_id)?;
    if removed == 0 {
        println!("No items found for recording {}", recording_id);
    } else {
        println!("Deleted {} items of recording {}", removed, recording_id);
    }
    Ok(())
}

async fn cmd_serve(config: &RagConfig, db: &ScribeDb, addr: String) -> Result<()> {
    let ctx = ApiContext {
        rag: Arc::new(RagService::from_config(config, db)?),
        vectors: db.vectors(),
        runtime: tokio::runtime::Handle::current(),
    };
    tokio::task::spawn_blocking(move || server::serve(&addr, ctx)).await?
}
