// ============================================================================
// embed-all - backfill embeddings for every transcription and enrichment
// ============================================================================
// Takes no arguments. Configuration comes from the environment (.env is
// loaded first). Exits 0 when the run completes, even if some items failed;
// exits 1 when no API key is configured or the run cannot proceed.
// ============================================================================

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::error;

use scribe_cli::{init_environment, open_database, spawn_shutdown_listener};
use scribe_core::{
    EmbeddingPipeline, OpenAiEmbeddingService, RagConfig, ShutdownSignal, SourceKind, StoreStats,
};

#[tokio::main]
async fn main() {
    if let Err(e) = init_environment() {
        eprintln!("Failed to initialize: {:#}", e);
        std::process::exit(1);
    }

    if let Err(e) = run().await {
        error!("embed-all failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = RagConfig::from_env()?;
    if !config.has_api_key() {
        bail!("OPENAI_API_KEY is not set; nothing was embedded");
    }

    let db = open_database(&config)?;
    let embedder = Arc::new(OpenAiEmbeddingService::new(&config)?);

    let shutdown = ShutdownSignal::new();
    let pipeline = EmbeddingPipeline::new(embedder, &db).with_shutdown(shutdown.clone());

    spawn_shutdown_listener(shutdown)?;

    print_stats("Before", &pipeline.get_stats()?);

    let started = Instant::now();
    let results = pipeline.embed_all().await?;
    let elapsed = started.elapsed();

    println!();
    for kind in SourceKind::ALL {
        let summary = results.summary(kind);
        println!(
            "{:14} total {:>5}  embedded {:>5}  skipped {:>5}  errors {:>5}",
            kind.plural(),
            summary.total,
            summary.embedded,
            summary.skipped,
            summary.errors
        );
    }
    if results.interrupted {
        println!("Run interrupted; rerun to embed the remaining items.");
    }
    println!();

    print_stats("After", &pipeline.get_stats()?);
    println!("\nCompleted in {:.1}s", elapsed.as_secs_f64());
    Ok(())
}

fn print_stats(label: &str, stats: &StoreStats) {
    println!("=== {} ===", label);
    for kind in SourceKind::ALL {
        println!("  {:14} {} embedded", kind.plural(), stats.embedded(kind));
    }
}
