//! Shared startup for the scribe binaries.

pub mod server;

use anyhow::{Context, Result};
use scribe_core::{RagConfig, ScribeDb, ShutdownSignal};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Load `.env`, then initialize logging. Call once, first thing in `main`.
pub fn init_environment() -> Result<()> {
    // Load environment variables from .env file
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("scribe_core=info".parse()?)
                .add_directive("scribe_cli=info".parse()?),
        )
        .init();

    Ok(())
}

pub fn open_database(config: &RagConfig) -> Result<ScribeDb> {
    let path = config.resolve_db_path()?;
    let db = ScribeDb::open(&path)
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    info!("Using database {}", path.display());
    Ok(db)
}

/// Trigger `shutdown` on Ctrl-C, or on SIGTERM under unix. The SIGTERM
/// handler is installed before this returns. Needs a tokio runtime.
pub fn spawn_shutdown_listener(shutdown: ShutdownSignal) -> std::io::Result<JoinHandle<()>> {
    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        #[cfg(unix)]
        let received = tokio::select! {
            result = tokio::signal::ctrl_c() => result.map(|_| "Interrupt"),
            _ = terminate.recv() => Ok("SIGTERM"),
        };
        #[cfg(not(unix))]
        let received = tokio::signal::ctrl_c().await.map(|_| "Interrupt");

        match received {
            Ok(signal) => {
                warn!("{} received, finishing current item", signal);
                shutdown.trigger();
            }
            Err(e) => warn!("Failed to listen for shutdown signals: {}", e),
        }
    }))
}
