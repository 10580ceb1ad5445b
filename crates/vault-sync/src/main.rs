//! vault-sync: Headless daemon keeping one vault and its content index in step.
//!
//! Reads JSON operation requests from stdin, one per line, and writes
//! responses and vault events to stdout the same way. Logs go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use vault_core::{EventBus, InMemoryIndex};
use vault_sync::config::{resolve_vault_path, SyncConfig};
use vault_sync::gateway;
use vault_sync::{RenameStrategy, SyncCoordinator, WindowId};

/// The daemon serves a single window.
const DAEMON_WINDOW: WindowId = WindowId(1);

#[derive(Parser, Debug)]
#[command(name = "vault-sync")]
#[command(about = "Keep a vault directory and its content index in sync")]
struct Args {
    /// Path to the vault directory (falls back to VAULT_SYNC_PATH)
    #[arg(short, long)]
    vault: Option<PathBuf>,

    /// Load the index from this JSON snapshot and save it back on shutdown
    #[arg(long)]
    index_file: Option<PathBuf>,

    /// Debounce window for file change notifications, in milliseconds
    #[arg(long, default_value_t = 200)]
    debounce_ms: u64,

    /// Rename protocol: teardown-and-restart or unwatch-target (platform default if omitted)
    #[arg(long, value_parser = parse_strategy)]
    rename_strategy: Option<RenameStrategy>,

    /// Do not reindex files changed outside the daemon
    #[arg(long)]
    no_index_on_change: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

fn parse_strategy(value: &str) -> Result<RenameStrategy, String> {
    RenameStrategy::parse(value)
        .ok_or_else(|| format!("unknown rename strategy '{value}'"))
}

async fn write_line(out: &mut tokio::io::Stdout, line: &str) -> Result<()> {
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,vault_sync=debug,vault_core=debug"
    } else {
        "info,vault_sync=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let vault_path = resolve_vault_path(args.vault)?;
    info!("Starting vault-sync");
    info!("Vault path: {:?}", vault_path);

    let mut config = SyncConfig {
        debounce: Duration::from_millis(args.debounce_ms),
        index_on_change: !args.no_index_on_change,
        ..SyncConfig::default()
    };
    if let Some(strategy) = args.rename_strategy {
        config.rename_strategy = strategy;
    }
    info!("Rename strategy: {:?}", config.rename_strategy);

    let index = match &args.index_file {
        Some(path) => Arc::new(InMemoryIndex::open(path.clone(), config.chunk_chars).await),
        None => Arc::new(InMemoryIndex::with_chunk_chars(config.chunk_chars)),
    };

    // Vault events are forwarded to stdout alongside responses
    let events = Arc::new(EventBus::new());
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<String>();
    let _subscription = events.subscribe(move |event| match serde_json::to_string(&event) {
        Ok(json) => {
            let _ = event_tx.send(json);
        }
        Err(e) => warn!("Failed to serialize event: {}", e),
    });

    let (coordinator, notices) = SyncCoordinator::new(config, events);
    let coordinator = Arc::new(coordinator);
    let watch_loop = coordinator.spawn_watch_loop(notices);

    let root = coordinator
        .bind_vault(DAEMON_WINDOW, &vault_path, index.clone())
        .await
        .with_context(|| format!("Failed to open vault {}", vault_path.display()))?;
    info!("Watching {} ({} indexed paths)", root.display(), index.path_count().await);

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    info!("Daemon running. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        let response = gateway::handle_line(&coordinator, line).await;
                        write_line(&mut stdout, &serde_json::to_string(&response)?).await?;
                    }
                    Ok(None) => {
                        debug!("stdin closed");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read request: {}", e);
                        break;
                    }
                }
            }

            Some(event) = event_rx.recv() => {
                write_line(&mut stdout, &event).await?;
            }

            // Handle graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Shutting down");
    coordinator.unbind(DAEMON_WINDOW).await;
    watch_loop.abort();

    if let Err(e) = index.save().await {
        error!("Failed to save index snapshot: {}", e);
    }
    Ok(())
}
