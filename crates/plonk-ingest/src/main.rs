//! Plonk cache ingestion daemon.
//!
//! Reads repository events and materializes pastes and comments into the
//! local SQLite cache.
//!
//! # Usage
//!
//! ```bash
//! # Replay a recorded stream into an on-disk cache
//! PLONK_DB_PATH=./data/plonk.db plonk-ingest --input ./events/
//!
//! # Consume events piped from a stream subscriber
//! subscriber | plonk-ingest --input -
//! ```
//!
//! # Graceful Shutdown
//!
//! On SIGINT/SIGTERM the daemon:
//! 1. Stops taking new events from the source, even while stdin is idle
//! 2. Lets the in-flight event finish
//! 3. Checkpoints the SQLite WAL
//! 4. Exits cleanly
//!
//! A second signal exits immediately.

use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use plonk_core::metrics::{init_metrics, start_metrics_server};
use plonk_ingest::{
    CacheStore, ChannelSource, Config, IngestHandle, IngestService, Ingester, JsonlConfig,
    JsonlSource, ShortUrlAllocator,
};
use tracing_subscriber::EnvFilter;

/// Events decoded from stdin that may wait for the consumer.
const STDIN_BUFFER: usize = 1024;

/// Plonk cache ingestion daemon.
#[derive(Parser, Debug)]
#[command(name = "plonk-ingest")]
#[command(about = "Materialize paste and comment events into the local cache")]
#[command(version)]
struct Args {
    /// Path to a .env file to load before reading configuration
    #[arg(long, default_value = ".env")]
    dotenv: String,

    /// JSONL file or directory of events, or "-" for stdin
    #[arg(long, short, default_value = "-")]
    input: PathBuf,

    /// Skip unparseable lines instead of aborting
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    continue_on_error: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if std::path::Path::new(&args.dotenv).exists() {
        dotenvy::from_path(&args.dotenv)
            .with_context(|| format!("Failed to load {}", args.dotenv))?;
        eprintln!("Loaded environment from {}", args.dotenv);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,plonk_ingest=debug")),
        )
        .init();

    tracing::info!("Plonk ingestion daemon starting...");

    let config = Config::from_env().context("Invalid configuration")?;

    if config.metrics_port > 0 {
        let handle = init_metrics().context("Failed to install metrics recorder")?;
        start_metrics_server(config.metrics_port, handle)
            .await
            .with_context(|| format!("Failed to bind metrics port {}", config.metrics_port))?;
    }

    let store = Arc::new(
        CacheStore::open(&config.db_path)
            .with_context(|| format!("Failed to open cache at {}", config.db_path.display()))?,
    );
    tracing::info!(
        "Cache ready: {} pastes, {} comments (schema v{})",
        store.paste_count()?,
        store.comment_count()?,
        store.schema_version()?
    );

    let allocator = Arc::new(ShortUrlAllocator::new(config.allocator.clone()));
    let ingester = Ingester::new(Arc::clone(&store), allocator);

    tracing::info!("Starting ingestion from {}", args.input.display());
    let handle = start_ingestion(ingester, &args).context("Failed to start ingestion")?;

    let control = handle.control();
    let signalled = AtomicBool::new(false);
    ctrlc::set_handler(move || {
        if signalled.swap(true, Ordering::SeqCst) {
            tracing::warn!("Second shutdown signal, exiting now");
            std::process::exit(130);
        }
        tracing::info!("Shutdown signal received, stopping gracefully...");
        control.stop();
    })
    .context("Failed to set Ctrl+C handler")?;

    let stats = tokio::task::spawn_blocking(move || handle.join())
        .await
        .context("Ingestion task failed")??;

    tracing::info!("Shutting down...");
    store.checkpoint().context("Failed to checkpoint cache")?;

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("SHUTDOWN COMPLETE");
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("Events received:      {}", stats.received);
    tracing::info!("Events applied:       {}", stats.applied);
    tracing::info!("Events deleted:       {}", stats.deleted);
    tracing::info!("Events ignored:       {}", stats.ignored);
    tracing::info!("Events rejected:      {}", stats.rejected);
    tracing::info!("Events failed:        {}", stats.failed);
    tracing::info!("Source errors:        {}", stats.source_errors);
    tracing::info!("Pastes cached:        {}", store.paste_count()?);

    Ok(())
}

/// Stdin is decoded on its own thread so a stop request is seen while the
/// pipe is idle; files and directories are replayed directly.
fn start_ingestion(ingester: Ingester, args: &Args) -> plonk_ingest::Result<IngestHandle> {
    if args.input.as_os_str() == "-" {
        let source = ChannelSource::from_reader(
            BufReader::new(io::stdin()),
            "stdin",
            STDIN_BUFFER,
            args.continue_on_error,
        )?;
        IngestService::start(ingester, source)
    } else {
        let source = JsonlSource::new(JsonlConfig {
            input: args.input.clone(),
            continue_on_error: args.continue_on_error,
            ..Default::default()
        });
        IngestService::start(ingester, source)
    }
}
