//! Thered Server - passive port-knock observer

mod capture;
mod config;
mod handlers;
mod session;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use protocol::{KnockEngine, SecretStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;

/// Knocks buffered between the capture threads and the matcher
const KNOCK_QUEUE: usize = 4096;

#[derive(Parser, Debug)]
#[command(version)]
#[command(about = "Thered server - covert port-knock authentication", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "server.conf")]
    config: PathBuf,

    /// Override the secret directory
    #[arg(long)]
    secret_dir: Option<PathBuf>,

    /// Override the time-window length in seconds
    #[arg(long)]
    window_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let mut config = config::Config::load(&args.config)
        .context("Failed to load configuration")?;
    if let Some(dir) = args.secret_dir {
        config.knock.secret_dir = dir;
    }
    if let Some(secs) = args.window_secs {
        config.knock.window_secs = secs;
    }
    config.validate().context("Invalid configuration")?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("Starting Thered server v{}", env!("CARGO_PKG_VERSION"));
    if args.config.is_file() {
        info!("Loaded configuration from: {:?}", args.config);
    } else {
        info!("No config file at {:?}, using defaults", args.config);
    }

    // Secrets first, then validation state, before any traffic is seen
    let window = config.window()?;
    let store = SecretStore::load(
        &config.knock.secret_dir,
        &config.knock.prefix,
        config.knock.key_length,
    )
    .context("Failed to load secrets")?;

    let engine = Arc::new(KnockEngine::new(&store, window, Utc::now()));
    info!(
        "Validating knocks against {} secrets, window {} seconds",
        engine.states().len(),
        window.secs()
    );

    // Spawn eviction task
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = session::spawn_sweeper(engine.clone(), shutdown_rx);

    // Start packet acquisition
    let (knock_tx, mut knock_rx) = mpsc::channel(KNOCK_QUEUE);
    let _capture = capture::spawn(&config.capture, knock_tx)?;

    // Knocks are handled inline so each source's ports apply in arrival order
    let result = handlers::serve(&mut knock_rx, &engine, &config.logging, tokio::signal::ctrl_c()).await;
    if result.is_ok() {
        info!("Shutting down");
    }

    let _ = shutdown_tx.send(true);
    sweeper.await.context("Session sweeper panicked")?;

    result
}
