//! aquamon-service - device relay, demo sensor and readings API.
//!
//! Run with: `cargo run -p aquamon-service`

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use aquamon_service::{AppState, Config, app};
use aquamon_store::Store;

/// aquamon-service - device relay, demo sensor and readings API.
#[derive(Parser, Debug)]
#[command(name = "aquamon-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Database path (overrides config).
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Relay upstream timeout in seconds (overrides config).
    #[arg(long)]
    relay_timeout: Option<u64>,

    /// Do not serve the simulated sensor.
    #[arg(long)]
    no_demo: bool,

    /// Enable debug logging.
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_default(),
    };

    // Override config with CLI args
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(db_path) = args.database {
        config.storage.path = db_path;
    }
    if let Some(timeout) = args.relay_timeout {
        config.relay.timeout_secs = timeout;
    }
    if args.no_demo {
        config.demo.enabled = false;
    }
    config.validate()?;

    info!("Opening database at {:?}", config.storage.path);
    let store = Store::open(&config.storage.path)
        .with_context(|| format!("failed to open {}", config.storage.path.display()))?;

    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.server.bind))?;
    info!(
        relay_timeout_secs = config.relay.timeout_secs,
        demo = config.demo.enabled,
        "Starting server on {}",
        addr
    );

    let app = app(AppState::new(store, config));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let filter = if args.verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else if args.quiet {
        tracing_subscriber::EnvFilter::new("warn")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
            .add_directive("aquamon_service=info".parse()?)
            .add_directive("tower_http=debug".parse()?)
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
