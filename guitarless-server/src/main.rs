//! guitarless-server - Guitar removal service
//!
//! Accepts a song by URL or upload, separates it into stems, and publishes
//! two mixes: the guitar alone and everything but the guitar. Progress is
//! narrated to observers on `GET /progress` (SSE).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use guitarless_common::config::{load_toml_config, RootFolderResolver};
use guitarless_common::Broadcaster;
use guitarless_server::config::{PipelinePaths, ServerConfig, CONFIG_FILE_NAME, ROOT_FOLDER_ENV};
use guitarless_server::AppState;

/// Command-line arguments for guitarless-server
#[derive(Parser, Debug)]
#[command(name = "guitarless-server")]
#[command(about = "Guitar isolation and removal service")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "GUITARLESS_PORT")]
    port: Option<u16>,

    /// Interface to bind
    #[arg(long, env = "GUITARLESS_HOST")]
    host: Option<String>,

    /// TOML config file (default: ~/.config/guitarless/server.toml)
    #[arg(short, long, env = "GUITARLESS_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder for working and output directories
    /// (falls back to GUITARLESS_ROOT_FOLDER, then the config file)
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Longest accepted source, in seconds
    #[arg(long, env = "GUITARLESS_MAX_DURATION_SECONDS")]
    max_duration_seconds: Option<u64>,

    /// Log level when RUST_LOG is unset
    #[arg(long, env = "GUITARLESS_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config: ServerConfig = load_toml_config(args.config.as_deref(), CONFIG_FILE_NAME)
        .context("Failed to load configuration")?;
    apply_overrides(&mut config, &args);

    // Initialize tracing
    let level = config.logging.level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "guitarless_server={0},guitarless_common={0},tower_http={0}",
                    level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting guitarless-server");
    info!(
        "Version: {} ({}, {} build {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_PROFILE"),
        env!("BUILD_TIMESTAMP")
    );

    // Resolve and prepare working directories
    let root_folder = RootFolderResolver::new(ROOT_FOLDER_ENV)
        .resolve(args.root_folder.as_deref(), config.root_folder.as_deref());
    let paths = PipelinePaths::new(&root_folder);
    paths
        .ensure_all()
        .with_context(|| format!("Failed to initialize root folder {}", root_folder.display()))?;
    info!("Root folder: {}", root_folder.display());
    info!(
        "Max source duration: {}s, separation model: {}",
        config.max_duration_seconds, config.tools.separation_model
    );

    let broadcaster = Broadcaster::new();
    let orchestrator = guitarless_server::build_orchestrator(&config, paths, broadcaster);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.host, config.port))?;

    let state = AppState::new(Arc::new(orchestrator), config);
    let app = guitarless_server::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Command-line and environment values win over the TOML file
fn apply_overrides(config: &mut ServerConfig, args: &Args) {
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(seconds) = args.max_duration_seconds {
        config.max_duration_seconds = seconds;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
