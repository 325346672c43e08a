use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use floodcontrol::clock::SystemClock;
use floodcontrol::config::AppConfig;
use floodcontrol::driver;
use floodcontrol::floodcontrol::FloodControl;
use floodcontrol::store::{InMemoryStore, RedisStore, StateStore, StoreBackend};

/// Drive simulated traffic through a store-backed flood control.
#[derive(Debug, Parser)]
#[command(name = "floodcontrol", version, about)]
struct Args {
    /// Configuration files, comma separated; later files override earlier ones
    #[arg(long = "config-files", value_delimiter = ',', required = true)]
    config_files: Vec<PathBuf>,

    /// File of environment variables to load before reading configuration
    #[arg(long = "env-file")]
    env_file: Option<PathBuf>,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match args.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    info!("Starting flood control");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    if let Some(ref path) = args.env_file {
        dotenvy::from_path(path)
            .with_context(|| format!("failed to load environment file {}", path.display()))?;
        info!(path = %path.display(), "Environment variables loaded");
    }

    let config = AppConfig::load(&args.config_files[..]).context("failed to load configuration")?;
    info!(backend = ?config.app.store.backend, "Configuration loaded");

    // The composition root owns the store connection and hands it to the limiter.
    let store: Arc<dyn StateStore> = match config.app.store.backend {
        StoreBackend::Redis => Arc::new(
            RedisStore::connect(&config.app.redis, config.app.store.command_timeout())
                .await
                .context("failed to connect to Redis")?,
        ),
        StoreBackend::Memory => Arc::new(InMemoryStore::new(Arc::new(SystemClock))),
    };

    let flood_control = FloodControl::new(store, &config.app.flood_control)
        .context("failed to initialize flood control")?;
    info!(
        window_secs = flood_control.window().as_secs(),
        limit = flood_control.limit(),
        "Flood control initialized"
    );

    let summary = driver::run(&flood_control, &config.app.driver, shutdown_signal()).await;

    info!(
        allowed = summary.allowed,
        denied = summary.denied,
        failed = summary.failed,
        "Flood control stopped"
    );
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping simulation");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping simulation");
        }
    }
}
