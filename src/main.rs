use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use ratewarden::config::{StoreBackend, WardenConfig};
use ratewarden::http::{AdmissionState, HttpServer};
use ratewarden::store::{CounterStore, MemoryStore, RedisStore, RedisStoreConfig};
use ratewarden::AdmissionEngine;

/// Ratewarden: fixed-window admission control by API token or client address
#[derive(Parser, Debug)]
#[command(name = "ratewarden")]
#[command(version)]
#[command(about, long_about = None)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    info!("Starting Ratewarden admission control service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = WardenConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }

    let store = open_store(&config).await?;
    let engine = Arc::new(AdmissionEngine::new(Arc::clone(&store), config.policies()));

    let policies = engine.policies();
    info!(
        listen_addr = %config.server.listen_addr,
        backend = ?config.store.backend,
        ip_limit = policies.ip.requests_per_window,
        ip_block_secs = policies.ip.block_duration.as_secs(),
        token_policies = policies.tokens.len(),
        "Configuration loaded"
    );

    let state = AdmissionState::new(engine, &config.server)?;

    let server = HttpServer::new(config.server.listen_addr, state);
    let served = server.serve_with_shutdown(shutdown_signal()).await;

    if let Err(e) = store.close().await {
        warn!(error = %e, "Failed to close counter store");
    }
    served?;

    info!("Ratewarden stopped");
    Ok(())
}

fn init_tracing(args: &Args) {
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    match args.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
    }
}

async fn open_store(config: &WardenConfig) -> anyhow::Result<Arc<dyn CounterStore>> {
    let store: Arc<dyn CounterStore> = match config.store.backend {
        StoreBackend::Memory => {
            let interval = Duration::from_millis(config.store.sweep_interval_ms);
            info!("Using in-memory counter store");
            Arc::new(MemoryStore::with_sweeper(interval))
        }
        StoreBackend::Redis => {
            let redis_config = RedisStoreConfig {
                key_prefix: config.store.key_prefix.clone(),
            };
            Arc::new(RedisStore::connect_with_config(&config.store.redis_url, redis_config).await?)
        }
    };
    Ok(store)
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
