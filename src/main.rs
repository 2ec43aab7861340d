mod config;
mod error;
mod extract;
mod fetch;
mod health;
mod http;
mod lifecycle;
mod metrics;
mod process;
mod store;
#[cfg(test)]
mod testing;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::fetch::HttpFetcher;
use crate::lifecycle::ExtractManager;
use crate::metrics::MetricsRegistry;
use crate::process::TokioProcessRunner;
use crate::store::FsExtractStore;

const DEFAULT_CONFIG_PATH: &str = "/etc/extract-keeper/config.yaml";

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "extract-keeper", about = "OSM extract lifecycle manager")]
struct Cli {
    /// Path to the YAML configuration file.  Built-in defaults are used when
    /// the default path does not exist.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Override `server.http_listen`.
    #[arg(long)]
    listen: Option<String>,

    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// Global state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub manager: Arc<ExtractManager>,
    /// Concrete store handle for storage health checks.
    pub store: Arc<FsExtractStore>,
    pub metrics: MetricsRegistry,
}

// ---------------------------------------------------------------------------
// HTTP server (axum)
// ---------------------------------------------------------------------------

async fn run_http_server(state: AppState) -> Result<()> {
    let listen_addr: std::net::SocketAddr = state
        .config
        .server
        .http_listen
        .parse()
        .context("invalid http_listen address")?;

    let app = http::handler::create_router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {listen_addr}"))?;

    tracing::info!(%listen_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- CLI ----
    let cli = Cli::parse();

    // ---- Config ----
    let optional = cli.config == DEFAULT_CONFIG_PATH;
    let mut config = config::load_config_or_default(&cli.config, optional)?;
    if let Some(listen) = cli.listen {
        config.server.http_listen = listen;
    }
    let config = Arc::new(config);

    // ---- Tracing ----
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match cli.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init(),
    }

    tracing::info!(
        config_path = %cli.config,
        from_file = Path::new(&cli.config).exists(),
        "starting extract-keeper"
    );

    // ---- Ensure the containers directory exists ----
    let containers = config.storage.containers_path();
    tokio::fs::create_dir_all(&containers)
        .await
        .with_context(|| {
            format!(
                "failed to create containers dir: {}",
                containers.display()
            )
        })?;

    // ---- Collaborators ----
    let store = Arc::new(FsExtractStore::new(&containers));
    let fetcher = HttpFetcher::new(&config.fetch)?;
    let runner = TokioProcessRunner::new(config.tools.kill_on_timeout);

    // ---- Metrics ----
    let metrics = MetricsRegistry::new();

    // ---- Lifecycle manager ----
    let manager = Arc::new(ExtractManager::new(
        Arc::clone(&store) as Arc<dyn store::ExtractStore>,
        Arc::new(fetcher),
        Arc::new(runner),
        config.tools.clone(),
        Arc::clone(&metrics.metrics),
    ));

    let existing = manager
        .list()
        .await
        .context("failed to list existing extracts")?;
    tracing::info!(
        extracts = existing.len(),
        path = %containers.display(),
        "extract store ready"
    );

    // ---- App state ----
    let state = AppState {
        config: Arc::clone(&config),
        manager,
        store,
        metrics,
    };

    run_http_server(state).await?;

    tracing::info!("extract-keeper shut down cleanly");
    Ok(())
}
