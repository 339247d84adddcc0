//! Analysis service (mv-analysis) - Main entry point
//!
//! Accepts video and audio uploads, drives each through the external
//! detector, streams progress and alerts over WebSocket, and produces a
//! narrative report per job.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};

use mv_analysis::config::AnalysisConfig;
use mv_analysis::{build_router, AppState};

/// Command-line arguments for mv-analysis
#[derive(Parser, Debug)]
#[command(name = "mv-analysis")]
#[command(about = "Media analysis orchestration service")]
#[command(version)]
struct Args {
    /// Path to the TOML config file (falls back to MV_CONFIG, then default locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind (overrides config)
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config =
        AnalysisConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    mv_common::config::init_tracing(&format!(
        "mv_analysis={},mv_common={},tower_http=info",
        config.logging.level, config.logging.level
    ))?;

    info!("Starting mv-analysis v{}", env!("CARGO_PKG_VERSION"));
    info!("Upload directory: {}", config.storage.upload_dir.display());
    info!("Detector service: {}", config.detector.url);
    info!(
        "Report backend: {} (max {} attempts)",
        if config.narrative_api_key().is_some() {
            config.narrative.model.as_str()
        } else {
            "fallback only"
        },
        config.report.max_attempts
    );

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid bind address {}:{}",
                config.server.bind, config.server.port
            )
        })?;

    tokio::fs::create_dir_all(&config.storage.upload_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create upload directory {}",
                config.storage.upload_dir.display()
            )
        })?;

    let state = AppState::from_config(config).context("Failed to initialize service state")?;
    let app = build_router(state);

    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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
