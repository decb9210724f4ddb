//! pulse-hook - wellbeing webhook ingestion service
//!
//! Startup order: TOML config → tracing → build identity → root folder →
//! aggregate store writer → settings → provider client → HTTP server.

use anyhow::{Context, Result};
use clap::Parser;
use pulse_common::capture::CaptureLog;
use pulse_common::config::{locate_toml_config, log_filter, RootFolderInitializer, RootFolderResolver};
use pulse_common::provider::{ProviderClient, ProviderConfig};
use pulse_common::store::DEFAULT_QUEUE_CAPACITY;
use pulse_common::AggregateStore;
use pulse_hook::api::buildinfo::{BuildInfo, MODULE_NAME};
use pulse_hook::settings::{load_settings, resolve_fallback};
use pulse_hook::{build_router, AppState};
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};

/// Command-line arguments for pulse-hook
#[derive(Parser, Debug)]
#[command(name = "pulse-hook")]
#[command(about = "Webhook ingestion service for wellbeing provider events")]
#[command(version)]
struct Args {
    /// Root folder holding aggregates.json and the capture log
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Address to listen on (default from config, else 127.0.0.1:5740)
    #[arg(short, long, env = "PULSE_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Read before tracing init so the TOML log level can seed the filter
    let (toml_config, config_source) = locate_toml_config();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(log_filter(&toml_config)))
        .init();

    // Build identification immediately after tracing init
    info!("Starting Pulse webhook service: {}", BuildInfo::current());
    config_source.log();

    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(args.root_folder)
        .with_toml(&toml_config)
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to create root folder")?;
    info!("Root folder: {}", initializer.root().display());

    let aggregate_path = initializer.aggregate_path();
    let store = AggregateStore::open(&aggregate_path)
        .await
        .with_context(|| format!("Failed to open aggregate store {}", aggregate_path.display()))?;
    info!(
        "✓ Aggregate store: {} ({} subjects)",
        aggregate_path.display(),
        store.aggregates().len()
    );
    let store = store.spawn(DEFAULT_QUEUE_CAPACITY);

    let settings_path = initializer.settings_path();
    let settings = load_settings(&settings_path).await;
    let fallback = resolve_fallback(&settings, &toml_config);

    let capture = if toml_config.capture_enabled() {
        let log = CaptureLog::new(initializer.capture_log_path());
        info!("Capture log: {}", log.path().display());
        Some(log)
    } else {
        info!("Capture log disabled (capture_events = false)");
        None
    };

    let provider = match ProviderConfig::resolve(&toml_config.provider) {
        Some(config) => match ProviderClient::new(config) {
            Ok(client) => {
                info!("Provider API configured: {}", client.config().base_url);
                Some(client)
            }
            Err(e) => {
                warn!("Provider client unavailable: {}", e);
                None
            }
        },
        None => {
            info!("Provider API not configured (sync endpoints disabled)");
            None
        }
    };

    let state = AppState::new(store, settings_path)
        .with_settings(settings)
        .with_fallback(fallback)
        .with_capture(capture)
        .with_provider(provider)
        .with_body_limit(toml_config.body_limit());
    let app = build_router(state);

    let bind = args.bind.unwrap_or_else(|| toml_config.bind_address());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;
    info!("pulse-hook listening on http://{}", bind);
    info!("Webhook endpoint: http://{}/api/webhook", bind);

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
            warn!("Failed to install Ctrl+C handler: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
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
