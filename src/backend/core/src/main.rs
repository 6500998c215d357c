//! Folio Server - Main entry point

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::http::StatusCode;
use clap::Parser;
use folio_core::{
    api::{self, AppState, Pipeline},
    config::Config,
    error::{AlertNotifier, ErrorHandlerLayer, NoopNotifier, WebhookNotifier},
    middleware::{
        auth::Authenticator,
        logger::{self, ConsoleSink, ErrorRecordStore, LoggerLayer, TracingSink},
        rate_limit::{self, RateLimiter},
    },
    observability,
    store::{FsUploadStore, MemoryUserRepository, MemoryWorkRepository},
};
use regex::Regex;

#[derive(Debug, Parser)]
#[command(name = "folio-server", version, about = "Folio portfolio API server")]
struct Args {
    /// Configuration file (TOML); environment variables still override it
    #[arg(short, long, env = "FOLIO_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = match args.config.as_deref() {
        Some(path) => Config::from_file(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    observability::init_logging(&config.logging)?;
    let metrics = observability::init_metrics()?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Folio Server");

    let authenticator = Arc::new(Authenticator::new(config.jwt.auth_config())?);

    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.limiter_config()));
    rate_limit::start_cleanup_task(rate_limiter.clone(), config.rate_limit.cleanup_interval);

    let error_records = Arc::new(ErrorRecordStore::new(config.logging.error_ttl));
    logger::start_purge_task(error_records.clone(), config.logging.error_ttl);

    let mut logger = LoggerLayer::new()
        .with_sink(Arc::new(TracingSink))
        .with_sink(error_records);
    if config.logging.console {
        logger = logger.with_sink(Arc::new(ConsoleSink::new(config.logging.utc_offset_hours)));
    }

    let notifier: Arc<dyn AlertNotifier> = match &config.alert.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone(), config.alert.device_id.clone())?),
        None => Arc::new(NoopNotifier),
    };
    let alert_threshold = StatusCode::from_u16(config.alert.min_status)?;

    let pipeline = Pipeline {
        rate_limiter,
        logger,
        error_handler: ErrorHandlerLayer::new(notifier, alert_threshold),
        cors_allow_origin: Some(Regex::new(&config.server.cors_allow_origin)?),
        metrics: Some(metrics),
    };

    let state = AppState {
        users: Arc::new(MemoryUserRepository::new()),
        works: Arc::new(MemoryWorkRepository::new()),
        uploads: Arc::new(FsUploadStore::new(&config.upload.root)),
        authenticator,
        max_file_size: config.upload.max_file_size,
    };
    tracing::info!(root = %config.upload.root, "Upload store ready");

    let app = api::build_router(state, pipeline);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    tracing::info!(address = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
