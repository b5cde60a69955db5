//! Zori ingestion gateway.
//!
//! Accepts analytics events over HTTP and publishes them to the raw event
//! stream for the enrichment processor.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::http::Request;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use zori_core::StreamClient;
use zori_core::metrics::{init_metrics, start_metrics_server};

use zori_gateway::{AppState, CachedProjectLookup, Config, SqliteProjectStore, router};

/// Zori ingestion gateway.
#[derive(Parser, Debug)]
#[command(name = "zori-gateway")]
#[command(about = "HTTP ingestion gateway for Zori analytics events", long_about = None)]
struct Args {
    /// Path to .env file (optional).
    #[arg(long, env = "DOTENV_PATH", default_value = ".env")]
    dotenv: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load .env file if it exists
    if std::path::Path::new(&args.dotenv).exists() {
        dotenvy::from_path(&args.dotenv)?;
        eprintln!("Loaded environment from {}", args.dotenv);
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    let bind_addr = config.bind_addr.clone();

    if config.metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(config.metrics_port, metrics_handle).await?;
    }

    // Stream provisioning is fatal on failure
    let client = StreamClient::connect(&config.stream)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", config.stream.url))?;
    client
        .ensure_stream(
            &config.stream.stream_name,
            &config.stream.subject,
            config.stream.max_bytes,
        )
        .await
        .context("Failed to create or bind the raw event stream")?;

    let store = SqliteProjectStore::open(&config.project_db_path).with_context(|| {
        format!(
            "Failed to open project database at {}",
            config.project_db_path.display()
        )
    })?;
    let projects = CachedProjectLookup::new(Arc::new(store), config.project_cache_ttl);

    // Create application state
    let state = AppState::new(config, Arc::new(client.clone()), Arc::new(projects))?;

    // Build router with middleware
    let app = router(state).layer(TraceLayer::new_for_http().make_span_with(
        |request: &Request<_>| {
            tracing::span!(
                Level::INFO,
                "http_request",
                method = %request.method(),
                path = %request.uri().path(),
            )
        },
    ));

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "starting server");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Flush anything still buffered for the broker
    if let Err(e) = client.close().await {
        tracing::warn!(error = %e, "failed to close stream connection");
    }

    tracing::info!("gateway stopped");

    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "failed to listen for SIGTERM");
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
