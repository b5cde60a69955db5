//! Zori enrichment daemon.
//!
//! Consumes raw events from the durable stream, enriches them and writes them
//! to ClickHouse.
//!
//! # Usage
//!
//! ```bash
//! # Run with settings from ./.env and the environment
//! zori-enrich
//!
//! # Run with a specific env file
//! zori-enrich --dotenv /etc/zori/enrich.env
//! ```
//!
//! # Graceful Shutdown
//!
//! The daemon handles SIGINT (Ctrl+C) and SIGTERM:
//! 1. Stops pulling new messages
//! 2. Waits for in-flight messages up to the drain timeout
//! 3. Closes the broker connection and flushes the dedupe index

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use zori_core::StreamClient;
use zori_core::metrics::{init_metrics, start_metrics_server};
use zori_enrich::{
    ClickHouseSink, Config, DedupeIndex, EventHandler, MaxMindResolver, Processor, default_stages,
};

/// Zori enrichment daemon.
#[derive(Parser, Debug)]
#[command(name = "zori-enrich")]
#[command(about = "Enriches raw analytics events and persists them to ClickHouse")]
#[command(version)]
struct Args {
    /// Path to .env file (optional).
    #[arg(long, env = "DOTENV_PATH", default_value = ".env")]
    dotenv: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if std::path::Path::new(&args.dotenv).exists() {
        dotenvy::from_path(&args.dotenv)?;
        eprintln!("Loaded environment from {}", args.dotenv);
    }

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,zori_enrich=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Zori enrichment daemon starting...");

    let config = Config::from_env()?;

    if config.metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(config.metrics_port, metrics_handle).await?;
    }

    // Every dependency below is required; failing to reach one aborts startup.
    let geo = MaxMindResolver::open(&config.geoip_path).with_context(|| {
        format!(
            "Failed to open GeoIP database at {}",
            config.geoip_path.display()
        )
    })?;

    let sink = Arc::new(ClickHouseSink::new(&config.clickhouse));
    let healthy = sink
        .health_check()
        .await
        .with_context(|| format!("Failed to reach ClickHouse at {}", config.clickhouse.url))?;
    if !healthy {
        anyhow::bail!("ClickHouse health check failed at {}", config.clickhouse.url);
    }

    let mut handler = EventHandler::new(default_stages(Arc::new(geo)), sink.clone())
        .with_max_redeliveries(config.max_redeliveries);

    let dedupe = match &config.dedupe_path {
        Some(path) => {
            let index = Arc::new(
                DedupeIndex::open(path)
                    .with_context(|| format!("Failed to open dedupe index at {:?}", path))?,
            );
            tracing::info!(
                "Dedupe index opened: ~{} keys",
                index.stats().approximate_keys
            );
            handler = handler.with_dedupe(Arc::clone(&index));
            Some(index)
        }
        None => None,
    };

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

    let mut processor = Processor::new(
        Arc::new(client),
        Arc::new(handler),
        config.processor_settings(),
    );
    processor
        .start()
        .await
        .context("Failed to start consuming")?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, draining...");

    if let Err(e) = processor.stop().await {
        tracing::warn!(error = %e, "error while stopping processor");
    }

    if let Some(index) = dedupe {
        index.flush()?;
    }

    tracing::info!(
        events_inserted = sink.events_inserted(),
        "Shutdown complete"
    );

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
}
