//! Application state and configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::HeaderValue;
use zori_core::{Publisher, StreamSettings};

use crate::project::ProjectLookup;

/// Application configuration loaded from environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:1324").
    pub bind_addr: String,

    /// Broker connection and stream layout.
    pub stream: StreamSettings,

    /// Path to the SQLite replica of the project table.
    pub project_db_path: PathBuf,

    /// How long a resolved project stays cached.
    pub project_cache_ttl: Duration,

    /// Domain of the `visitor_id` cookie.
    pub cookie_domain: String,

    /// Value of `Access-Control-Allow-Origin`.
    pub cors_allow_origin: String,

    /// Value of `Access-Control-Max-Age`, in seconds.
    pub cors_max_age: u64,

    /// Prometheus exporter port (0 disables it).
    pub metrics_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:1324".to_string(),
            stream: StreamSettings::default(),
            project_db_path: PathBuf::from("./data/projects.db"),
            project_cache_ttl: Duration::from_secs(60),
            cookie_domain: ".zorihq.com".to_string(),
            cors_allow_origin: "*".to_string(),
            cors_max_age: 86_400,
            metrics_port: 9090,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional environment variables:
    /// - `ZORI_GATEWAY_BIND_ADDR`: Server bind address (default: "0.0.0.0:1324")
    /// - `NATS_URL`: Broker URL (default: "nats://localhost:4222")
    /// - `NATS_CREDENTIALS`: Credentials file
    /// - `ZORI_STREAM_NAME`, `ZORI_STREAM_SUBJECT`, `ZORI_STREAM_MAX_BYTES`
    /// - `ZORI_PROJECT_DB_PATH`: Project replica (default: "./data/projects.db")
    /// - `ZORI_PROJECT_CACHE_TTL_SECS`: (default: 60)
    /// - `ZORI_COOKIE_DOMAIN`: (default: ".zorihq.com")
    /// - `ZORI_CORS_ALLOW_ORIGIN`: (default: "*")
    /// - `ZORI_CORS_MAX_AGE`: (default: 86400)
    /// - `ZORI_METRICS_PORT`: (default: 9090)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let bind_addr =
            std::env::var("ZORI_GATEWAY_BIND_ADDR").unwrap_or(defaults.bind_addr);

        let stream = StreamSettings {
            url: std::env::var("NATS_URL").unwrap_or(defaults.stream.url),
            credentials: std::env::var("NATS_CREDENTIALS")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            stream_name: std::env::var("ZORI_STREAM_NAME").unwrap_or(defaults.stream.stream_name),
            subject: std::env::var("ZORI_STREAM_SUBJECT").unwrap_or(defaults.stream.subject),
            max_bytes: parse_var("ZORI_STREAM_MAX_BYTES", defaults.stream.max_bytes)?,
        };

        let project_db_path = std::env::var("ZORI_PROJECT_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.project_db_path);

        let project_cache_ttl = Duration::from_secs(parse_var(
            "ZORI_PROJECT_CACHE_TTL_SECS",
            defaults.project_cache_ttl.as_secs(),
        )?);

        let cookie_domain =
            std::env::var("ZORI_COOKIE_DOMAIN").unwrap_or(defaults.cookie_domain);

        let cors_allow_origin =
            std::env::var("ZORI_CORS_ALLOW_ORIGIN").unwrap_or(defaults.cors_allow_origin);

        let cors_max_age = parse_var("ZORI_CORS_MAX_AGE", defaults.cors_max_age)?;
        let metrics_port = parse_var("ZORI_METRICS_PORT", defaults.metrics_port)?;

        tracing::info!(
            bind_addr = %bind_addr,
            nats_url = %stream.url,
            subject = %stream.subject,
            project_db = %project_db_path.display(),
            cookie_domain = %cookie_domain,
            "configuration loaded"
        );

        Ok(Self {
            bind_addr,
            stream,
            project_db_path,
            project_cache_ttl,
            cookie_domain,
            cors_allow_origin,
            cors_max_age,
            metrics_port,
        })
    }
}

fn parse_var<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        _ => Ok(default),
    }
}

/// CORS header values attached to every gateway response.
#[derive(Debug, Clone)]
pub struct CorsHeaders {
    pub allow_origin: HeaderValue,
    pub max_age: HeaderValue,
}

impl CorsHeaders {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            allow_origin: HeaderValue::from_str(&config.cors_allow_origin)
                .context("ZORI_CORS_ALLOW_ORIGIN is not a valid header value")?,
            max_age: HeaderValue::from(config.cors_max_age),
        })
    }
}

/// Shared application state available to all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,

    /// Publish side of the stream transport.
    pub publisher: Arc<dyn Publisher>,

    /// Resolves publishable tokens to projects.
    pub projects: Arc<dyn ProjectLookup>,

    /// Precomputed CORS header values.
    pub cors: Arc<CorsHeaders>,
}

impl AppState {
    /// Create the application state. Fails if the CORS settings are not valid
    /// header values.
    pub fn new(
        config: Config,
        publisher: Arc<dyn Publisher>,
        projects: Arc<dyn ProjectLookup>,
    ) -> anyhow::Result<Self> {
        let cors = CorsHeaders::from_config(&config)?;
        Ok(Self {
            config: Arc::new(config),
            publisher,
            projects,
            cors: Arc::new(cors),
        })
    }
}
