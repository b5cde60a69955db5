//! Error types for the enrichment pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while enriching and persisting events.
#[derive(Error, Debug)]
pub enum Error {
    /// Stream transport or event model error.
    #[error(transparent)]
    Core(#[from] zori_core::Error),

    /// RocksDB error.
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// ClickHouse error.
    #[error("ClickHouse error: {0}")]
    ClickHouse(#[from] clickhouse::error::Error),

    /// The geolocation database could not be opened or decoded.
    #[error("GeoIP database error: {0}")]
    GeoDatabase(#[from] maxminddb::MaxMindDBError),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// An enrichment stage failed.
    #[error("stage '{stage}' failed: {reason}")]
    Stage {
        /// Name of the failing stage.
        stage: &'static str,
        /// What went wrong.
        reason: String,
    },

    /// Processor lifecycle misuse (e.g. starting twice).
    #[error("invalid processor state: {0}")]
    State(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap any displayable failure as a stage error.
    pub fn stage(stage: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::Stage {
            stage,
            reason: reason.to_string(),
        }
    }
}
