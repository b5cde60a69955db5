//! Zori ingestion gateway.
//!
//! HTTP front door for the tracking script. Each accepted event is checked
//! against its visitor cookie and project token, stamped with the client's IP
//! and user agent, and published to the raw event stream. The response never
//! waits for the broker.
//!
//! # Architecture
//!
//! - **AppState**: Shared state (configuration, publisher, project lookup)
//! - **Project**: Publishable-token lookup against a SQLite replica, behind a TTL cache
//! - **Routes**: `/ingest` and `/health`, with CORS headers on every response

mod error;
pub mod project;
mod routes;
mod state;

pub use self::error::IngestError;
pub use self::project::{CachedProjectLookup, Project, ProjectLookup, SqliteProjectStore};
pub use self::routes::{INGEST_PATH, PROJECT_TOKEN_HEADER, VISITOR_COOKIE, router};
pub use self::state::{AppState, Config, CorsHeaders};
