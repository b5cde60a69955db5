//! Zori enrichment processor.
//!
//! Consumes raw event frames published by the gateway, derives geo, page,
//! user-agent and referrer context, and persists one row per event to the
//! analytical store.
//!
//! # Modules
//!
//! - [`stages`] - Pure enrichment transforms over an [`EventFrame`](zori_core::EventFrame)
//! - [`sink`] - Analytical row model and the ClickHouse writer
//! - [`processor`] - Per-message handling and the consumption lifecycle
//! - [`dedupe`] - Index of already persisted events
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  events-raw     │  Durable stream (JetStream), at-least-once
//! └────────┬────────┘
//!          │  durable consumer "event-enricher"
//!          ▼
//! ┌─────────────────┐
//! │  EventHandler   │  decode → Geo → Page → UserAgent → Referrer
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   DedupeIndex   │  RocksDB - skips events already written
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ ClickHouseSink  │  One row per event; ack after the insert returns
//! └─────────────────┘
//! ```
//!
//! A message is acknowledged only after its row is durably written, so an
//! event is never lost; it may be delivered more than once.

pub mod config;
pub mod dedupe;
pub mod error;
pub mod processor;
pub mod sink;
pub mod stages;

// Re-export commonly used types at crate root
pub use config::Config;
pub use dedupe::{DedupeIndex, DedupeStats};
pub use error::{Error, Result};
pub use processor::{Disposition, EventHandler, Processor, ProcessorSettings, ProcessorState};
pub use sink::{AnalyticsSink, ClickHouseConfig, ClickHouseSink, EventRecord};
pub use stages::{GeoResolver, MaxMindResolver, Stage, default_stages};
