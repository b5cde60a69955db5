//! Core types and shared infrastructure for the Zori event pipeline.
//!
//! This crate provides:
//! - The event data model shared by the gateway and the enricher
//!   ([`ClientEvent`], [`EventFrame`], [`Enrichment`])
//! - The JetStream transport client (stream provisioning, publish, durable
//!   pull subscriptions with ack/nak/term)
//! - Prometheus metrics helpers
//! - Shared error types

mod error;
mod event;
pub mod metrics;
pub mod stream;

// ═══════════════════════════════════════════════════════════════════════════
// Stream topology defaults
// ═══════════════════════════════════════════════════════════════════════════

/// Name of the durable stream holding raw, not yet enriched event frames.
pub const DEFAULT_STREAM_NAME: &str = "events-raw";

/// Subject the gateway publishes raw frames to.
pub const DEFAULT_STREAM_SUBJECT: &str = "events.raw";

/// Durable consumer name used by the enrichment processor.
pub const DEFAULT_CONSUMER_NAME: &str = "event-enricher";

/// Byte-size retention of the raw events stream (1 GiB).
pub const DEFAULT_STREAM_MAX_BYTES: i64 = 1024 * 1024 * 1024;

/// Default NATS server URL for local development.
pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";

pub use error::{Error, Result};
pub use event::{ClientEvent, Enrichment, EventFrame};
pub use stream::{
    ConsumerSettings, Delivery, DeliveryStream, MessageHandler, MessageSource, Publisher,
    StreamClient, StreamSettings, Subscription,
};
