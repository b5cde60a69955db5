//! Enrichment processor.
//!
//! The [`EventHandler`] turns one stream message into one persisted row; the
//! [`Processor`] owns the subscription that feeds it and its lifecycle.
//!
//! # Message handling
//!
//! ```text
//! payload ─▶ decode ─▶ stages (geo, page, user_agent, referrer) ─▶ dedupe? ─▶ sink ─▶ ack
//!              │              │                                      │         │
//!              └─ nak/term ◀──┘                                  ack ◀┘   nak ◀┘
//! ```
//!
//! Decode and stage failures are deterministic for a given payload. They are
//! nak'd for redelivery, and once a redelivery cap is configured and reached
//! the message is terminated instead. Sink failures are always nak'd.
//!
//! # Lifecycle
//!
//! `Idle → Consuming → Draining → Stopped`. [`Processor::stop`] stops pulling
//! new messages, waits up to the drain timeout for in-flight handlers, then
//! closes the connection. Anything still in flight after the timeout is
//! redelivered by the broker once its ack wait expires.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use zori_core::metrics::{record_outcome, set_gauge};
use zori_core::{ConsumerSettings, Delivery, EventFrame, MessageHandler, MessageSource};

use crate::dedupe::DedupeIndex;
use crate::sink::{AnalyticsSink, EventRecord};
use crate::stages::Stage;
use crate::{Error, Result};

/// What the handler decided to do with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Persisted; remove from the stream.
    Ack,
    /// Already persisted by an earlier delivery; remove without writing.
    Duplicate,
    /// Failed; redeliver.
    Nak,
    /// Failed permanently; never redeliver.
    Term,
}

impl Disposition {
    /// Metric label for this outcome.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ack => "acked",
            Self::Duplicate => "duplicate",
            Self::Nak => "nacked",
            Self::Term => "terminated",
        }
    }
}

/// Per-message pipeline: decode, enrich, persist.
pub struct EventHandler {
    stages: Vec<Box<dyn Stage>>,
    sink: Arc<dyn AnalyticsSink>,
    dedupe: Option<Arc<DedupeIndex>>,
    max_redeliveries: Option<u64>,
}

impl EventHandler {
    /// Create a handler running `stages` in order and writing to `sink`.
    pub fn new(stages: Vec<Box<dyn Stage>>, sink: Arc<dyn AnalyticsSink>) -> Self {
        Self {
            stages,
            sink,
            dedupe: None,
            max_redeliveries: None,
        }
    }

    /// Skip inserts for events already recorded in `dedupe`.
    pub fn with_dedupe(mut self, dedupe: Arc<DedupeIndex>) -> Self {
        self.dedupe = Some(dedupe);
        self
    }

    /// Terminate undecodable or unenrichable messages after `cap` deliveries.
    ///
    /// Without a cap such messages are nak'd forever.
    pub fn with_max_redeliveries(mut self, cap: Option<u64>) -> Self {
        self.max_redeliveries = cap.filter(|cap| *cap > 0);
        self
    }

    /// Run every stage over `frame` in order, stopping at the first error.
    pub fn enrich(&self, frame: &mut EventFrame) -> Result<()> {
        for stage in &self.stages {
            if let Err(e) = stage.apply(frame) {
                counter!("enrich_stage_errors_total", "stage" => stage.name()).increment(1);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Decide the fate of one message. Does not ack or nak it.
    pub async fn process(&self, message: &dyn Delivery) -> Disposition {
        let delivered = message.delivered();

        let mut frame = match EventFrame::from_bytes(message.payload()) {
            Ok(frame) => frame,
            Err(e) => {
                counter!("enrich_decode_errors_total").increment(1);
                return self.reject(delivered, &Error::from(e));
            }
        };

        if let Err(e) = self.enrich(&mut frame) {
            return self.reject(delivered, &e);
        }

        let record = EventRecord::from_frame(&frame, Utc::now());
        let key = record.dedupe_key();

        if let Some(dedupe) = &self.dedupe {
            match dedupe.is_persisted(&key) {
                Ok(true) => {
                    let persisted_at_ms = dedupe.persisted_at(&key).ok().flatten();
                    tracing::debug!(
                        key = %key,
                        delivered,
                        persisted_at_ms = ?persisted_at_ms,
                        "event already persisted, skipping insert"
                    );
                    return Disposition::Duplicate;
                }
                Ok(false) => {}
                Err(e) => tracing::warn!(key = %key, error = %e, "dedupe check failed"),
            }
        }

        if let Err(e) = self.sink.insert(&record).await {
            tracing::error!(key = %key, delivered, error = %e, "failed to insert event");
            return Disposition::Nak;
        }

        if let Some(dedupe) = &self.dedupe {
            if let Err(e) = dedupe.mark_persisted(&key) {
                tracing::warn!(key = %key, error = %e, "failed to record persisted event");
            }
        }

        Disposition::Ack
    }

    fn reject(&self, delivered: u64, error: &Error) -> Disposition {
        match self.max_redeliveries {
            Some(cap) if delivered >= cap => {
                tracing::error!(
                    delivered,
                    cap,
                    error = %error,
                    "dropping message after reaching redelivery cap"
                );
                Disposition::Term
            }
            _ => {
                tracing::warn!(delivered, error = %error, "failed to process message");
                Disposition::Nak
            }
        }
    }
}

#[async_trait]
impl MessageHandler for EventHandler {
    async fn handle(&self, message: &dyn Delivery) {
        let disposition = self.process(message).await;

        let result = match disposition {
            Disposition::Ack | Disposition::Duplicate => message.ack().await,
            Disposition::Nak => message.nak().await,
            Disposition::Term => message.term().await,
        };

        record_outcome("enrich_messages_total", disposition.as_str());

        if let Err(e) = result {
            tracing::warn!(
                disposition = disposition.as_str(),
                error = %e,
                "failed to acknowledge message"
            );
        }
    }
}

/// Lifecycle state of the [`Processor`].
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Idle = 0,
    Consuming = 1,
    Draining = 2,
    Stopped = 3,
}

impl ProcessorState {
    fn from_byte(b: u8) -> Self {
        match b {
            0 => Self::Idle,
            1 => Self::Consuming,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }

    fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Settings for the consumption loop.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// Stream to consume from.
    pub stream_name: String,

    /// Durable consumer bound to the stream.
    pub consumer: ConsumerSettings,

    /// Maximum number of messages handled concurrently.
    pub max_in_flight: usize,

    /// How long [`Processor::stop`] waits for in-flight messages.
    pub drain_timeout: Duration,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            stream_name: zori_core::DEFAULT_STREAM_NAME.to_string(),
            consumer: ConsumerSettings::default(),
            max_in_flight: 64,
            drain_timeout: Duration::from_secs(10),
        }
    }
}

/// Drives an [`EventHandler`] from a durable stream subscription.
pub struct Processor {
    /// Released on [`stop`](Processor::stop).
    source: Option<Arc<dyn MessageSource>>,
    handler: Arc<EventHandler>,
    settings: ProcessorSettings,
    state: AtomicU8,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Processor {
    pub fn new(
        source: Arc<dyn MessageSource>,
        handler: Arc<EventHandler>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            source: Some(source),
            handler,
            settings,
            state: AtomicU8::new(ProcessorState::Idle.to_byte()),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProcessorState {
        ProcessorState::from_byte(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ProcessorState) {
        self.state.store(state.to_byte(), Ordering::SeqCst);
    }

    /// Bind the durable consumer and start handling messages in the background.
    ///
    /// Fails if the consumer cannot be created; this is fatal at startup.
    pub async fn start(&mut self) -> Result<()> {
        if self.state() != ProcessorState::Idle {
            return Err(Error::State(format!(
                "cannot start from {:?}",
                self.state()
            )));
        }

        let source = self
            .source
            .as_ref()
            .ok_or_else(|| Error::State("message source already closed".to_string()))?;

        let subscription = source
            .subscribe(&self.settings.stream_name, &self.settings.consumer)
            .await?;
        let consumer = subscription.name().to_string();

        let handler = Arc::clone(&self.handler);
        let cancel = self.cancel.clone();
        let max_in_flight = self.settings.max_in_flight;

        self.task = Some(tokio::spawn(async move {
            subscription.run(handler, cancel, max_in_flight).await
        }));

        self.set_state(ProcessorState::Consuming);
        set_gauge("enrich_running", 1.0);
        tracing::info!(
            stream = %self.settings.stream_name,
            consumer = %consumer,
            "processor started"
        );

        Ok(())
    }

    /// Stop consuming, drain in-flight messages and close the connection.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state() == ProcessorState::Stopped {
            return Ok(());
        }

        self.set_state(ProcessorState::Draining);
        self.cancel.cancel();

        if let Some(task) = self.task.take() {
            match tokio::time::timeout(self.settings.drain_timeout, task).await {
                Ok(Ok(())) => tracing::info!("in-flight messages drained"),
                Ok(Err(e)) => tracing::warn!(error = %e, "consumption task panicked"),
                Err(_) => tracing::warn!(
                    timeout_secs = self.settings.drain_timeout.as_secs(),
                    "drain timed out; unfinished messages will be redelivered"
                ),
            }
        }

        let closed = match self.source.take() {
            Some(source) => source.close().await,
            None => Ok(()),
        };

        self.set_state(ProcessorState::Stopped);
        set_gauge("enrich_running", 0.0);
        tracing::info!("processor stopped");

        closed.map_err(Error::from)
    }
}
