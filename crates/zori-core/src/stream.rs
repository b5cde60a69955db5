//! JetStream transport client.
//!
//! Wraps a NATS connection and its JetStream context and exposes the four
//! operations the pipeline needs:
//!
//! - [`StreamClient::ensure_stream`] - idempotent get-or-create of the raw events stream
//! - [`StreamClient::publish`] - publish one payload and wait for the broker ack
//! - [`StreamClient::subscribe`] - bind a durable pull consumer
//! - [`StreamClient::close`] - flush and release the connection
//!
//! Consumers receive messages through the [`Delivery`] trait and bind
//! subscriptions through [`MessageSource`], so that message handlers and the
//! consumption lifecycle can be exercised without a broker.
//!
//! # Delivery model
//!
//! ```text
//! publish ──▶ [stream: events-raw] ──▶ durable consumer ──▶ MessageHandler
//!                     ▲                                         │
//!                     └──────── nak / ack-wait timeout ◀────────┘
//! ```
//!
//! Delivery is at-least-once: a message is removed only after an ack (or a term).

use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::{self, AckKind};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Connection and stream topology settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// NATS server URL (e.g., "nats://localhost:4222").
    pub url: String,

    /// Path to a `.creds` file, if the server requires credentials.
    pub credentials: Option<String>,

    /// Stream name.
    pub stream_name: String,

    /// Subject bound to the stream.
    pub subject: String,

    /// Byte-size retention limit of the stream.
    pub max_bytes: i64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            url: crate::DEFAULT_NATS_URL.to_string(),
            credentials: None,
            stream_name: crate::DEFAULT_STREAM_NAME.to_string(),
            subject: crate::DEFAULT_STREAM_SUBJECT.to_string(),
            max_bytes: crate::DEFAULT_STREAM_MAX_BYTES,
        }
    }
}

/// Durable consumer settings.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Durable name; unacknowledged messages survive restarts under this name.
    pub durable_name: String,

    /// How long the broker waits for an ack before redelivering.
    pub ack_wait: Duration,

    /// Deliveries after which the broker stops redelivering a message.
    /// `None` leaves redelivery unbounded.
    pub max_deliver: Option<i64>,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            durable_name: crate::DEFAULT_CONSUMER_NAME.to_string(),
            ack_wait: Duration::from_secs(30),
            max_deliver: None,
        }
    }
}

/// A message delivered by the broker.
///
/// Handlers must call exactly one of [`ack`](Delivery::ack),
/// [`nak`](Delivery::nak) or [`term`](Delivery::term).
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Raw message payload.
    fn payload(&self) -> &[u8];

    /// How many times this message has been delivered, starting at 1.
    fn delivered(&self) -> u64;

    /// Acknowledge: the message is removed from the consumer.
    async fn ack(&self) -> Result<()>;

    /// Negative-acknowledge: the message is redelivered.
    async fn nak(&self) -> Result<()>;

    /// Terminate: the message is never redelivered.
    async fn term(&self) -> Result<()>;
}

#[async_trait]
impl Delivery for jetstream::Message {
    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    fn delivered(&self) -> u64 {
        self.info()
            .map(|info| info.delivered.max(1) as u64)
            .unwrap_or(1)
    }

    async fn ack(&self) -> Result<()> {
        jetstream::Message::ack(self)
            .await
            .map_err(|e| Error::Ack(e.to_string()))
    }

    async fn nak(&self) -> Result<()> {
        self.ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| Error::Ack(e.to_string()))
    }

    async fn term(&self) -> Result<()> {
        self.ack_with(AckKind::Term)
            .await
            .map_err(|e| Error::Ack(e.to_string()))
    }
}

/// Callback invoked for every delivered message.
///
/// Implementations must be reentrant: several messages can be in flight at once.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &dyn Delivery);
}

/// Messages pulled from a durable consumer.
pub type DeliveryStream = BoxStream<'static, Result<Box<dyn Delivery>>>;

/// Consume side of the transport.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Bind a durable consumer on `stream_name` and open its message stream.
    async fn subscribe(
        &self,
        stream_name: &str,
        settings: &ConsumerSettings,
    ) -> Result<Subscription>;

    /// Flush pending work and release the connection.
    async fn close(&self) -> Result<()>;
}

/// Publish side of the transport.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish a payload to a subject and wait for the broker to persist it.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()>;
}

/// Client for a NATS JetStream server.
#[derive(Clone)]
pub struct StreamClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl StreamClient {
    /// Connect to the server described by `settings`.
    pub async fn connect(settings: &StreamSettings) -> Result<Self> {
        let options = match &settings.credentials {
            Some(path) => async_nats::ConnectOptions::with_credentials_file(path).await?,
            None => async_nats::ConnectOptions::new(),
        };

        let client = options.name("zori").connect(settings.url.as_str()).await?;
        let jetstream = jetstream::new(client.clone());

        tracing::info!(url = %settings.url, "connected to NATS");

        Ok(Self { client, jetstream })
    }

    /// Make sure the stream exists, creating it with a byte-size retention if absent.
    ///
    /// Safe to call on every startup: an existing stream is left untouched.
    pub async fn ensure_stream(&self, name: &str, subject: &str, max_bytes: i64) -> Result<()> {
        let stream = self
            .jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: name.to_string(),
                subjects: vec![subject.to_string()],
                max_bytes,
                ..Default::default()
            })
            .await
            .map_err(|e| Error::Stream(e.to_string()))?;

        let info = stream.cached_info();
        tracing::info!(
            stream = %name,
            subjects = ?info.config.subjects,
            max_bytes = info.config.max_bytes,
            messages = info.state.messages,
            "stream ready"
        );

        Ok(())
    }

    /// Bind a durable pull consumer to `stream_name`, creating it if needed.
    pub async fn subscribe(
        &self,
        stream_name: &str,
        settings: &ConsumerSettings,
    ) -> Result<Subscription> {
        let stream = self
            .jetstream
            .get_stream(stream_name)
            .await
            .map_err(|e| Error::Subscribe(e.to_string()))?;

        let consumer: jetstream::consumer::PullConsumer = stream
            .get_or_create_consumer(&settings.durable_name, pull_config(settings))
            .await
            .map_err(|e| Error::Subscribe(e.to_string()))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| Error::Subscribe(e.to_string()))?
            .map(|message| match message {
                Ok(message) => Ok(Box::new(message) as Box<dyn Delivery>),
                Err(e) => Err(Error::Subscribe(e.to_string())),
            })
            .boxed();

        tracing::info!(
            stream = %stream_name,
            consumer = %settings.durable_name,
            max_deliver = ?settings.max_deliver,
            "durable consumer bound"
        );

        Ok(Subscription::new(settings.durable_name.clone(), messages))
    }

    /// Flush pending publishes, then drain and release the connection.
    ///
    /// Any clone of this client stops working once the drain completes.
    pub async fn close(&self) -> Result<()> {
        self.client
            .flush()
            .await
            .map_err(|e| Error::Close(e.to_string()))?;
        self.client
            .drain()
            .await
            .map_err(|e| Error::Close(e.to_string()))?;
        tracing::info!("NATS connection drained");
        Ok(())
    }
}

/// Pull consumer configuration for `settings`.
fn pull_config(settings: &ConsumerSettings) -> jetstream::consumer::pull::Config {
    jetstream::consumer::pull::Config {
        name: Some(settings.durable_name.clone()),
        durable_name: Some(settings.durable_name.clone()),
        ack_policy: jetstream::consumer::AckPolicy::Explicit,
        ack_wait: settings.ack_wait,
        // Zero is omitted on the wire, which leaves the server default (unbounded).
        max_deliver: settings.max_deliver.filter(|n| *n > 0).unwrap_or_default(),
        ..Default::default()
    }
}

#[async_trait]
impl MessageSource for StreamClient {
    async fn subscribe(
        &self,
        stream_name: &str,
        settings: &ConsumerSettings,
    ) -> Result<Subscription> {
        StreamClient::subscribe(self, stream_name, settings).await
    }

    async fn close(&self) -> Result<()> {
        StreamClient::close(self).await
    }
}

#[async_trait]
impl Publisher for StreamClient {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        let ack = self
            .jetstream
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| Error::Publish(e.to_string()))?;

        ack.await.map_err(|e| Error::Publish(e.to_string()))?;
        Ok(())
    }
}

/// A bound durable consumer, ready to be driven by a [`MessageHandler`].
pub struct Subscription {
    name: String,
    messages: DeliveryStream,
}

impl Subscription {
    pub fn new(name: impl Into<String>, messages: DeliveryStream) -> Self {
        Self {
            name: name.into(),
            messages,
        }
    }

    /// Durable consumer name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pull messages and hand them to `handler` until `cancel` fires.
    ///
    /// At most `max_in_flight` handler invocations run concurrently. After
    /// cancellation no new messages are pulled; the returned future completes
    /// once the handlers already running have finished.
    pub async fn run<H>(
        self,
        handler: Arc<H>,
        cancel: CancellationToken,
        max_in_flight: usize,
    ) where
        H: MessageHandler + ?Sized + 'static,
    {
        tracing::info!(consumer = %self.name, max_in_flight, "consuming messages");

        self.messages
            .take_until(cancel.cancelled_owned())
            .for_each_concurrent(max_in_flight.max(1), |message| {
                let handler = Arc::clone(&handler);
                async move {
                    match message {
                        Ok(message) => handler.handle(message.as_ref()).await,
                        Err(e) => tracing::warn!(error = %e, "failed to pull message"),
                    }
                }
            })
            .await;

        tracing::info!(consumer = %self.name, "consumption stopped");
    }
}
