//! ClickHouse sink for enriched events.
//!
//! Every message handler inserts its own single row. Batching is left to the
//! server: inserts run with `async_insert=1`, so ClickHouse buffers rows and
//! flushes them in parts, and `wait_for_async_insert=1` makes the call return
//! only after the buffered row is durable. A failed call can therefore be
//! retried safely by the caller.
//!
//! Each insert also carries `insert_deduplication_token` derived from
//! `(project_id, client_generated_event_id)`, so a redelivered event that was
//! already written is dropped by the server's insert deduplication window.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use ::clickhouse::Client;
use async_trait::async_trait;
use metrics::{counter, histogram};

use super::{AnalyticsSink, EventRecord};
use crate::Result;

/// Configuration for the ClickHouse sink.
#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    /// ClickHouse server URL (e.g., "http://localhost:8123")
    pub url: String,

    /// Database name
    pub database: String,

    /// User name
    pub user: String,

    /// Password (empty for none)
    pub password: String,

    /// Table name for events
    pub table: String,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".to_string(),
            database: "zori".to_string(),
            user: "default".to_string(),
            password: String::new(),
            table: "events".to_string(),
        }
    }
}

/// [`AnalyticsSink`] writing to a ClickHouse table.
pub struct ClickHouseSink {
    client: Client,
    table: String,
    events_inserted: AtomicUsize,
}

impl ClickHouseSink {
    /// Create a new sink. Does not touch the network; see [`health_check`](Self::health_check).
    pub fn new(config: &ClickHouseConfig) -> Self {
        let client = Client::default()
            .with_url(&config.url)
            .with_database(&config.database)
            .with_user(&config.user)
            .with_password(&config.password)
            .with_option("async_insert", "1")
            .with_option("wait_for_async_insert", "1")
            .with_option("async_insert_deduplicate", "1");

        tracing::info!(
            "ClickHouse sink initialized: url={}, database={}, table={}",
            config.url,
            config.database,
            config.table
        );

        Self {
            client,
            table: config.table.clone(),
            events_inserted: AtomicUsize::new(0),
        }
    }

    /// Check if ClickHouse is reachable.
    pub async fn health_check(&self) -> Result<bool> {
        let result: u8 = self.client.query("SELECT 1").fetch_one().await?;
        Ok(result == 1)
    }

    /// Number of events inserted by this process.
    pub fn events_inserted(&self) -> usize {
        self.events_inserted.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AnalyticsSink for ClickHouseSink {
    async fn insert(&self, record: &EventRecord) -> Result<()> {
        let started = Instant::now();

        let client = self
            .client
            .clone()
            .with_option("insert_deduplication_token", record.dedupe_key());

        let result = async {
            let mut insert = client.insert::<EventRecord>(&self.table)?;
            insert.write(record).await?;
            insert.end().await
        }
        .await;

        histogram!("clickhouse_insert_duration_seconds").record(started.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                self.events_inserted.fetch_add(1, Ordering::Relaxed);
                counter!("clickhouse_events_inserted_total").increment(1);
                Ok(())
            }
            Err(e) => {
                counter!("clickhouse_insert_errors_total").increment(1);
                Err(e.into())
            }
        }
    }
}
