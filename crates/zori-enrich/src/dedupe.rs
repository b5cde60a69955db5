//! Persisted-event index using RocksDB.
//!
//! The broker delivers at least once, and ClickHouse does not reject repeated
//! rows on its own. The [`DedupeIndex`] remembers which events have already
//! been written so that a redelivery after a successful insert (e.g. the ack
//! was lost) is acked without writing a second row.
//!
//! # Key Design
//!
//! - Keys: `project_id:client_generated_event_id` (UTF-8 bytes)
//! - Values: insert time as 8-byte big-endian Unix millis
//! - Bloom filters for fast "not seen" lookups
//! - Losing the index only re-opens the door to duplicates; it holds no
//!   primary data

use crate::error::Result;
use metrics::counter;
use rocksdb::{DBWithThreadMode, MultiThreaded, Options, WriteOptions};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// RocksDB-backed index of persisted event keys.
///
/// Thread-safe: can be shared across message handlers via `Arc<DedupeIndex>`.
pub struct DedupeIndex {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
}

impl DedupeIndex {
    /// Open or create a dedupe index at the given path.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use zori_enrich::DedupeIndex;
    ///
    /// let index = DedupeIndex::open("./data/dedupe")?;
    /// # Ok::<(), zori_enrich::Error>(())
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening dedupe index at {}", path.display());

        let mut opts = Options::default();
        opts.create_if_missing(true);

        // Small values, write-heavy workload
        opts.set_write_buffer_size(32 * 1024 * 1024);
        opts.set_max_write_buffer_number(3);

        // Bloom filters for fast "not found" lookups
        // 10 bits per key = ~1% false positive rate
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        block_opts.set_cache_index_and_filter_blocks(true);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        opts.increase_parallelism(num_cpus::get() as i32);
        opts.set_max_background_jobs(4);

        let db = DBWithThreadMode::<MultiThreaded>::open(&opts, path)?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Check whether an event key has already been persisted.
    pub fn is_persisted(&self, key: &str) -> Result<bool> {
        counter!("dedupe_lookups_total").increment(1);
        let found = self.db.get_pinned(key.as_bytes())?.is_some();
        if found {
            counter!("dedupe_hits_total").increment(1);
        }
        Ok(found)
    }

    /// Record that an event key has been persisted.
    pub fn mark_persisted(&self, key: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(false);
        self.db
            .put_opt(key.as_bytes(), now.to_be_bytes(), &write_opts)?;
        Ok(())
    }

    /// When an event key was marked persisted, in Unix millis.
    pub fn persisted_at(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.db.get(key.as_bytes())?.and_then(|value| {
            let bytes: [u8; 8] = value.as_slice().try_into().ok()?;
            Some(i64::from_be_bytes(bytes))
        }))
    }

    /// Get the approximate number of keys in the database.
    pub fn approximate_count(&self) -> Result<u64> {
        let count = self
            .db
            .property_int_value("rocksdb.estimate-num-keys")?
            .unwrap_or(0);
        Ok(count)
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Get statistics about the database.
    pub fn stats(&self) -> DedupeStats {
        DedupeStats {
            approximate_keys: self.approximate_count().unwrap_or(0),
        }
    }
}

/// Statistics about the dedupe index.
#[derive(Debug, Clone)]
pub struct DedupeStats {
    /// Approximate number of keys in the database.
    pub approximate_keys: u64,
}
