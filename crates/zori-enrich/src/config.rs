//! Enricher configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use zori_core::{ConsumerSettings, StreamSettings};

use crate::processor::ProcessorSettings;
use crate::sink::ClickHouseConfig;

/// Enricher configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Broker connection and stream layout.
    pub stream: StreamSettings,

    /// Durable consumer name.
    pub consumer_name: String,

    /// Maximum number of messages handled concurrently.
    pub max_in_flight: usize,

    /// Time the broker waits for an ack before redelivering.
    pub ack_wait: Duration,

    /// Deliveries after which failing messages are terminated. `None` retries forever.
    pub max_redeliveries: Option<u64>,

    /// Broker-side delivery limit on the durable consumer. `None` is unbounded.
    pub max_deliver: Option<i64>,

    /// How long shutdown waits for in-flight messages.
    pub drain_timeout: Duration,

    /// MaxMind City database.
    pub geoip_path: PathBuf,

    /// ClickHouse connection and target table.
    pub clickhouse: ClickHouseConfig,

    /// RocksDB dedupe index directory. `None` disables the index.
    pub dedupe_path: Option<PathBuf>,

    /// Prometheus exporter port (0 disables it).
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (defaults suit local development):
    /// - `NATS_URL`: broker URL (default: "nats://localhost:4222")
    /// - `NATS_CREDENTIALS`: credentials file
    /// - `ZORI_STREAM_NAME`, `ZORI_STREAM_SUBJECT`, `ZORI_STREAM_MAX_BYTES`
    /// - `ZORI_CONSUMER_NAME`: durable consumer (default: "event-enricher")
    /// - `ZORI_MAX_IN_FLIGHT`: concurrent handlers (default: 64)
    /// - `ZORI_ACK_WAIT_SECS`: ack deadline (default: 30)
    /// - `ZORI_MAX_REDELIVERIES`: termination cap, 0 or unset for none
    /// - `ZORI_MAX_DELIVER`: broker delivery limit, 0 or unset for none
    /// - `ZORI_DRAIN_TIMEOUT_SECS`: shutdown drain (default: 10)
    /// - `ZORI_GEOIP_PATH`: (default: "./data/GeoLite2-City.mmdb")
    /// - `CLICKHOUSE_URL`, `CLICKHOUSE_DATABASE`, `CLICKHOUSE_USER`, `CLICKHOUSE_PASSWORD`
    /// - `ZORI_EVENTS_TABLE`: (default: "events")
    /// - `ZORI_DEDUPE_PATH`: dedupe index directory, unset to disable
    /// - `ZORI_METRICS_PORT`: (default: 9091)
    pub fn from_env() -> anyhow::Result<Self> {
        let stream_defaults = StreamSettings::default();
        let clickhouse_defaults = ClickHouseConfig::default();

        let stream = StreamSettings {
            url: env_or("NATS_URL", &stream_defaults.url),
            credentials: env_opt("NATS_CREDENTIALS"),
            stream_name: env_or("ZORI_STREAM_NAME", &stream_defaults.stream_name),
            subject: env_or("ZORI_STREAM_SUBJECT", &stream_defaults.subject),
            max_bytes: env_parse("ZORI_STREAM_MAX_BYTES", stream_defaults.max_bytes)?,
        };

        let consumer_name = env_or("ZORI_CONSUMER_NAME", zori_core::DEFAULT_CONSUMER_NAME);
        let max_in_flight: usize = env_parse("ZORI_MAX_IN_FLIGHT", 64)?;
        if max_in_flight == 0 {
            anyhow::bail!("ZORI_MAX_IN_FLIGHT must be at least 1");
        }

        let ack_wait = Duration::from_secs(env_parse("ZORI_ACK_WAIT_SECS", 30)?);
        let max_redeliveries = match env_parse::<u64>("ZORI_MAX_REDELIVERIES", 0)? {
            0 => None,
            cap => Some(cap),
        };
        let max_deliver = match env_parse::<i64>("ZORI_MAX_DELIVER", 0)? {
            n if n <= 0 => None,
            n => Some(n),
        };
        if let (Some(limit), Some(cap)) = (max_deliver, max_redeliveries) {
            if (limit as u64) < cap {
                anyhow::bail!(
                    "ZORI_MAX_DELIVER ({limit}) must not be below ZORI_MAX_REDELIVERIES ({cap})"
                );
            }
        }
        let drain_timeout = Duration::from_secs(env_parse("ZORI_DRAIN_TIMEOUT_SECS", 10)?);

        let geoip_path = PathBuf::from(env_or("ZORI_GEOIP_PATH", "./data/GeoLite2-City.mmdb"));

        let clickhouse = ClickHouseConfig {
            url: env_or("CLICKHOUSE_URL", &clickhouse_defaults.url),
            database: env_or("CLICKHOUSE_DATABASE", &clickhouse_defaults.database),
            user: env_or("CLICKHOUSE_USER", &clickhouse_defaults.user),
            password: env_or("CLICKHOUSE_PASSWORD", &clickhouse_defaults.password),
            table: env_or("ZORI_EVENTS_TABLE", &clickhouse_defaults.table),
        };

        let dedupe_path = env_opt("ZORI_DEDUPE_PATH").map(PathBuf::from);
        let metrics_port = env_parse("ZORI_METRICS_PORT", 9091)?;

        tracing::info!(
            nats_url = %stream.url,
            stream = %stream.stream_name,
            consumer = %consumer_name,
            max_in_flight,
            max_redeliveries = ?max_redeliveries,
            max_deliver = ?max_deliver,
            clickhouse_url = %clickhouse.url,
            table = %clickhouse.table,
            dedupe = dedupe_path.is_some(),
            "enricher configuration loaded"
        );

        Ok(Self {
            stream,
            consumer_name,
            max_in_flight,
            ack_wait,
            max_redeliveries,
            max_deliver,
            drain_timeout,
            geoip_path,
            clickhouse,
            dedupe_path,
            metrics_port,
        })
    }

    /// Settings for the [`Processor`](crate::Processor).
    pub fn processor_settings(&self) -> ProcessorSettings {
        ProcessorSettings {
            stream_name: self.stream.stream_name.clone(),
            consumer: ConsumerSettings {
                durable_name: self.consumer_name.clone(),
                ack_wait: self.ack_wait,
                max_deliver: self.max_deliver,
            },
            max_in_flight: self.max_in_flight,
            drain_timeout: self.drain_timeout,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_opt(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize config tests that manipulate env vars.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "NATS_URL",
        "NATS_CREDENTIALS",
        "ZORI_STREAM_NAME",
        "ZORI_STREAM_SUBJECT",
        "ZORI_STREAM_MAX_BYTES",
        "ZORI_CONSUMER_NAME",
        "ZORI_MAX_IN_FLIGHT",
        "ZORI_ACK_WAIT_SECS",
        "ZORI_MAX_REDELIVERIES",
        "ZORI_MAX_DELIVER",
        "ZORI_DRAIN_TIMEOUT_SECS",
        "ZORI_GEOIP_PATH",
        "CLICKHOUSE_URL",
        "CLICKHOUSE_DATABASE",
        "CLICKHOUSE_USER",
        "CLICKHOUSE_PASSWORD",
        "ZORI_EVENTS_TABLE",
        "ZORI_DEDUPE_PATH",
        "ZORI_METRICS_PORT",
    ];

    /// Run `f` with only `vars` set among the config keys.
    fn with_env_vars<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
        let _guard = ENV_MUTEX.lock().unwrap();

        let saved: Vec<_> = ENV_KEYS
            .iter()
            .map(|k| (*k, std::env::var(k).ok()))
            .collect();

        // SAFETY: Serialized by mutex; only test code touches these vars.
        unsafe {
            for k in ENV_KEYS {
                std::env::remove_var(k);
            }
            for (k, v) in vars {
                std::env::set_var(k, v);
            }
        }

        f();

        // SAFETY: Restoring original env state.
        unsafe {
            for (k, v) in &saved {
                match v {
                    Some(val) => std::env::set_var(k, val),
                    None => std::env::remove_var(k),
                }
            }
        }
    }

    #[test]
    fn config_defaults() {
        with_env_vars(&[], || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.stream.url, "nats://localhost:4222");
            assert_eq!(config.stream.stream_name, "events-raw");
            assert_eq!(config.consumer_name, "event-enricher");
            assert_eq!(config.max_in_flight, 64);
            assert_eq!(config.ack_wait, Duration::from_secs(30));
            assert_eq!(config.max_redeliveries, None);
            assert_eq!(config.max_deliver, None);
            assert!(config.processor_settings().consumer.max_deliver.is_none());
            assert_eq!(config.clickhouse.table, "events");
            assert!(config.dedupe_path.is_none());
            assert_eq!(config.metrics_port, 9091);
        });
    }

    #[test]
    fn config_custom_values() {
        with_env_vars(
            &[
                ("NATS_URL", "nats://nats:4222"),
                ("ZORI_CONSUMER_NAME", "enricher-2"),
                ("ZORI_MAX_IN_FLIGHT", "8"),
                ("ZORI_MAX_REDELIVERIES", "20"),
                ("CLICKHOUSE_URL", "http://ch:8123"),
                ("ZORI_DEDUPE_PATH", "/data/dedupe"),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.stream.url, "nats://nats:4222");
                assert_eq!(config.max_redeliveries, Some(20));
                assert_eq!(config.clickhouse.url, "http://ch:8123");
                assert_eq!(config.dedupe_path, Some(PathBuf::from("/data/dedupe")));

                let settings = config.processor_settings();
                assert_eq!(settings.consumer.durable_name, "enricher-2");
                assert_eq!(settings.max_in_flight, 8);
            },
        );
    }

    #[test]
    fn config_zero_redeliveries_means_unbounded() {
        with_env_vars(&[("ZORI_MAX_REDELIVERIES", "0")], || {
            assert_eq!(Config::from_env().unwrap().max_redeliveries, None);
        });
    }

    #[test]
    fn config_max_deliver_reaches_consumer() {
        with_env_vars(
            &[("ZORI_MAX_REDELIVERIES", "5"), ("ZORI_MAX_DELIVER", "10")],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.max_deliver, Some(10));
                assert_eq!(config.processor_settings().consumer.max_deliver, Some(10));
            },
        );
        with_env_vars(&[("ZORI_MAX_DELIVER", "0")], || {
            assert_eq!(Config::from_env().unwrap().max_deliver, None);
        });
    }

    #[test]
    fn config_rejects_broker_limit_below_termination_cap() {
        with_env_vars(
            &[("ZORI_MAX_REDELIVERIES", "10"), ("ZORI_MAX_DELIVER", "3")],
            || {
                assert!(Config::from_env().is_err());
            },
        );
    }

    #[test]
    fn config_rejects_invalid_numbers() {
        with_env_vars(&[("ZORI_MAX_IN_FLIGHT", "lots")], || {
            assert!(Config::from_env().is_err());
        });
        with_env_vars(&[("ZORI_MAX_IN_FLIGHT", "0")], || {
            assert!(Config::from_env().is_err());
        });
    }
}
