//! Analytical sink: where enriched events end up.
//!
//! - [`EventRecord`] - one row of the `events` table
//! - [`AnalyticsSink`] - insert contract used by the processor
//! - [`ClickHouseSink`] - ClickHouse implementation using server-side async inserts

mod clickhouse;

pub use self::clickhouse::{ClickHouseConfig, ClickHouseSink};

use ::clickhouse::Row;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zori_core::EventFrame;

use crate::Result;

/// Row structure matching the ClickHouse `events` table.
///
/// Timestamps are `DateTime64(3, 'UTC')` columns, carried as milliseconds since
/// the Unix epoch.
#[derive(Debug, Clone, PartialEq, Row, Serialize, Deserialize)]
pub struct EventRecord {
    pub ip: String,
    pub visitor_id: String,
    pub browser_name: Option<String>,
    pub os_name: Option<String>,
    pub device_type: Option<String>,
    pub client_generated_event_id: String,
    pub event_name: String,
    pub location_country_iso: Option<String>,
    pub location_city: Option<String>,
    pub client_timestamp_utc: i64,
    pub server_timestamp_utc: i64,
    pub user_agent: String,
    pub page_url: String,
    pub page_path: Option<String>,
    pub referrer_url: String,
    pub referrer_domain: Option<String>,
    pub referrer_path: Option<String>,
    pub utm_parameters: Vec<(String, String)>,
    pub click_on: Option<String>,
    pub click_position_x: Option<f64>,
    pub click_position_y: Option<f64>,
    pub project_id: String,
    pub organization_id: String,
}

impl EventRecord {
    /// Build the row for an enriched frame received by the server at `received_at`.
    pub fn from_frame(frame: &EventFrame, received_at: DateTime<Utc>) -> Self {
        let event = &frame.event;
        let enrichment = &frame.enrichment;
        let (click_position_x, click_position_y) = frame.click_coordinates();

        Self {
            ip: event.ip.clone(),
            visitor_id: event.visitor_id.clone(),
            browser_name: enrichment.browser_name.clone(),
            os_name: enrichment.os_name.clone(),
            device_type: enrichment.device_type.clone(),
            client_generated_event_id: event.client_generated_event_id.clone(),
            event_name: event.event_name.clone(),
            location_country_iso: enrichment.location_country_iso.clone(),
            location_city: enrichment.location_city.clone(),
            client_timestamp_utc: event.client_timestamp_utc.timestamp_millis(),
            server_timestamp_utc: received_at.timestamp_millis(),
            user_agent: event.user_agent.clone(),
            page_url: event.page_url.clone(),
            page_path: enrichment.page_path.clone(),
            referrer_url: event.referrer.clone(),
            referrer_domain: enrichment.referrer_domain.clone(),
            referrer_path: enrichment.referrer_path.clone(),
            utm_parameters: event
                .utm_parameters
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            click_on: event.click_on.clone(),
            click_position_x,
            click_position_y,
            project_id: frame.project_id.clone(),
            organization_id: frame.organization_id.clone(),
        }
    }

    /// Key identifying the event across redeliveries.
    pub fn dedupe_key(&self) -> String {
        format!("{}:{}", self.project_id, self.client_generated_event_id)
    }
}

/// Destination for enriched events.
///
/// Must accept concurrent calls. A failed insert is retryable: the processor
/// naks the message and the broker redelivers it.
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn insert(&self, record: &EventRecord) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::empty_frame;
    use chrono::TimeZone;

    #[test]
    fn test_record_from_frame() {
        let mut frame = empty_frame();
        frame.event.ip = "81.2.69.142".to_string();
        frame.event.page_url = "https://example.com/pricing".to_string();
        frame.event.click_on = Some("button#buy".to_string());
        frame.event.click_position = Some(vec![12.5, 80.0]);
        frame
            .event
            .utm_parameters
            .insert("utm_source".to_string(), "newsletter".to_string());
        frame.enrichment.page_path = Some("/pricing".to_string());
        frame.enrichment.location_country_iso = Some("GB".to_string());

        let received_at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 5).unwrap();
        let record = EventRecord::from_frame(&frame, received_at);

        assert_eq!(record.ip, "81.2.69.142");
        assert_eq!(record.project_id, "prj_1");
        assert_eq!(record.organization_id, "org_1");
        assert_eq!(record.page_path.as_deref(), Some("/pricing"));
        assert_eq!(record.location_country_iso.as_deref(), Some("GB"));
        assert_eq!(record.click_on.as_deref(), Some("button#buy"));
        assert_eq!(record.click_position_x, Some(12.5));
        assert_eq!(record.click_position_y, Some(80.0));
        assert_eq!(
            record.utm_parameters,
            vec![("utm_source".to_string(), "newsletter".to_string())]
        );
        assert_eq!(record.client_timestamp_utc, 1_740_830_400_000);
        assert_eq!(record.server_timestamp_utc, 1_740_830_405_000);
    }

    #[test]
    fn test_record_without_click_position() {
        let record = EventRecord::from_frame(&empty_frame(), Utc::now());
        assert!(record.click_position_x.is_none());
        assert!(record.click_position_y.is_none());
    }

    #[test]
    fn test_dedupe_key() {
        let record = EventRecord::from_frame(&empty_frame(), Utc::now());
        assert_eq!(record.dedupe_key(), "prj_1:evt_1");
    }
}
