//! Event data model.
//!
//! A [`ClientEvent`] is what the tracking script posts to the gateway. The
//! gateway wraps it into an [`EventFrame`] together with the owning project and
//! organization, and the enricher fills the [`Enrichment`] fields before the
//! frame is persisted.
//!
//! All three types share one flat JSON object on the wire:
//!
//! ```text
//! { "visitor_id": "...", "page_url": "...", ...,      <- ClientEvent
//!   "project_id": "...", "organization_id": "...",    <- EventFrame
//!   "page_path": "/pricing", "browser_name": ..., }   <- Enrichment
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw analytics event sent by the tracking script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientEvent {
    /// Self-reported visitor id; must match the `visitor_id` cookie once set.
    pub visitor_id: String,

    /// Event name, e.g. `page_view` or `click`.
    #[serde(default)]
    pub event_name: String,

    /// Id generated by the client; with the project id it identifies the event.
    pub client_generated_event_id: String,

    /// Timestamp taken by the client when the event happened.
    pub client_timestamp_utc: DateTime<Utc>,

    #[serde(default)]
    pub page_url: String,

    #[serde(default, alias = "referrer_url")]
    pub referrer: String,

    /// Selector or label of the clicked element.
    #[serde(default)]
    pub click_on: Option<String>,

    /// Click coordinates as `[x, y]`.
    #[serde(default)]
    pub click_position: Option<Vec<f64>>,

    #[serde(default)]
    pub utm_parameters: BTreeMap<String, String>,

    /// Free-form properties attached by the site owner.
    #[serde(default)]
    pub custom_properties: Option<serde_json::Value>,

    /// Client IP, filled by the gateway from proxy headers or the peer address.
    #[serde(default)]
    pub ip: String,

    /// `User-Agent` of the ingest request, filled by the gateway.
    #[serde(default)]
    pub user_agent: String,
}

/// Fields derived by the enrichment stages.
///
/// Every field belongs to exactly one stage and stays `None` until that stage
/// has run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Enrichment {
    pub location_country_iso: Option<String>,
    pub location_city: Option<String>,

    pub browser_name: Option<String>,
    pub os_name: Option<String>,
    pub device_type: Option<String>,

    pub referrer_domain: Option<String>,
    pub referrer_path: Option<String>,

    pub page_path: Option<String>,
}

/// In-flight representation of one event: client payload, tenant ids and
/// enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    #[serde(flatten)]
    pub event: ClientEvent,

    pub project_id: String,
    pub organization_id: String,

    #[serde(flatten)]
    pub enrichment: Enrichment,
}

impl EventFrame {
    /// Build a frame for a project. Enrichment starts empty.
    pub fn new(
        event: ClientEvent,
        project_id: impl Into<String>,
        organization_id: impl Into<String>,
    ) -> Self {
        Self {
            event,
            project_id: project_id.into(),
            organization_id: organization_id.into(),
            enrichment: Enrichment::default(),
        }
    }

    /// Serialize the frame for publishing.
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a frame from a stream message payload.
    pub fn from_bytes(payload: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Split a two-element click position into `(x, y)`.
    ///
    /// Any other shape yields `(None, None)`.
    pub fn click_coordinates(&self) -> (Option<f64>, Option<f64>) {
        match self.event.click_position.as_deref() {
            Some([x, y]) => (Some(*x), Some(*y)),
            _ => (None, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_event() -> ClientEvent {
        ClientEvent {
            visitor_id: "v_123".to_string(),
            event_name: "page_view".to_string(),
            client_generated_event_id: "evt_1".to_string(),
            client_timestamp_utc: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            page_url: "https://example.com/pricing?x=1".to_string(),
            referrer: "https://ref.example.com/a/b".to_string(),
            click_on: None,
            click_position: None,
            utm_parameters: BTreeMap::from([("utm_source".to_string(), "news".to_string())]),
            custom_properties: None,
            ip: String::new(),
            user_agent: String::new(),
        }
    }

    #[test]
    fn test_client_event_minimal_json() {
        let json = r#"{
            "visitor_id": "v_1",
            "client_generated_event_id": "e_1",
            "client_timestamp_utc": "2025-03-01T12:00:00Z"
        }"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.visitor_id, "v_1");
        assert!(event.page_url.is_empty());
        assert!(event.utm_parameters.is_empty());
        assert!(event.click_position.is_none());
    }

    #[test]
    fn test_client_event_referrer_alias() {
        let json = r#"{
            "visitor_id": "v_1",
            "client_generated_event_id": "e_1",
            "client_timestamp_utc": "2025-03-01T12:00:00Z",
            "referrer_url": "https://google.com/"
        }"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.referrer, "https://google.com/");
    }

    #[test]
    fn test_client_event_rejects_missing_visitor() {
        let json = r#"{"client_generated_event_id": "e_1", "client_timestamp_utc": "2025-03-01T12:00:00Z"}"#;
        assert!(serde_json::from_str::<ClientEvent>(json).is_err());
    }

    #[test]
    fn test_frame_json_is_flat() {
        let frame = EventFrame::new(sample_event(), "prj_1", "org_1");
        let value: serde_json::Value = serde_json::to_value(&frame).unwrap();

        assert_eq!(value["visitor_id"], "v_123");
        assert_eq!(value["project_id"], "prj_1");
        assert_eq!(value["organization_id"], "org_1");
        assert!(value["page_path"].is_null());
        assert!(value.get("event").is_none());
        assert!(value.get("enrichment").is_none());
    }

    #[test]
    fn test_frame_bytes_preserve_enrichment() {
        let mut frame = EventFrame::new(sample_event(), "prj_1", "org_1");
        frame.enrichment.page_path = Some("/pricing".to_string());
        frame.enrichment.browser_name = Some("Chrome".to_string());

        let decoded = EventFrame::from_bytes(&frame.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_frame_from_garbage_fails() {
        assert!(EventFrame::from_bytes(b"not a frame").is_err());
        assert!(EventFrame::from_bytes(br#"{"visitor_id": "v"}"#).is_err());
    }

    #[test]
    fn test_click_coordinates() {
        let mut frame = EventFrame::new(sample_event(), "prj_1", "org_1");
        assert_eq!(frame.click_coordinates(), (None, None));

        frame.event.click_position = Some(vec![12.5, 80.0]);
        assert_eq!(frame.click_coordinates(), (Some(12.5), Some(80.0)));

        frame.event.click_position = Some(vec![1.0]);
        assert_eq!(frame.click_coordinates(), (None, None));

        frame.event.click_position = Some(vec![1.0, 2.0, 3.0]);
        assert_eq!(frame.click_coordinates(), (None, None));
    }
}
