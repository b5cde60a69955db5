//! Enrichment stages.
//!
//! Each stage derives one category of context from the raw event fields of an
//! [`EventFrame`] and writes it to the enrichment fields it owns:
//!
//! | stage        | reads        | writes                                    |
//! |--------------|--------------|-------------------------------------------|
//! | [`GeoStage`]       | `ip`         | `location_country_iso`, `location_city`   |
//! | [`PageStage`]      | `page_url`   | `page_path`                               |
//! | [`UserAgentStage`] | `user_agent` | `browser_name`, `os_name`, `device_type`  |
//! | [`ReferrerStage`]  | `referrer`   | `referrer_domain`, `referrer_path`        |
//!
//! Stages never read each other's output, so their order only matters for
//! which error is reported first. New stages are added by appending to the
//! list built in [`default_stages`].

mod geo;
mod page;
mod referrer;
mod user_agent;

pub use geo::{GeoLocation, GeoResolver, GeoStage, MaxMindResolver};
pub use page::PageStage;
pub use referrer::ReferrerStage;
pub use user_agent::UserAgentStage;

use std::sync::Arc;

use url::Url;
use zori_core::EventFrame;

use crate::Result;

/// A pure transform over one event frame.
///
/// Implementations must treat empty input as a no-op, must not block, and must
/// produce the same enrichment when applied again to the same input.
pub trait Stage: Send + Sync {
    /// Short name used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Enrich `frame` in place.
    fn apply(&self, frame: &mut EventFrame) -> Result<()>;
}

/// The stage list in its fixed order: Geo, Page, UserAgent, Referrer.
pub fn default_stages(geo: Arc<dyn GeoResolver>) -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(GeoStage::new(geo)),
        Box::new(PageStage),
        Box::new(UserAgentStage::new()),
        Box::new(ReferrerStage),
    ]
}

/// Origin that scheme-less input is resolved against.
const PLACEHOLDER_BASE: &str = "http://relative.invalid/";

/// A parsed URL and whether its host came from the input.
pub(crate) struct ParsedUrl {
    pub url: Url,
    has_origin: bool,
}

impl ParsedUrl {
    /// Host of the input, `None` when it had none of its own.
    pub fn host(&self) -> Option<&str> {
        self.has_origin.then(|| self.url.host_str()).flatten()
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }
}

/// Parse an absolute, protocol-relative or scheme-less URL.
///
/// Tracking scripts occasionally send paths like `/pricing` instead of full
/// URLs; those are resolved against a placeholder origin so the path survives.
/// Protocol-relative input (`//host/path`) keeps its host.
pub(crate) fn parse_url(raw: &str) -> std::result::Result<ParsedUrl, url::ParseError> {
    match Url::parse(raw) {
        Ok(url) => Ok(ParsedUrl {
            url,
            has_origin: true,
        }),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let url = Url::parse(PLACEHOLDER_BASE)?.join(raw)?;
            Ok(ParsedUrl {
                url,
                has_origin: raw.starts_with("//"),
            })
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeMap;

    use chrono::{TimeZone, Utc};
    use zori_core::{ClientEvent, EventFrame};

    /// A frame with every enrichable input empty.
    pub fn empty_frame() -> EventFrame {
        let event = ClientEvent {
            visitor_id: "v_1".to_string(),
            event_name: "page_view".to_string(),
            client_generated_event_id: "evt_1".to_string(),
            client_timestamp_utc: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            page_url: String::new(),
            referrer: String::new(),
            click_on: None,
            click_position: None,
            utm_parameters: BTreeMap::new(),
            custom_properties: None,
            ip: String::new(),
            user_agent: String::new(),
        };
        EventFrame::new(event, "prj_1", "org_1")
    }
}
