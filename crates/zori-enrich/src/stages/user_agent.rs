//! User-Agent stage.

use woothee::parser::{Parser, WootheeResult};
use zori_core::EventFrame;

use super::Stage;
use crate::Result;

/// Value woothee reports for fields it cannot determine.
const WOOTHEE_UNKNOWN: &str = "UNKNOWN";

/// Fills `browser_name`, `os_name` and `device_type` from the user-agent string.
///
/// Device types are normalized to `desktop`, `mobile`, `tablet`, `bot`,
/// `appliance` or `unknown`.
pub struct UserAgentStage {
    parser: Parser,
}

impl UserAgentStage {
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
        }
    }
}

impl Default for UserAgentStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for UserAgentStage {
    fn name(&self) -> &'static str {
        "user_agent"
    }

    fn apply(&self, frame: &mut EventFrame) -> Result<()> {
        let user_agent = frame.event.user_agent.trim();
        if user_agent.is_empty() {
            return Ok(());
        }

        let (browser, os, device) = match self.parser.parse(user_agent) {
            Some(parsed) => (
                normalize_name(parsed.name),
                normalize_name(parsed.os),
                device_type(&parsed, user_agent),
            ),
            None => ("Unknown".to_string(), "Unknown".to_string(), "unknown"),
        };

        frame.enrichment.browser_name = Some(browser);
        frame.enrichment.os_name = Some(os);
        frame.enrichment.device_type = Some(device.to_string());

        Ok(())
    }
}

fn normalize_name(value: &str) -> String {
    if value.is_empty() || value == WOOTHEE_UNKNOWN {
        "Unknown".to_string()
    } else {
        value.to_string()
    }
}

fn device_type(parsed: &WootheeResult<'_>, user_agent: &str) -> &'static str {
    match parsed.category {
        "pc" => "desktop",
        "smartphone" if is_tablet(parsed.os, user_agent) => "tablet",
        "smartphone" | "mobilephone" => "mobile",
        "crawler" => "bot",
        "appliance" => "appliance",
        _ => "unknown",
    }
}

/// Woothee files tablets under "smartphone".
fn is_tablet(os: &str, user_agent: &str) -> bool {
    os == "iPad"
        || user_agent.contains("iPad")
        || user_agent.contains("Tablet")
        || (os == "Android" && !user_agent.contains("Mobile"))
}
