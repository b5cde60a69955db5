//! Referrer URL stage.

use zori_core::EventFrame;

use super::{Stage, parse_url};
use crate::{Error, Result};

/// Splits the referrer URL into `referrer_domain` (host) and `referrer_path`.
pub struct ReferrerStage;

impl Stage for ReferrerStage {
    fn name(&self) -> &'static str {
        "referrer"
    }

    fn apply(&self, frame: &mut EventFrame) -> Result<()> {
        let referrer = frame.event.referrer.trim();
        if referrer.is_empty() {
            return Ok(());
        }

        let url = parse_url(referrer).map_err(|e| Error::stage(self.name(), e))?;

        frame.enrichment.referrer_domain = url.host().map(str::to_string);
        frame.enrichment.referrer_path = Some(url.path().to_string());

        Ok(())
    }
}
