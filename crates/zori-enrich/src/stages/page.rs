//! Page URL stage.

use zori_core::EventFrame;

use super::{Stage, parse_url};
use crate::{Error, Result};

/// Extracts the path component of the page URL into `page_path`.
///
/// An empty page URL maps to `/`.
pub struct PageStage;

impl Stage for PageStage {
    fn name(&self) -> &'static str {
        "page"
    }

    fn apply(&self, frame: &mut EventFrame) -> Result<()> {
        let page_url = frame.event.page_url.trim();
        if page_url.is_empty() {
            frame.enrichment.page_path = Some("/".to_string());
            return Ok(());
        }

        let url = parse_url(page_url).map_err(|e| Error::stage(self.name(), e))?;
        frame.enrichment.page_path = Some(url.path().to_string());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::empty_frame;

    fn page_path(page_url: &str) -> Option<String> {
        let mut frame = empty_frame();
        frame.event.page_url = page_url.to_string();
        PageStage.apply(&mut frame).unwrap();
        frame.enrichment.page_path
    }

    #[test]
    fn test_empty_url_defaults_to_root() {
        assert_eq!(page_path("").as_deref(), Some("/"));
    }

    #[test]
    fn test_path_drops_query() {
        assert_eq!(
            page_path("https://example.com/pricing?x=1").as_deref(),
            Some("/pricing")
        );
    }

    #[test]
    fn test_path_drops_fragment() {
        assert_eq!(
            page_path("https://example.com/docs/start#install").as_deref(),
            Some("/docs/start")
        );
    }

    #[test]
    fn test_bare_origin_is_root() {
        assert_eq!(page_path("https://example.com").as_deref(), Some("/"));
    }

    #[test]
    fn test_relative_url() {
        assert_eq!(page_path("/blog/post-1?ref=x").as_deref(), Some("/blog/post-1"));
    }

    #[test]
    fn test_unparseable_url_is_error() {
        let mut frame = empty_frame();
        frame.event.page_url = "https://[bad-host/".to_string();
        let err = PageStage.apply(&mut frame).unwrap_err();
        assert!(matches!(err, Error::Stage { stage: "page", .. }));
        assert!(frame.enrichment.page_path.is_none());
    }

    #[test]
    fn test_apply_twice_is_idempotent() {
        let mut frame = empty_frame();
        frame.event.page_url = "https://example.com/pricing?x=1".to_string();
        PageStage.apply(&mut frame).unwrap();
        let first = frame.enrichment.clone();
        PageStage.apply(&mut frame).unwrap();
        assert_eq!(frame.enrichment, first);
    }
}
