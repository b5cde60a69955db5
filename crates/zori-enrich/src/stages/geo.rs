//! IP geolocation stage backed by a MaxMind database.

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use maxminddb::{MaxMindDBError, Reader, geoip2};
use zori_core::EventFrame;

use super::Stage;
use crate::{Error, Result};

/// Location fields resolved for one address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoLocation {
    /// ISO 3166-1 alpha-2 country code.
    pub country_iso: Option<String>,
    /// English city name.
    pub city: Option<String>,
}

/// Read-only IP → location lookup.
///
/// One instance is opened at startup and shared by every in-flight message.
pub trait GeoResolver: Send + Sync {
    /// Resolve `ip`. `Ok(None)` means the address is not in the database.
    fn resolve(&self, ip: IpAddr) -> Result<Option<GeoLocation>>;
}

/// [`GeoResolver`] over a GeoIP2/GeoLite2 City database.
pub struct MaxMindResolver {
    reader: Reader<Vec<u8>>,
}

impl MaxMindResolver {
    /// Open the database file. Failing here is fatal for the enricher.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = Reader::open_readfile(path)?;

        tracing::info!(
            path = %path.display(),
            database_type = %reader.metadata.database_type,
            build_epoch = reader.metadata.build_epoch,
            "GeoIP database opened"
        );

        Ok(Self { reader })
    }
}

impl GeoResolver for MaxMindResolver {
    fn resolve(&self, ip: IpAddr) -> Result<Option<GeoLocation>> {
        let record: geoip2::City = match self.reader.lookup(ip) {
            Ok(record) => record,
            Err(MaxMindDBError::AddressNotFoundError(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let country_iso = record
            .country
            .and_then(|country| country.iso_code)
            .map(str::to_string);

        let city = record
            .city
            .and_then(|city| city.names)
            .and_then(|names| names.get("en").map(|name| name.to_string()));

        Ok(Some(GeoLocation { country_iso, city }))
    }
}

/// Fills `location_country_iso` and `location_city` from the client IP.
pub struct GeoStage {
    resolver: Arc<dyn GeoResolver>,
}

impl GeoStage {
    pub fn new(resolver: Arc<dyn GeoResolver>) -> Self {
        Self { resolver }
    }
}

impl Stage for GeoStage {
    fn name(&self) -> &'static str {
        "geo"
    }

    fn apply(&self, frame: &mut EventFrame) -> Result<()> {
        let raw = frame.event.ip.trim();
        if raw.is_empty() {
            return Ok(());
        }

        // A malformed address will not parse on redelivery either.
        let ip: IpAddr = match raw.parse() {
            Ok(ip) => ip,
            Err(e) => {
                tracing::warn!(ip = %raw, error = %e, "skipping geolocation for unparseable IP");
                return Ok(());
            }
        };

        let location = self
            .resolver
            .resolve(ip)
            .map_err(|e| Error::stage(self.name(), e))?;

        if let Some(location) = location {
            frame.enrichment.location_country_iso = location.country_iso.filter(|s| !s.is_empty());
            frame.enrichment.location_city = location.city.filter(|s| !s.is_empty());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::empty_frame;
    use std::collections::HashMap;

    /// In-memory resolver keyed by address.
    struct StaticResolver {
        entries: HashMap<IpAddr, GeoLocation>,
        fail: bool,
    }

    impl StaticResolver {
        fn new() -> Self {
            let mut entries = HashMap::new();
            entries.insert(
                "81.2.69.142".parse().unwrap(),
                GeoLocation {
                    country_iso: Some("GB".to_string()),
                    city: Some("London".to_string()),
                },
            );
            entries.insert(
                "2001:db8::1".parse().unwrap(),
                GeoLocation {
                    country_iso: Some("DE".to_string()),
                    city: None,
                },
            );
            Self {
                entries,
                fail: false,
            }
        }
    }

    impl GeoResolver for StaticResolver {
        fn resolve(&self, ip: IpAddr) -> Result<Option<GeoLocation>> {
            if self.fail {
                return Err(Error::Config("database unavailable".to_string()));
            }
            Ok(self.entries.get(&ip).cloned())
        }
    }

    fn stage() -> GeoStage {
        GeoStage::new(Arc::new(StaticResolver::new()))
    }

    #[test]
    fn test_empty_ip_is_noop() {
        let mut frame = empty_frame();
        stage().apply(&mut frame).unwrap();
        assert_eq!(frame.enrichment, Default::default());
    }

    #[test]
    fn test_known_ipv4() {
        let mut frame = empty_frame();
        frame.event.ip = "81.2.69.142".to_string();
        stage().apply(&mut frame).unwrap();
        assert_eq!(frame.enrichment.location_country_iso.as_deref(), Some("GB"));
        assert_eq!(frame.enrichment.location_city.as_deref(), Some("London"));
    }

    #[test]
    fn test_known_ipv6_without_city() {
        let mut frame = empty_frame();
        frame.event.ip = " 2001:db8::1 ".to_string();
        stage().apply(&mut frame).unwrap();
        assert_eq!(frame.enrichment.location_country_iso.as_deref(), Some("DE"));
        assert!(frame.enrichment.location_city.is_none());
    }

    #[test]
    fn test_address_not_found_leaves_fields_unset() {
        let mut frame = empty_frame();
        frame.event.ip = "10.0.0.1".to_string();
        stage().apply(&mut frame).unwrap();
        assert!(frame.enrichment.location_country_iso.is_none());
        assert!(frame.enrichment.location_city.is_none());
    }

    #[test]
    fn test_malformed_ip_is_skipped() {
        let mut frame = empty_frame();
        frame.event.ip = "not-an-ip".to_string();
        stage().apply(&mut frame).unwrap();
        assert!(frame.enrichment.location_country_iso.is_none());
    }

    #[test]
    fn test_resolver_failure_is_stage_error() {
        let mut resolver = StaticResolver::new();
        resolver.fail = true;
        let stage = GeoStage::new(Arc::new(resolver));

        let mut frame = empty_frame();
        frame.event.ip = "81.2.69.142".to_string();
        let err = stage.apply(&mut frame).unwrap_err();
        assert!(matches!(err, Error::Stage { stage: "geo", .. }));
    }

    #[test]
    fn test_apply_twice_is_idempotent() {
        let stage = stage();
        let mut frame = empty_frame();
        frame.event.ip = "81.2.69.142".to_string();
        stage.apply(&mut frame).unwrap();
        let first = frame.enrichment.clone();
        stage.apply(&mut frame).unwrap();
        assert_eq!(frame.enrichment, first);
    }

    #[test]
    fn test_open_missing_database_fails() {
        assert!(MaxMindResolver::open("/nonexistent/GeoLite2-City.mmdb").is_err());
    }
}
