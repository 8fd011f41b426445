use std::net::IpAddr;
use std::path::Path;

use anyhow::{Context, Result};
use maxminddb::{geoip2, Reader};

use footfall_core::GeoDb;

/// Country lookups against a MaxMind GeoLite2/GeoIP2 `.mmdb` file.
///
/// The database is read into memory once when opened.
pub struct MaxMindGeoDb {
    reader: Reader<Vec<u8>>,
}

impl MaxMindGeoDb {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = Reader::open_readfile(path)
            .with_context(|| format!("failed to open GeoIP database at {}", path.display()))?;
        Ok(Self { reader })
    }
}

impl GeoDb for MaxMindGeoDb {
    fn country_code(&self, ip: IpAddr) -> Option<String> {
        let result = self.reader.lookup(ip).ok()?;
        // Country fields are present in both Country and City databases.
        let record = result.decode::<geoip2::Country>().ok()??;
        record
            .country
            .iso_code
            .filter(|code| !code.is_empty())
            .map(|code| code.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_database_is_an_error() {
        assert!(MaxMindGeoDb::open("/nonexistent/GeoLite2-Country.mmdb").is_err());
    }
}
