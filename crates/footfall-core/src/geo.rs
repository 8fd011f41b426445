use std::net::IpAddr;

/// IP to country lookup.
///
/// Implementations return `None` for unknown, private or malformed addresses and
/// never fail.
pub trait GeoDb: Send + Sync {
    /// Lower-case ISO 3166-1 alpha-2 code.
    fn country_code(&self, ip: IpAddr) -> Option<String>;
}
