//! Referrer parsing and blacklist matching.

use url::Url;

/// A referrer that survived blacklist filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Referrer {
    /// Referrer URL without query string and fragment.
    pub url: String,
    /// Registrable domain of the referrer host, e.g. `example.co.uk`.
    pub name: String,
    pub icon: Option<String>,
}

/// Parse a raw referrer. A value without a scheme is treated as `https://`.
pub fn parse_url(raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = if raw.contains("://") {
        Url::parse(raw).ok()?
    } else {
        Url::parse(&format!("https://{raw}")).ok()?
    };
    parsed.host_str().filter(|h| !h.is_empty())?;
    Some(parsed)
}

/// Whether `host` is on the blacklist.
///
/// Entries match the host exactly; with `include_subdomains` they also match
/// any host ending in `.entry`.
pub fn is_blacklisted(host: &str, blacklist: &[String], include_subdomains: bool) -> bool {
    let host = host.trim_end_matches('.').to_lowercase();
    blacklist.iter().any(|entry| {
        let entry = entry.trim().to_lowercase();
        if entry.is_empty() {
            return false;
        }
        host == entry || (include_subdomains && host.ends_with(&format!(".{entry}")))
    })
}

/// Resolve a raw referrer into its stored form.
///
/// Returns `None` for empty or unparsable referrers and for blacklisted hosts.
pub fn resolve(raw: &str, blacklist: &[String], include_subdomains: bool) -> Option<Referrer> {
    let mut url = parse_url(raw)?;
    let host = url.host_str()?.to_lowercase();
    if is_blacklisted(&host, blacklist, include_subdomains) {
        return None;
    }

    url.set_query(None);
    url.set_fragment(None);
    let name = psl::domain_str(&host).unwrap_or(&host).to_string();

    Some(Referrer {
        url: url.to_string(),
        name,
        icon: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn resolve_strips_query_and_fragment() {
        let r = resolve("https://news.ycombinator.com/item?id=12345#top", &[], false)
            .expect("referrer");
        assert_eq!(r.url, "https://news.ycombinator.com/item");
        assert_eq!(r.name, "ycombinator.com");
    }

    #[test]
    fn resolve_adds_missing_scheme() {
        let r = resolve("pirsch.io", &[], false).expect("referrer");
        assert_eq!(r.url, "https://pirsch.io/");
        assert_eq!(r.name, "pirsch.io");
    }

    #[test]
    fn resolve_empty_is_none() {
        assert_eq!(resolve("", &[], false), None);
        assert_eq!(resolve("   ", &[], false), None);
    }

    #[test]
    fn blacklist_matches_exact_host() {
        let blacklist = list(&["pirsch.io", "www.pirsch.io"]);
        assert_eq!(resolve("https://pirsch.io/", &blacklist, false), None);
        assert_eq!(resolve("https://www.pirsch.io/", &blacklist, false), None);
        assert_eq!(resolve("pirsch.io", &blacklist, false), None);
        assert!(resolve("https://sub.pirsch.io/", &blacklist, false).is_some());
    }

    #[test]
    fn blacklist_matches_subdomains_when_enabled() {
        let blacklist = list(&["pirsch.io"]);
        assert_eq!(resolve("https://sub.pirsch.io/", &blacklist, true), None);
        assert_eq!(resolve("https://pirsch.io/", &blacklist, true), None);
        assert!(resolve("https://notpirsch.io/", &blacklist, true).is_some());
    }

    #[test]
    fn blacklist_is_case_insensitive() {
        assert!(is_blacklisted("WWW.Example.com", &list(&["www.example.COM"]), false));
    }
}
