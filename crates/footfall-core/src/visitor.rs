use sha2::{Digest, Sha256};

/// Compute a pseudonymous visitor fingerprint.
///
/// Formula: sha256(salt + ip + user_agent [+ signal])[0..8] encoded as 16 hex chars.
/// The page path is not part of the input: one visitor has the same fingerprint
/// on every page.
pub fn fingerprint(salt: &str, ip: &str, user_agent: &str, signal: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(ip.as_bytes());
    hasher.update(user_agent.as_bytes());
    if let Some(signal) = signal {
        hasher.update(signal.as_bytes());
    }
    let hash = hasher.finalize();
    hex::encode(&hash[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_16_hex_chars() {
        let id = fingerprint("salt", "1.2.3.4", "Mozilla/5.0 Chrome/120", None);
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let a = fingerprint("salt", "1.2.3.4", "ua", None);
        let b = fingerprint("salt", "1.2.3.4", "ua", None);
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_depends_on_salt_and_signal() {
        let base = fingerprint("salt", "1.2.3.4", "ua", None);
        assert_ne!(base, fingerprint("other", "1.2.3.4", "ua", None));
        assert_ne!(base, fingerprint("salt", "1.2.3.4", "ua", Some("tab-1")));
        assert_ne!(base, fingerprint("salt", "5.6.7.8", "ua", None));
    }
}
