use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::filter::Platform;

/// A single enriched page view, as persisted by a [`crate::Store`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub tenant_id: Option<i64>,
    pub fingerprint: String,
    /// Start of the session this hit belongs to. `None` when sessions are disabled.
    pub session: Option<DateTime<Utc>>,
    pub path: String,
    pub url: String,
    pub language: String,
    pub user_agent: String,
    pub referrer: Option<String>,
    pub referrer_name: Option<String>,
    pub referrer_icon: Option<String>,
    pub os: String,
    pub os_version: String,
    pub browser: String,
    pub browser_version: String,
    pub country_code: String,
    pub desktop: bool,
    pub mobile: bool,
    pub screen_width: u32,
    pub screen_height: u32,
    pub screen_class: String,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_content: Option<String>,
    pub utm_term: Option<String>,
    pub meta: BTreeMap<String, String>,
    pub time: DateTime<Utc>,
}

impl Hit {
    pub fn platform(&self) -> Platform {
        Platform::of(self.desktop, self.mobile)
    }

    /// Screen size as `WIDTHxHEIGHT`, or empty when the client sent none.
    pub fn screen_size(&self) -> String {
        if self.screen_width == 0 || self.screen_height == 0 {
            String::new()
        } else {
            format!("{}x{}", self.screen_width, self.screen_height)
        }
    }
}

/// Per-hit overrides supplied by the caller of `Tracker::hit`.
#[derive(Debug, Clone, Default)]
pub struct HitOptions {
    pub tenant_id: Option<i64>,
    /// Page URL. Takes precedence over the request URI for path and UTM extraction.
    pub url: Option<String>,
    pub path: Option<String>,
    pub referrer: Option<String>,
    pub screen_width: u32,
    pub screen_height: u32,
    /// Additional input mixed into the fingerprint.
    pub visitor_signal: Option<String>,
    /// Replaces the tracker's blacklist for this hit.
    pub referrer_domain_blacklist: Option<Vec<String>>,
    pub referrer_domain_blacklist_includes_subdomains: Option<bool>,
    pub meta: BTreeMap<String, String>,
}

impl HitOptions {
    /// Splits the metadata into parallel key and value lists, ordered by key.
    pub fn meta_data(&self) -> (Vec<String>, Vec<String>) {
        self.meta
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .unzip()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_data_splits_keys_and_values() {
        let mut options = HitOptions::default();
        options.meta.insert("key".into(), "value".into());
        options.meta.insert("hello".into(), "world".into());

        let (keys, values) = options.meta_data();
        assert_eq!(keys, vec!["hello".to_string(), "key".to_string()]);
        assert_eq!(values, vec!["world".to_string(), "value".to_string()]);
    }

    #[test]
    fn meta_data_empty() {
        let (keys, values) = HitOptions::default().meta_data();
        assert!(keys.is_empty());
        assert!(values.is_empty());
    }

    #[test]
    fn screen_size_requires_both_dimensions() {
        let hit = Hit {
            screen_width: 1920,
            ..Default::default()
        };
        assert_eq!(hit.screen_size(), "");

        let hit = Hit {
            screen_width: 1920,
            screen_height: 1080,
            ..Default::default()
        };
        assert_eq!(hit.screen_size(), "1920x1080");
    }
}
