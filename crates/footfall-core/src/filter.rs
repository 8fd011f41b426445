//! Query filters and their validated, backend-neutral predicate form.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::hit::Hit;

/// Device platform of a visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Desktop,
    Mobile,
    Unknown,
}

impl Platform {
    pub fn of(desktop: bool, mobile: bool) -> Self {
        match (desktop, mobile) {
            (true, _) => Platform::Desktop,
            (false, true) => Platform::Mobile,
            (false, false) => Platform::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Desktop => "desktop",
            Platform::Mobile => "mobile",
            Platform::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "desktop" => Ok(Platform::Desktop),
            "mobile" => Ok(Platform::Mobile),
            "unknown" => Ok(Platform::Unknown),
            other => Err(format!(
                "platform must be one of: desktop, mobile, unknown (got {other:?})"
            )),
        }
    }
}

/// Caller-supplied query restrictions.
///
/// Date fields are instants but only their UTC calendar day is significant after
/// [`Filter::validate`]. A `limit` of zero means unlimited.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub tenant_id: Option<i64>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Pins the query to a single day, overriding `from` and `to`.
    pub day: Option<DateTime<Utc>>,
    /// Only hits at or after this instant.
    pub start: Option<DateTime<Utc>>,
    pub path: Option<String>,
    pub language: Option<String>,
    pub country: Option<String>,
    pub referrer: Option<String>,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub platform: Option<Platform>,
    pub screen_class: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_content: Option<String>,
    pub utm_term: Option<String>,
    pub limit: i64,
}

impl Filter {
    pub fn new(tenant_id: Option<i64>) -> Self {
        Self {
            tenant_id,
            ..Default::default()
        }
    }

    /// Normalize against the current UTC day.
    pub fn validate(&mut self) {
        self.validate_with_today(Utc::now().date_naive());
    }

    /// Normalize the filter. Idempotent.
    ///
    /// After this call `from <= to <= today` holds for whichever bounds are set,
    /// date fields sit on UTC midnight, `start` has whole seconds, blank strings
    /// are unset and `limit >= 0`.
    pub fn validate_with_today(&mut self, today: NaiveDate) {
        let today = midnight(today);
        self.from = self.from.map(truncate_day);
        self.to = self.to.map(truncate_day);
        self.day = self.day.map(truncate_day);
        self.start = self.start.map(truncate_seconds);

        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                self.from = Some(to);
                self.to = Some(from);
            }
        }

        if self.to.is_some_and(|to| to > today) {
            self.to = Some(today);
        }
        if self.from.is_some_and(|from| from > today) {
            self.from = Some(today);
        }

        for field in [
            &mut self.path,
            &mut self.language,
            &mut self.country,
            &mut self.referrer,
            &mut self.os,
            &mut self.os_version,
            &mut self.browser,
            &mut self.browser_version,
            &mut self.screen_class,
            &mut self.utm_source,
            &mut self.utm_medium,
            &mut self.utm_campaign,
            &mut self.utm_content,
            &mut self.utm_term,
        ] {
            if field.as_deref().is_some_and(|v| v.trim().is_empty()) {
                *field = None;
            }
        }

        if self.limit < 0 {
            self.limit = 0;
        }
    }

    pub fn from_day(&self) -> Option<NaiveDate> {
        self.from.map(|t| t.date_naive())
    }

    pub fn to_day(&self) -> Option<NaiveDate> {
        self.to.map(|t| t.date_naive())
    }

    pub fn day(&self) -> Option<NaiveDate> {
        self.day.map(|t| t.date_naive())
    }

    /// The dimension and platform predicates of this filter.
    pub fn query(&self) -> Predicates {
        let mut fields = Vec::new();
        let pairs = [
            (Field::Path, &self.path),
            (Field::Language, &self.language),
            (Field::CountryCode, &self.country),
            (Field::Referrer, &self.referrer),
            (Field::Os, &self.os),
            (Field::OsVersion, &self.os_version),
            (Field::Browser, &self.browser),
            (Field::BrowserVersion, &self.browser_version),
            (Field::ScreenClass, &self.screen_class),
            (Field::UtmSource, &self.utm_source),
            (Field::UtmMedium, &self.utm_medium),
            (Field::UtmCampaign, &self.utm_campaign),
            (Field::UtmContent, &self.utm_content),
            (Field::UtmTerm, &self.utm_term),
        ];
        for (field, value) in pairs {
            if let Some(value) = value {
                fields.push((field, value.clone()));
            }
        }

        Predicates {
            since: self.start,
            fields,
            platform: self.platform,
        }
    }
}

fn midnight(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

fn truncate_day(t: DateTime<Utc>) -> DateTime<Utc> {
    midnight(t.date_naive())
}

fn truncate_seconds(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_nanosecond(0).unwrap_or(t)
}

/// A hit column that can be filtered by equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Path,
    Language,
    CountryCode,
    Referrer,
    Os,
    OsVersion,
    Browser,
    BrowserVersion,
    ScreenClass,
    UtmSource,
    UtmMedium,
    UtmCampaign,
    UtmContent,
    UtmTerm,
}

impl Field {
    pub fn column(self) -> &'static str {
        match self {
            Field::Path => "path",
            Field::Language => "language",
            Field::CountryCode => "country_code",
            Field::Referrer => "referrer",
            Field::Os => "os",
            Field::OsVersion => "os_version",
            Field::Browser => "browser",
            Field::BrowserVersion => "browser_version",
            Field::ScreenClass => "screen_class",
            Field::UtmSource => "utm_source",
            Field::UtmMedium => "utm_medium",
            Field::UtmCampaign => "utm_campaign",
            Field::UtmContent => "utm_content",
            Field::UtmTerm => "utm_term",
        }
    }

    /// The value of this column on `hit`; absent optional values read as empty.
    pub fn value_of(self, hit: &Hit) -> &str {
        match self {
            Field::Path => &hit.path,
            Field::Language => &hit.language,
            Field::CountryCode => &hit.country_code,
            Field::Referrer => hit.referrer.as_deref().unwrap_or(""),
            Field::Os => &hit.os,
            Field::OsVersion => &hit.os_version,
            Field::Browser => &hit.browser,
            Field::BrowserVersion => &hit.browser_version,
            Field::ScreenClass => &hit.screen_class,
            Field::UtmSource => hit.utm_source.as_deref().unwrap_or(""),
            Field::UtmMedium => hit.utm_medium.as_deref().unwrap_or(""),
            Field::UtmCampaign => hit.utm_campaign.as_deref().unwrap_or(""),
            Field::UtmContent => hit.utm_content.as_deref().unwrap_or(""),
            Field::UtmTerm => hit.utm_term.as_deref().unwrap_or(""),
        }
    }
}

/// Validated predicates applied to raw hits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicates {
    /// Lower time bound (inclusive).
    pub since: Option<DateTime<Utc>>,
    /// Equality predicates, all of which must hold.
    pub fields: Vec<(Field, String)>,
    pub platform: Option<Platform>,
}

impl Predicates {
    pub fn for_path(path: Option<&str>) -> Self {
        Self {
            fields: path
                .map(|p| vec![(Field::Path, p.to_string())])
                .unwrap_or_default(),
            ..Default::default()
        }
    }

    pub fn path(&self) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| *field == Field::Path)
            .map(|(_, value)| value.as_str())
    }

    pub fn matches(&self, hit: &Hit) -> bool {
        if self.since.is_some_and(|since| hit.time < since) {
            return false;
        }
        if self.platform.is_some_and(|p| hit.platform() != p) {
            return false;
        }
        self.fields
            .iter()
            .all(|(field, value)| field.value_of(hit) == value)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("date")
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 30, 15).single().expect("time")
    }

    #[test]
    fn validate_truncates_and_swaps() {
        let today = day(2024, 6, 10);
        let mut filter = Filter {
            from: Some(at(2024, 6, 5, 13)),
            to: Some(at(2024, 6, 1, 8)),
            start: Some(at(2024, 6, 2, 4) + chrono::Duration::milliseconds(250)),
            limit: -5,
            ..Default::default()
        };
        filter.validate_with_today(today);

        assert_eq!(filter.from_day(), Some(day(2024, 6, 1)));
        assert_eq!(filter.to_day(), Some(day(2024, 6, 5)));
        assert_eq!(filter.from.map(|t| t.hour()), Some(0));
        assert_eq!(filter.start, Some(at(2024, 6, 2, 4)));
        assert_eq!(filter.limit, 0);
    }

    #[test]
    fn validate_clamps_to_today() {
        let today = day(2024, 6, 10);
        let mut filter = Filter {
            from: Some(at(2024, 6, 20, 0)),
            to: Some(at(2024, 7, 1, 0)),
            ..Default::default()
        };
        filter.validate_with_today(today);
        assert_eq!(filter.from_day(), Some(today));
        assert_eq!(filter.to_day(), Some(today));
    }

    #[test]
    fn validate_is_idempotent() {
        let today = day(2024, 6, 10);
        let mut filter = Filter {
            from: Some(at(2024, 6, 12, 9)),
            to: Some(at(2024, 5, 1, 22)),
            day: Some(at(2024, 5, 3, 3)),
            path: Some("  ".into()),
            browser: Some("Firefox".into()),
            limit: -1,
            ..Default::default()
        };
        filter.validate_with_today(today);
        let once = filter.clone();
        filter.validate_with_today(today);
        assert_eq!(filter, once);
        assert!(filter.from <= filter.to);
        assert_eq!(filter.path, None);
        assert_eq!(filter.browser.as_deref(), Some("Firefox"));
    }

    #[test]
    fn platform_parses() {
        assert_eq!("desktop".parse::<Platform>(), Ok(Platform::Desktop));
        assert_eq!(" Mobile ".parse::<Platform>(), Ok(Platform::Mobile));
        assert_eq!("unknown".parse::<Platform>(), Ok(Platform::Unknown));
        assert!("tablet".parse::<Platform>().is_err());
        assert_eq!(Platform::of(false, false), Platform::Unknown);
    }

    #[test]
    fn query_collects_predicates() {
        let filter = Filter {
            path: Some("/blog".into()),
            language: Some("en".into()),
            utm_source: Some("newsletter".into()),
            platform: Some(Platform::Mobile),
            ..Default::default()
        };
        let predicates = filter.query();
        assert_eq!(predicates.path(), Some("/blog"));
        assert_eq!(predicates.fields.len(), 3);

        let mut hit = Hit {
            path: "/blog".into(),
            language: "en".into(),
            utm_source: Some("newsletter".into()),
            mobile: true,
            ..Default::default()
        };
        assert!(predicates.matches(&hit));
        hit.mobile = false;
        assert!(!predicates.matches(&hit));
    }
}
