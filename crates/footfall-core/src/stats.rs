//! Rollup rows and query result shapes.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::hit::Hit;

/// Daily visitor rollup. `path == None` is the site-wide row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorStats {
    pub tenant_id: Option<i64>,
    pub day: NaiveDate,
    pub path: Option<String>,
    pub visitors: i64,
    pub sessions: i64,
    pub bounces: i64,
    pub platform_desktop: i64,
    pub platform_mobile: i64,
    pub platform_unknown: i64,
}

/// Hourly visitor rollup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorTimeStats {
    pub tenant_id: Option<i64>,
    pub day: NaiveDate,
    pub path: Option<String>,
    pub hour: u32,
    pub visitors: i64,
    pub sessions: i64,
}

/// A ranked attribute of hits.
///
/// Every dimension but [`Dimension::Path`] has its own rollup table. Path ranks
/// are read from the per-path [`VisitorStats`] rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Path,
    Language,
    Referrer,
    Os,
    Browser,
    Country,
    Screen,
}

impl Dimension {
    /// Dimensions rolled up into their own table.
    pub const ALL: [Dimension; 6] = [
        Dimension::Language,
        Dimension::Referrer,
        Dimension::Os,
        Dimension::Browser,
        Dimension::Country,
        Dimension::Screen,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::Path => "path",
            Dimension::Language => "language",
            Dimension::Referrer => "referrer",
            Dimension::Os => "os",
            Dimension::Browser => "browser",
            Dimension::Country => "country",
            Dimension::Screen => "screen",
        }
    }

    /// Rollup table holding this dimension.
    pub fn table(self) -> &'static str {
        match self {
            Dimension::Path => "visitor_stats",
            Dimension::Language => "language_stats",
            Dimension::Referrer => "referrer_stats",
            Dimension::Os => "os_stats",
            Dimension::Browser => "browser_stats",
            Dimension::Country => "country_stats",
            Dimension::Screen => "screen_stats",
        }
    }

    /// Ranking key and display label of `hit` for this dimension.
    ///
    /// Referrers are labelled with their registrable domain, screens with their
    /// screen class.
    pub fn value_of(self, hit: &Hit) -> (String, Option<String>) {
        match self {
            Dimension::Path => (hit.path.clone(), None),
            Dimension::Language => (hit.language.clone(), None),
            Dimension::Referrer => (
                hit.referrer.clone().unwrap_or_default(),
                hit.referrer_name.clone(),
            ),
            Dimension::Os => (hit.os.clone(), None),
            Dimension::Browser => (hit.browser.clone(), None),
            Dimension::Country => (hit.country_code.clone(), None),
            Dimension::Screen => {
                let class = (!hit.screen_class.is_empty()).then(|| hit.screen_class.clone());
                (hit.screen_size(), class)
            }
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        std::iter::once(Dimension::Path)
            .chain(Dimension::ALL)
            .find(|d| d.as_str() == s)
            .ok_or_else(|| {
                format!("dimension must be one of: path, language, referrer, os, browser, country, screen (got {s:?})")
            })
    }
}

/// Daily dimension rollup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionRollup {
    pub tenant_id: Option<i64>,
    pub day: NaiveDate,
    pub path: Option<String>,
    pub dimension: Dimension,
    pub value: String,
    pub label: Option<String>,
    pub visitors: i64,
}

/// Distinct visitor count for one dimension value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionCount {
    pub value: String,
    pub label: Option<String>,
    pub visitors: i64,
}

/// Live counts for one day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorCounts {
    pub visitors: i64,
    pub sessions: i64,
    /// Visitors whose hits that day cover a single distinct path. Counted per
    /// visitor and day rather than per session, so a visitor with two
    /// one-page sessions on the same page is one bounce.
    pub bounces: i64,
}

/// Every rollup row computed for one closed day of one tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DayRollup {
    pub visitor_stats: Vec<VisitorStats>,
    pub time_stats: Vec<VisitorTimeStats>,
    pub dimension_stats: Vec<DimensionRollup>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformCounts {
    pub desktop: i64,
    pub mobile: i64,
    pub unknown: i64,
}

impl PlatformCounts {
    pub fn add(&mut self, other: PlatformCounts) {
        self.desktop += other.desktop;
        self.mobile += other.mobile;
        self.unknown += other.unknown;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayStats {
    pub day: NaiveDate,
    pub visitors: i64,
    pub sessions: i64,
    pub bounces: i64,
    pub bounce_rate: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourStats {
    pub hour: u32,
    pub visitors: i64,
    pub sessions: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionStats {
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub visitors: i64,
    pub relative_visitors: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformStats {
    pub desktop: i64,
    pub mobile: i64,
    pub unknown: i64,
    pub relative_desktop: f64,
    pub relative_mobile: f64,
    pub relative_unknown: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathVisitors {
    pub path: String,
    pub stats: Vec<DayStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeOfDayVisitors {
    pub day: NaiveDate,
    pub stats: Vec<HourStats>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathCount {
    pub path: String,
    pub visitors: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveVisitors {
    pub visitors: i64,
    pub pages: Vec<PathCount>,
}
