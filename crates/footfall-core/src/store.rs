//! Storage abstraction.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::error::StoreError;
use crate::filter::Predicates;
use crate::hit::Hit;
use crate::stats::{
    DayRollup, Dimension, DimensionCount, DimensionRollup, HourStats, PathCount, PlatformCounts,
    VisitorCounts, VisitorStats, VisitorTimeStats,
};

/// Tenant and time zone every store call is scoped to.
///
/// `tenant_id == None` selects the untenanted rows, not all tenants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryParams {
    pub tenant_id: Option<i64>,
    pub timezone: Tz,
}

impl QueryParams {
    pub fn new(tenant_id: Option<i64>, timezone: Tz) -> Self {
        Self {
            tenant_id,
            timezone,
        }
    }

    pub fn utc(tenant_id: Option<i64>) -> Self {
        Self::new(tenant_id, Tz::UTC)
    }

    pub fn today(&self) -> NaiveDate {
        self.local_day(Utc::now())
    }

    pub fn local_day(&self, t: DateTime<Utc>) -> NaiveDate {
        t.with_timezone(&self.timezone).date_naive()
    }

    pub fn local_hour(&self, t: DateTime<Utc>) -> u32 {
        t.with_timezone(&self.timezone).hour()
    }

    /// Instant at which `day` starts in this time zone.
    pub fn day_start(&self, day: NaiveDate) -> DateTime<Utc> {
        let naive = day.and_time(NaiveTime::MIN);
        match self.timezone.from_local_datetime(&naive).earliest() {
            Some(t) => t.with_timezone(&Utc),
            // Midnight falls into a DST gap.
            None => naive.and_utc(),
        }
    }

    /// Half-open `[start, end)` bounds of `day`.
    pub fn day_bounds(&self, day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let next = day.succ_opt().unwrap_or(day);
        (self.day_start(day), self.day_start(next))
    }

    pub fn matches_tenant(&self, tenant_id: Option<i64>) -> bool {
        self.tenant_id == tenant_id
    }
}

/// Inclusive range of days. An absent `from` leaves the range open at the start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRange {
    pub from: Option<NaiveDate>,
    pub to: NaiveDate,
}

impl DayRange {
    pub fn new(from: Option<NaiveDate>, to: NaiveDate) -> Self {
        Self { from, to }
    }

    pub fn day(day: NaiveDate) -> Self {
        Self::new(Some(day), day)
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.from.map_or(true, |from| day >= from) && day <= self.to
    }

    pub fn is_empty(&self) -> bool {
        self.from.is_some_and(|from| from > self.to)
    }
}

/// Persistence for raw hits and rollups.
///
/// Visitor counts are distinct over the fingerprint, session counts distinct over
/// (fingerprint, session start). A bounce is a visitor with exactly one distinct
/// path on that day, not a one-page session. Live `count_*` methods read raw hits
/// for one local day and apply every predicate; historical methods read rollups
/// filtered by path only, `None` selecting the site-wide rows.
/// [`Dimension::Path`] ranks come from the per-path visitor rows.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn save_hits(&self, hits: &[Hit]) -> Result<(), StoreError>;

    async fn delete_hits_by_day(&self, params: &QueryParams, day: NaiveDate)
        -> Result<(), StoreError>;

    /// Merge-on-write: counters of an existing key are incremented.
    async fn save_visitor_stats(&self, stats: &[VisitorStats]) -> Result<(), StoreError>;

    async fn save_visitor_time_stats(&self, stats: &[VisitorTimeStats]) -> Result<(), StoreError>;

    async fn save_dimension_stats(&self, stats: &[DimensionRollup]) -> Result<(), StoreError>;

    /// Raw hits of one local day.
    async fn count_hits(&self, params: &QueryParams, day: NaiveDate) -> Result<i64, StoreError>;

    /// Merge-save `rollup` and delete the raw hits of `day` as one unit.
    ///
    /// Applied only while the day still holds exactly `expected_hits` raw hits;
    /// otherwise nothing changes and [`StoreError::Conflict`] is returned. On any
    /// error the day is left in raw form with no rollup rows added.
    async fn commit_day(
        &self,
        params: &QueryParams,
        day: NaiveDate,
        rollup: &DayRollup,
        expected_hits: i64,
    ) -> Result<(), StoreError>;

    /// Latest session start of `fingerprint` among hits at or after `since`.
    async fn session(
        &self,
        params: &QueryParams,
        fingerprint: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Every tenant that has raw hits.
    async fn tenants(&self) -> Result<Vec<Option<i64>>, StoreError>;

    /// Days before today with raw hits, ascending.
    async fn hit_days(&self, params: &QueryParams) -> Result<Vec<NaiveDate>, StoreError>;

    async fn hit_paths(&self, params: &QueryParams, day: NaiveDate)
        -> Result<Vec<String>, StoreError>;

    /// Paths seen in rollups or raw hits within `range`, sorted.
    async fn paths(&self, params: &QueryParams, range: DayRange)
        -> Result<Vec<String>, StoreError>;

    async fn count_visitors(
        &self,
        params: &QueryParams,
        day: NaiveDate,
        predicates: &Predicates,
    ) -> Result<VisitorCounts, StoreError>;

    /// Non-empty local hours of `day`, ascending.
    async fn count_visitors_by_hour(
        &self,
        params: &QueryParams,
        day: NaiveDate,
        predicates: &Predicates,
    ) -> Result<Vec<HourStats>, StoreError>;

    async fn count_visitors_by_dimension(
        &self,
        params: &QueryParams,
        day: NaiveDate,
        dimension: Dimension,
        predicates: &Predicates,
    ) -> Result<Vec<DimensionCount>, StoreError>;

    async fn count_visitors_by_platform(
        &self,
        params: &QueryParams,
        day: NaiveDate,
        predicates: &Predicates,
    ) -> Result<PlatformCounts, StoreError>;

    /// Daily rollup rows in `range`, ascending by day.
    async fn visitors(
        &self,
        params: &QueryParams,
        range: DayRange,
        path: Option<&str>,
    ) -> Result<Vec<VisitorStats>, StoreError>;

    /// Hourly rollups in `range` summed per hour.
    async fn visitor_hours(
        &self,
        params: &QueryParams,
        range: DayRange,
        path: Option<&str>,
    ) -> Result<Vec<HourStats>, StoreError>;

    /// Dimension rollups in `range` summed per value.
    async fn dimension_visitors(
        &self,
        params: &QueryParams,
        dimension: Dimension,
        range: DayRange,
        path: Option<&str>,
    ) -> Result<Vec<DimensionCount>, StoreError>;

    async fn platform_visitors(
        &self,
        params: &QueryParams,
        range: DayRange,
        path: Option<&str>,
    ) -> Result<PlatformCounts, StoreError>;

    async fn active_visitors(
        &self,
        params: &QueryParams,
        since: DateTime<Utc>,
        predicates: &Predicates,
    ) -> Result<i64, StoreError>;

    /// Distinct visitors per path since `since`, by visitors desc then path asc.
    async fn active_page_visitors(
        &self,
        params: &QueryParams,
        since: DateTime<Utc>,
        predicates: &Predicates,
    ) -> Result<Vec<PathCount>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_bounds_follow_timezone() {
        let params = QueryParams::new(None, chrono_tz::Europe::Berlin);
        let day = NaiveDate::from_ymd_opt(2024, 1, 15).expect("date");
        let (start, end) = params.day_bounds(day);
        assert_eq!(start.to_rfc3339(), "2024-01-14T23:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2024-01-15T23:00:00+00:00");
    }

    #[test]
    fn day_range_contains() {
        let d = |n| NaiveDate::from_ymd_opt(2024, 3, n).expect("date");
        let range = DayRange::new(Some(d(2)), d(4));
        assert!(range.contains(d(2)));
        assert!(range.contains(d(4)));
        assert!(!range.contains(d(5)));
        assert!(DayRange::new(None, d(4)).contains(d(1)));
        assert!(DayRange::new(Some(d(5)), d(4)).is_empty());
    }
}
