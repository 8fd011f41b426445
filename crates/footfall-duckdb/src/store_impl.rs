use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use footfall_core::stats::{
    DayRollup, Dimension, DimensionCount, DimensionRollup, HourStats, PathCount, PlatformCounts,
    VisitorCounts, VisitorStats, VisitorTimeStats,
};
use footfall_core::{DayRange, Hit, Predicates, QueryParams, Store, StoreError};

use crate::DuckDbStore;

#[async_trait]
impl Store for DuckDbStore {
    async fn save_hits(&self, hits: &[Hit]) -> Result<(), StoreError> {
        Ok(self.insert_hits(hits).await?)
    }

    async fn delete_hits_by_day(
        &self,
        params: &QueryParams,
        day: NaiveDate,
    ) -> Result<(), StoreError> {
        Ok(DuckDbStore::delete_hits_by_day(self, params, day).await?)
    }

    async fn save_visitor_stats(&self, stats: &[VisitorStats]) -> Result<(), StoreError> {
        Ok(DuckDbStore::save_visitor_stats(self, stats).await?)
    }

    async fn save_visitor_time_stats(&self, stats: &[VisitorTimeStats]) -> Result<(), StoreError> {
        Ok(DuckDbStore::save_visitor_time_stats(self, stats).await?)
    }

    async fn save_dimension_stats(&self, stats: &[DimensionRollup]) -> Result<(), StoreError> {
        Ok(DuckDbStore::save_dimension_stats(self, stats).await?)
    }

    async fn count_hits(&self, params: &QueryParams, day: NaiveDate) -> Result<i64, StoreError> {
        Ok(DuckDbStore::count_hits(self, params, day).await?)
    }

    async fn commit_day(
        &self,
        params: &QueryParams,
        day: NaiveDate,
        rollup: &DayRollup,
        expected_hits: i64,
    ) -> Result<(), StoreError> {
        if DuckDbStore::commit_day(self, params, day, rollup, expected_hits).await? {
            Ok(())
        } else {
            Err(StoreError::Conflict(format!(
                "raw hits of {day} changed, expected {expected_hits}"
            )))
        }
    }

    async fn session(
        &self,
        params: &QueryParams,
        fingerprint: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(DuckDbStore::session(self, params, fingerprint, since).await?)
    }

    async fn tenants(&self) -> Result<Vec<Option<i64>>, StoreError> {
        Ok(DuckDbStore::tenants(self).await?)
    }

    async fn hit_days(&self, params: &QueryParams) -> Result<Vec<NaiveDate>, StoreError> {
        Ok(DuckDbStore::hit_days(self, params).await?)
    }

    async fn hit_paths(
        &self,
        params: &QueryParams,
        day: NaiveDate,
    ) -> Result<Vec<String>, StoreError> {
        Ok(DuckDbStore::hit_paths(self, params, day).await?)
    }

    async fn paths(&self, params: &QueryParams, range: DayRange) -> Result<Vec<String>, StoreError> {
        Ok(DuckDbStore::paths(self, params, range).await?)
    }

    async fn count_visitors(
        &self,
        params: &QueryParams,
        day: NaiveDate,
        predicates: &Predicates,
    ) -> Result<VisitorCounts, StoreError> {
        Ok(DuckDbStore::count_visitors(self, params, day, predicates).await?)
    }

    async fn count_visitors_by_hour(
        &self,
        params: &QueryParams,
        day: NaiveDate,
        predicates: &Predicates,
    ) -> Result<Vec<HourStats>, StoreError> {
        Ok(DuckDbStore::count_visitors_by_hour(self, params, day, predicates).await?)
    }

    async fn count_visitors_by_dimension(
        &self,
        params: &QueryParams,
        day: NaiveDate,
        dimension: Dimension,
        predicates: &Predicates,
    ) -> Result<Vec<DimensionCount>, StoreError> {
        Ok(DuckDbStore::count_visitors_by_dimension(self, params, day, dimension, predicates).await?)
    }

    async fn count_visitors_by_platform(
        &self,
        params: &QueryParams,
        day: NaiveDate,
        predicates: &Predicates,
    ) -> Result<PlatformCounts, StoreError> {
        Ok(DuckDbStore::count_visitors_by_platform(self, params, day, predicates).await?)
    }

    async fn visitors(
        &self,
        params: &QueryParams,
        range: DayRange,
        path: Option<&str>,
    ) -> Result<Vec<VisitorStats>, StoreError> {
        Ok(DuckDbStore::visitors(self, params, range, path).await?)
    }

    async fn visitor_hours(
        &self,
        params: &QueryParams,
        range: DayRange,
        path: Option<&str>,
    ) -> Result<Vec<HourStats>, StoreError> {
        Ok(DuckDbStore::visitor_hours(self, params, range, path).await?)
    }

    async fn dimension_visitors(
        &self,
        params: &QueryParams,
        dimension: Dimension,
        range: DayRange,
        path: Option<&str>,
    ) -> Result<Vec<DimensionCount>, StoreError> {
        Ok(DuckDbStore::dimension_visitors(self, params, dimension, range, path).await?)
    }

    async fn platform_visitors(
        &self,
        params: &QueryParams,
        range: DayRange,
        path: Option<&str>,
    ) -> Result<PlatformCounts, StoreError> {
        Ok(DuckDbStore::platform_visitors(self, params, range, path).await?)
    }

    async fn active_visitors(
        &self,
        params: &QueryParams,
        since: DateTime<Utc>,
        predicates: &Predicates,
    ) -> Result<i64, StoreError> {
        Ok(DuckDbStore::active_visitors(self, params, since, predicates).await?)
    }

    async fn active_page_visitors(
        &self,
        params: &QueryParams,
        since: DateTime<Utc>,
        predicates: &Predicates,
    ) -> Result<Vec<PathCount>, StoreError> {
        Ok(DuckDbStore::active_page_visitors(self, params, since, predicates).await?)
    }
}
