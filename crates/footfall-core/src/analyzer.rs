//! Statistics over rollups merged with today's raw hits.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::error::StoreError;
use crate::filter::{Filter, Predicates};
use crate::stats::{
    ActiveVisitors, DayStats, Dimension, DimensionCount, DimensionStats, HourStats, PathVisitors,
    PlatformCounts, PlatformStats, TimeOfDayVisitors, VisitorCounts,
};
use crate::store::{DayRange, QueryParams, Store};

/// Days covered by `time_of_day` when the filter has no lower bound.
const TIME_OF_DAY_DEFAULT_DAYS: i64 = 7;

/// Answers statistical queries against a [`Store`].
///
/// Closed days are read from rollups. When the requested range reaches today,
/// today's numbers are counted from raw hits and merged in.
#[derive(Clone)]
pub struct Analyzer {
    store: Arc<dyn Store>,
    timezone: Tz,
}

#[derive(Debug, Clone)]
struct Scope {
    params: QueryParams,
    filter: Filter,
    predicates: Predicates,
    range: DayRange,
    today: NaiveDate,
}

impl Scope {
    fn includes_today(&self) -> bool {
        self.range.contains(self.today)
    }

    fn path(&self) -> Option<&str> {
        self.filter.path.as_deref()
    }

    /// The part of the range served from rollups.
    fn historical(&self) -> Option<DayRange> {
        let mut range = self.range;
        if self.includes_today() {
            range.to = self.today.pred_opt()?;
        }
        (!range.is_empty()).then_some(range)
    }

    fn with_path(&self, path: String) -> Self {
        let mut scope = self.clone();
        scope.filter.path = Some(path);
        scope.predicates = scope.filter.query();
        scope
    }

    fn with_day(&self, day: NaiveDate) -> Self {
        let mut scope = self.clone();
        scope.range = DayRange::day(day);
        scope
    }
}

impl Analyzer {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_timezone(store, Tz::UTC)
    }

    pub fn with_timezone(store: Arc<dyn Store>, timezone: Tz) -> Self {
        Self { store, timezone }
    }

    fn scope(&self, filter: Option<&Filter>) -> Scope {
        let today = Utc::now().with_timezone(&self.timezone).date_naive();
        let mut filter = filter.cloned().unwrap_or_default();
        filter.validate_with_today(today);

        let range = match filter.day() {
            Some(day) => DayRange::day(day),
            None => DayRange::new(filter.from_day(), filter.to_day().unwrap_or(today)),
        };

        Scope {
            params: QueryParams::new(filter.tenant_id, self.timezone),
            predicates: filter.query(),
            filter,
            range,
            today,
        }
    }

    /// Visitors, sessions and bounces per day.
    pub async fn visitors(&self, filter: Option<&Filter>) -> Result<Vec<DayStats>, StoreError> {
        let scope = self.scope(filter);
        self.day_series(&scope).await
    }

    /// Daily visitors per page. Without a path filter every page seen in the
    /// range is reported.
    pub async fn page_visitors(
        &self,
        filter: Option<&Filter>,
    ) -> Result<Vec<PathVisitors>, StoreError> {
        let scope = self.scope(filter);
        let paths = match scope.path() {
            Some(path) => vec![path.to_string()],
            None => self.store.paths(&scope.params, scope.range).await?,
        };

        let mut result = Vec::with_capacity(paths.len());
        for path in paths {
            let stats = self.day_series(&scope.with_path(path.clone())).await?;
            result.push(PathVisitors { path, stats });
        }
        Ok(result)
    }

    /// Visitors per hour of day over the whole range, 24 buckets.
    pub async fn visitor_hours(
        &self,
        filter: Option<&Filter>,
    ) -> Result<Vec<HourStats>, StoreError> {
        let scope = self.scope(filter);
        self.hour_series(&scope).await
    }

    /// The hourly distribution of every day in the range.
    pub async fn time_of_day(
        &self,
        filter: Option<&Filter>,
    ) -> Result<Vec<TimeOfDayVisitors>, StoreError> {
        let scope = self.scope(filter);
        let to = scope.range.to;
        let from = scope
            .range
            .from
            .unwrap_or_else(|| to - Duration::days(TIME_OF_DAY_DEFAULT_DAYS - 1));

        let mut result = Vec::new();
        for day in from.iter_days().take_while(|d| *d <= to) {
            let stats = self.hour_series(&scope.with_day(day)).await?;
            result.push(TimeOfDayVisitors { day, stats });
        }
        Ok(result)
    }

    /// Pages ranked by visitors.
    pub async fn pages(&self, filter: Option<&Filter>) -> Result<Vec<DimensionStats>, StoreError> {
        self.dimension(Dimension::Path, filter).await
    }

    pub async fn languages(
        &self,
        filter: Option<&Filter>,
    ) -> Result<Vec<DimensionStats>, StoreError> {
        self.dimension(Dimension::Language, filter).await
    }

    pub async fn referrers(
        &self,
        filter: Option<&Filter>,
    ) -> Result<Vec<DimensionStats>, StoreError> {
        self.dimension(Dimension::Referrer, filter).await
    }

    pub async fn os(&self, filter: Option<&Filter>) -> Result<Vec<DimensionStats>, StoreError> {
        self.dimension(Dimension::Os, filter).await
    }

    pub async fn browsers(
        &self,
        filter: Option<&Filter>,
    ) -> Result<Vec<DimensionStats>, StoreError> {
        self.dimension(Dimension::Browser, filter).await
    }

    pub async fn countries(
        &self,
        filter: Option<&Filter>,
    ) -> Result<Vec<DimensionStats>, StoreError> {
        self.dimension(Dimension::Country, filter).await
    }

    pub async fn screens(
        &self,
        filter: Option<&Filter>,
    ) -> Result<Vec<DimensionStats>, StoreError> {
        self.dimension(Dimension::Screen, filter).await
    }

    /// Ranked visitors per value of `dimension`, with relative shares.
    ///
    /// Rows are ordered by visitors descending, then value ascending. The limit is
    /// applied before shares are computed, so shares always sum to one.
    pub async fn dimension(
        &self,
        dimension: Dimension,
        filter: Option<&Filter>,
    ) -> Result<Vec<DimensionStats>, StoreError> {
        let scope = self.scope(filter);
        let mut merged: HashMap<String, DimensionCount> = HashMap::new();

        if let Some(range) = scope.historical() {
            let rows = self
                .store
                .dimension_visitors(&scope.params, dimension, range, scope.path())
                .await?;
            merge_counts(&mut merged, rows);
        }

        if scope.includes_today() {
            let rows = self
                .store
                .count_visitors_by_dimension(
                    &scope.params,
                    scope.today,
                    dimension,
                    &scope.predicates,
                )
                .await?;
            merge_counts(&mut merged, rows);
        }

        let mut rows: Vec<DimensionCount> = merged.into_values().collect();
        rows.sort_by(|a, b| {
            b.visitors
                .cmp(&a.visitors)
                .then_with(|| a.value.cmp(&b.value))
        });
        if scope.filter.limit > 0 {
            rows.truncate(scope.filter.limit as usize);
        }

        let total: i64 = rows.iter().map(|r| r.visitors).sum();
        Ok(rows
            .into_iter()
            .map(|r| DimensionStats {
                relative_visitors: share(r.visitors, total),
                value: r.value,
                label: r.label,
                visitors: r.visitors,
            })
            .collect())
    }

    /// Visitors per platform with relative shares.
    pub async fn platforms(&self, filter: Option<&Filter>) -> Result<PlatformStats, StoreError> {
        let scope = self.scope(filter);
        let mut counts = PlatformCounts::default();

        if let Some(range) = scope.historical() {
            counts.add(
                self.store
                    .platform_visitors(&scope.params, range, scope.path())
                    .await?,
            );
        }
        if scope.includes_today() {
            counts.add(
                self.store
                    .count_visitors_by_platform(&scope.params, scope.today, &scope.predicates)
                    .await?,
            );
        }

        let total = counts.desktop + counts.mobile + counts.unknown;
        Ok(PlatformStats {
            desktop: counts.desktop,
            mobile: counts.mobile,
            unknown: counts.unknown,
            relative_desktop: share(counts.desktop, total),
            relative_mobile: share(counts.mobile, total),
            relative_unknown: share(counts.unknown, total),
        })
    }

    /// Distinct visitors within the last `duration`, overall and per page.
    pub async fn active_visitors(
        &self,
        filter: Option<&Filter>,
        duration: Duration,
    ) -> Result<ActiveVisitors, StoreError> {
        let scope = self.scope(filter);
        // Windows reaching past the epoch count everything.
        let epoch = DateTime::<Utc>::default();
        let since = Utc::now()
            .checked_sub_signed(duration)
            .filter(|since| *since > epoch)
            .unwrap_or(epoch);
        let visitors = self
            .store
            .active_visitors(&scope.params, since, &scope.predicates)
            .await?;
        let pages = self
            .store
            .active_page_visitors(&scope.params, since, &scope.predicates)
            .await?;
        Ok(ActiveVisitors { visitors, pages })
    }

    async fn day_series(&self, scope: &Scope) -> Result<Vec<DayStats>, StoreError> {
        let mut days: BTreeMap<NaiveDate, VisitorCounts> = BTreeMap::new();

        if let Some(range) = scope.historical() {
            for row in self
                .store
                .visitors(&scope.params, range, scope.path())
                .await?
            {
                let entry = days.entry(row.day).or_default();
                entry.visitors += row.visitors;
                entry.sessions += row.sessions;
                entry.bounces += row.bounces;
            }
        }

        if scope.includes_today() {
            let live = self
                .store
                .count_visitors(&scope.params, scope.today, &scope.predicates)
                .await?;
            let entry = days.entry(scope.today).or_default();
            entry.visitors += live.visitors;
            entry.sessions += live.sessions;
            entry.bounces += live.bounces;
        }

        let to = scope.range.to;
        let first = scope
            .range
            .from
            .or_else(|| days.keys().next().copied())
            .unwrap_or(to);

        Ok(first
            .iter_days()
            .take_while(|d| *d <= to)
            .map(|day| {
                let counts = days.get(&day).copied().unwrap_or_default();
                DayStats {
                    day,
                    visitors: counts.visitors,
                    sessions: counts.sessions,
                    bounces: counts.bounces,
                    bounce_rate: bounce_rate(counts.bounces, counts.visitors),
                }
            })
            .collect())
    }

    async fn hour_series(&self, scope: &Scope) -> Result<Vec<HourStats>, StoreError> {
        let mut hours: Vec<HourStats> = (0..24)
            .map(|hour| HourStats {
                hour,
                ..Default::default()
            })
            .collect();

        let mut add = |rows: Vec<HourStats>| {
            for row in rows {
                if let Some(bucket) = hours.get_mut(row.hour as usize) {
                    bucket.visitors += row.visitors;
                    bucket.sessions += row.sessions;
                }
            }
        };

        if let Some(range) = scope.historical() {
            add(self
                .store
                .visitor_hours(&scope.params, range, scope.path())
                .await?);
        }
        if scope.includes_today() {
            add(self
                .store
                .count_visitors_by_hour(&scope.params, scope.today, &scope.predicates)
                .await?);
        }

        Ok(hours)
    }
}

fn merge_counts(into: &mut HashMap<String, DimensionCount>, rows: Vec<DimensionCount>) {
    for row in rows {
        match into.get_mut(&row.value) {
            Some(existing) => {
                existing.visitors += row.visitors;
                if existing.label.is_none() {
                    existing.label = row.label;
                }
            }
            None => {
                into.insert(row.value.clone(), row);
            }
        }
    }
}

/// `part / total`, or zero when there is nothing to divide.
fn share(part: i64, total: i64) -> f64 {
    if total <= 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

fn bounce_rate(bounces: i64, visitors: i64) -> f64 {
    share(bounces, visitors).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_of_empty_total_is_zero() {
        assert_eq!(share(0, 0), 0.0);
        assert_eq!(share(3, 4), 0.75);
    }

    #[test]
    fn bounce_rate_is_bounded() {
        assert_eq!(bounce_rate(0, 0), 0.0);
        assert_eq!(bounce_rate(5, 3), 1.0);
        assert_eq!(bounce_rate(1, 4), 0.25);
    }

    #[test]
    fn merge_counts_adds_and_appends() {
        let mut merged = HashMap::new();
        merge_counts(
            &mut merged,
            vec![DimensionCount {
                value: "en".into(),
                label: None,
                visitors: 10,
            }],
        );
        merge_counts(
            &mut merged,
            vec![
                DimensionCount {
                    value: "en".into(),
                    label: None,
                    visitors: 3,
                },
                DimensionCount {
                    value: "de".into(),
                    label: None,
                    visitors: 2,
                },
            ],
        );
        assert_eq!(merged["en"].visitors, 13);
        assert_eq!(merged["de"].visitors, 2);
    }
}
