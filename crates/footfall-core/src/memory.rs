//! In-process [`Store`] used by tests and embedders without a database.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::StoreError;
use crate::filter::{Platform, Predicates};
use crate::hit::Hit;
use crate::stats::{
    DayRollup, Dimension, DimensionCount, DimensionRollup, HourStats, PathCount,
    PlatformCounts, VisitorCounts, VisitorStats, VisitorTimeStats,
};
use crate::store::{DayRange, QueryParams, Store};

#[derive(Default)]
struct Tables {
    hits: Vec<Hit>,
    visitor_stats: Vec<VisitorStats>,
    visitor_time_stats: Vec<VisitorTimeStats>,
    dimension_stats: Vec<DimensionRollup>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with a backend error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn hits(&self) -> Vec<Hit> {
        self.lock().hits.clone()
    }

    pub fn visitor_stats(&self) -> Vec<VisitorStats> {
        self.lock().visitor_stats.clone()
    }

    pub fn visitor_time_stats(&self) -> Vec<VisitorTimeStats> {
        self.lock().visitor_time_stats.clone()
    }

    pub fn dimension_stats(&self) -> Vec<DimensionRollup> {
        self.lock().dimension_stats.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow!("memory store is failing")));
        }
        Ok(())
    }
}

impl Tables {
    fn merge_visitor_stats(&mut self, stats: &[VisitorStats]) {
        for row in stats {
            match self.visitor_stats.iter_mut().find(|s| {
                s.tenant_id == row.tenant_id && s.day == row.day && s.path == row.path
            }) {
                Some(existing) => {
                    existing.visitors += row.visitors;
                    existing.sessions += row.sessions;
                    existing.bounces += row.bounces;
                    existing.platform_desktop += row.platform_desktop;
                    existing.platform_mobile += row.platform_mobile;
                    existing.platform_unknown += row.platform_unknown;
                }
                None => self.visitor_stats.push(row.clone()),
            }
        }
    }

    fn merge_visitor_time_stats(&mut self, stats: &[VisitorTimeStats]) {
        for row in stats {
            match self.visitor_time_stats.iter_mut().find(|s| {
                s.tenant_id == row.tenant_id
                    && s.day == row.day
                    && s.path == row.path
                    && s.hour == row.hour
            }) {
                Some(existing) => {
                    existing.visitors += row.visitors;
                    existing.sessions += row.sessions;
                }
                None => self.visitor_time_stats.push(row.clone()),
            }
        }
    }

    fn merge_dimension_stats(&mut self, stats: &[DimensionRollup]) {
        for row in stats {
            match self.dimension_stats.iter_mut().find(|s| {
                s.tenant_id == row.tenant_id
                    && s.day == row.day
                    && s.path == row.path
                    && s.dimension == row.dimension
                    && s.value == row.value
            }) {
                Some(existing) => {
                    existing.visitors += row.visitors;
                    if row.label.is_some() {
                        existing.label = row.label.clone();
                    }
                }
                None => self.dimension_stats.push(row.clone()),
            }
        }
    }
}

fn day_hits<'a>(
    hits: &'a [Hit],
    params: &QueryParams,
    day: NaiveDate,
    predicates: &Predicates,
) -> Vec<&'a Hit> {
    let (start, end) = params.day_bounds(day);
    hits.iter()
        .filter(|h| params.matches_tenant(h.tenant_id))
        .filter(|h| h.time >= start && h.time < end)
        .filter(|h| predicates.matches(h))
        .collect()
}

fn distinct_visitors(hits: &[&Hit]) -> i64 {
    hits.iter()
        .map(|h| h.fingerprint.as_str())
        .collect::<HashSet<_>>()
        .len() as i64
}

fn distinct_sessions(hits: &[&Hit]) -> i64 {
    hits.iter()
        .map(|h| (h.fingerprint.as_str(), h.session))
        .collect::<HashSet<_>>()
        .len() as i64
}

fn in_range(params: &QueryParams, range: DayRange, tenant_id: Option<i64>, day: NaiveDate) -> bool {
    params.matches_tenant(tenant_id) && range.contains(day)
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_hits(&self, hits: &[Hit]) -> Result<(), StoreError> {
        self.check()?;
        self.lock().hits.extend_from_slice(hits);
        Ok(())
    }

    async fn delete_hits_by_day(
        &self,
        params: &QueryParams,
        day: NaiveDate,
    ) -> Result<(), StoreError> {
        self.check()?;
        let (start, end) = params.day_bounds(day);
        self.lock().hits.retain(|h| {
            !(params.matches_tenant(h.tenant_id) && h.time >= start && h.time < end)
        });
        Ok(())
    }

    async fn save_visitor_stats(&self, stats: &[VisitorStats]) -> Result<(), StoreError> {
        self.check()?;
        self.lock().merge_visitor_stats(stats);
        Ok(())
    }

    async fn save_visitor_time_stats(
        &self,
        stats: &[VisitorTimeStats],
    ) -> Result<(), StoreError> {
        self.check()?;
        self.lock().merge_visitor_time_stats(stats);
        Ok(())
    }

    async fn save_dimension_stats(&self, stats: &[DimensionRollup]) -> Result<(), StoreError> {
        self.check()?;
        self.lock().merge_dimension_stats(stats);
        Ok(())
    }

    async fn count_hits(&self, params: &QueryParams, day: NaiveDate) -> Result<i64, StoreError> {
        self.check()?;
        let tables = self.lock();
        Ok(day_hits(&tables.hits, params, day, &Predicates::default()).len() as i64)
    }

    async fn commit_day(
        &self,
        params: &QueryParams,
        day: NaiveDate,
        rollup: &DayRollup,
        expected_hits: i64,
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut tables = self.lock();
        let found = day_hits(&tables.hits, params, day, &Predicates::default()).len() as i64;
        if found != expected_hits {
            return Err(StoreError::Conflict(format!(
                "{day} holds {found} raw hits, expected {expected_hits}"
            )));
        }

        tables.merge_visitor_stats(&rollup.visitor_stats);
        tables.merge_visitor_time_stats(&rollup.time_stats);
        tables.merge_dimension_stats(&rollup.dimension_stats);
        let (start, end) = params.day_bounds(day);
        tables.hits.retain(|h| {
            !(params.matches_tenant(h.tenant_id) && h.time >= start && h.time < end)
        });
        Ok(())
    }

    async fn session(
        &self,
        params: &QueryParams,
        fingerprint: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.check()?;
        Ok(self
            .lock()
            .hits
            .iter()
            .filter(|h| {
                params.matches_tenant(h.tenant_id) && h.fingerprint == fingerprint && h.time >= since
            })
            .filter_map(|h| h.session)
            .max())
    }

    async fn tenants(&self) -> Result<Vec<Option<i64>>, StoreError> {
        self.check()?;
        let tenants: BTreeSet<Option<i64>> = self.lock().hits.iter().map(|h| h.tenant_id).collect();
        Ok(tenants.into_iter().collect())
    }

    async fn hit_days(&self, params: &QueryParams) -> Result<Vec<NaiveDate>, StoreError> {
        self.check()?;
        let today = params.today();
        let days: BTreeSet<NaiveDate> = self
            .lock()
            .hits
            .iter()
            .filter(|h| params.matches_tenant(h.tenant_id))
            .map(|h| params.local_day(h.time))
            .filter(|day| *day < today)
            .collect();
        Ok(days.into_iter().collect())
    }

    async fn hit_paths(
        &self,
        params: &QueryParams,
        day: NaiveDate,
    ) -> Result<Vec<String>, StoreError> {
        self.check()?;
        let tables = self.lock();
        let paths: BTreeSet<String> = day_hits(&tables.hits, params, day, &Predicates::default())
            .into_iter()
            .map(|h| h.path.clone())
            .collect();
        Ok(paths.into_iter().collect())
    }

    async fn paths(
        &self,
        params: &QueryParams,
        range: DayRange,
    ) -> Result<Vec<String>, StoreError> {
        self.check()?;
        let tables = self.lock();
        let mut paths: BTreeSet<String> = tables
            .visitor_stats
            .iter()
            .filter(|s| in_range(params, range, s.tenant_id, s.day))
            .filter_map(|s| s.path.clone())
            .collect();
        paths.extend(
            tables
                .hits
                .iter()
                .filter(|h| in_range(params, range, h.tenant_id, params.local_day(h.time)))
                .map(|h| h.path.clone()),
        );
        Ok(paths.into_iter().collect())
    }

    async fn count_visitors(
        &self,
        params: &QueryParams,
        day: NaiveDate,
        predicates: &Predicates,
    ) -> Result<VisitorCounts, StoreError> {
        self.check()?;
        let tables = self.lock();
        let matched = day_hits(&tables.hits, params, day, predicates);
        let visitors: HashSet<&str> = matched.iter().map(|h| h.fingerprint.as_str()).collect();

        let mut paths: HashMap<&str, HashSet<&str>> = HashMap::new();
        for hit in day_hits(&tables.hits, params, day, &Predicates::default()) {
            if visitors.contains(hit.fingerprint.as_str()) {
                paths
                    .entry(hit.fingerprint.as_str())
                    .or_default()
                    .insert(hit.path.as_str());
            }
        }
        let bounces = paths.values().filter(|p| p.len() == 1).count() as i64;

        Ok(VisitorCounts {
            visitors: visitors.len() as i64,
            sessions: distinct_sessions(&matched),
            bounces,
        })
    }

    async fn count_visitors_by_hour(
        &self,
        params: &QueryParams,
        day: NaiveDate,
        predicates: &Predicates,
    ) -> Result<Vec<HourStats>, StoreError> {
        self.check()?;
        let tables = self.lock();
        let mut by_hour: BTreeMap<u32, Vec<&Hit>> = BTreeMap::new();
        for hit in day_hits(&tables.hits, params, day, predicates) {
            by_hour.entry(params.local_hour(hit.time)).or_default().push(hit);
        }
        Ok(by_hour
            .into_iter()
            .map(|(hour, hits)| HourStats {
                hour,
                visitors: distinct_visitors(&hits),
                sessions: distinct_sessions(&hits),
            })
            .collect())
    }

    async fn count_visitors_by_dimension(
        &self,
        params: &QueryParams,
        day: NaiveDate,
        dimension: Dimension,
        predicates: &Predicates,
    ) -> Result<Vec<DimensionCount>, StoreError> {
        self.check()?;
        let tables = self.lock();
        let mut groups: BTreeMap<String, (Option<String>, HashSet<&str>)> = BTreeMap::new();
        for hit in day_hits(&tables.hits, params, day, predicates) {
            let (value, label) = dimension.value_of(hit);
            let entry = groups.entry(value).or_default();
            if entry.0.is_none() {
                entry.0 = label;
            }
            entry.1.insert(hit.fingerprint.as_str());
        }
        Ok(groups
            .into_iter()
            .map(|(value, (label, visitors))| DimensionCount {
                value,
                label,
                visitors: visitors.len() as i64,
            })
            .collect())
    }

    async fn count_visitors_by_platform(
        &self,
        params: &QueryParams,
        day: NaiveDate,
        predicates: &Predicates,
    ) -> Result<PlatformCounts, StoreError> {
        self.check()?;
        let tables = self.lock();
        let hits = day_hits(&tables.hits, params, day, predicates);
        let count = |platform: Platform| {
            hits.iter()
                .filter(|h| h.platform() == platform)
                .map(|h| h.fingerprint.as_str())
                .collect::<HashSet<_>>()
                .len() as i64
        };
        Ok(PlatformCounts {
            desktop: count(Platform::Desktop),
            mobile: count(Platform::Mobile),
            unknown: count(Platform::Unknown),
        })
    }

    async fn visitors(
        &self,
        params: &QueryParams,
        range: DayRange,
        path: Option<&str>,
    ) -> Result<Vec<VisitorStats>, StoreError> {
        self.check()?;
        let mut rows: Vec<VisitorStats> = self
            .lock()
            .visitor_stats
            .iter()
            .filter(|s| in_range(params, range, s.tenant_id, s.day) && s.path.as_deref() == path)
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.day);
        Ok(rows)
    }

    async fn visitor_hours(
        &self,
        params: &QueryParams,
        range: DayRange,
        path: Option<&str>,
    ) -> Result<Vec<HourStats>, StoreError> {
        self.check()?;
        let mut by_hour: BTreeMap<u32, HourStats> = BTreeMap::new();
        for row in self
            .lock()
            .visitor_time_stats
            .iter()
            .filter(|s| in_range(params, range, s.tenant_id, s.day) && s.path.as_deref() == path)
        {
            let entry = by_hour.entry(row.hour).or_insert(HourStats {
                hour: row.hour,
                ..Default::default()
            });
            entry.visitors += row.visitors;
            entry.sessions += row.sessions;
        }
        Ok(by_hour.into_values().collect())
    }

    async fn dimension_visitors(
        &self,
        params: &QueryParams,
        dimension: Dimension,
        range: DayRange,
        path: Option<&str>,
    ) -> Result<Vec<DimensionCount>, StoreError> {
        self.check()?;
        let tables = self.lock();
        if dimension == Dimension::Path {
            let mut by_path: BTreeMap<String, i64> = BTreeMap::new();
            for row in tables.visitor_stats.iter().filter(|s| {
                in_range(params, range, s.tenant_id, s.day)
                    && s.path.is_some()
                    && (path.is_none() || s.path.as_deref() == path)
            }) {
                if let Some(p) = &row.path {
                    *by_path.entry(p.clone()).or_default() += row.visitors;
                }
            }
            return Ok(by_path
                .into_iter()
                .map(|(value, visitors)| DimensionCount {
                    value,
                    label: None,
                    visitors,
                })
                .collect());
        }

        let mut by_value: BTreeMap<String, DimensionCount> = BTreeMap::new();
        for row in tables.dimension_stats.iter().filter(|s| {
            s.dimension == dimension
                && in_range(params, range, s.tenant_id, s.day)
                && s.path.as_deref() == path
        }) {
            let entry = by_value
                .entry(row.value.clone())
                .or_insert_with(|| DimensionCount {
                    value: row.value.clone(),
                    ..Default::default()
                });
            entry.visitors += row.visitors;
            if entry.label.is_none() {
                entry.label = row.label.clone();
            }
        }
        Ok(by_value.into_values().collect())
    }

    async fn platform_visitors(
        &self,
        params: &QueryParams,
        range: DayRange,
        path: Option<&str>,
    ) -> Result<PlatformCounts, StoreError> {
        self.check()?;
        let mut counts = PlatformCounts::default();
        for row in self
            .lock()
            .visitor_stats
            .iter()
            .filter(|s| in_range(params, range, s.tenant_id, s.day) && s.path.as_deref() == path)
        {
            counts.add(PlatformCounts {
                desktop: row.platform_desktop,
                mobile: row.platform_mobile,
                unknown: row.platform_unknown,
            });
        }
        Ok(counts)
    }

    async fn active_visitors(
        &self,
        params: &QueryParams,
        since: DateTime<Utc>,
        predicates: &Predicates,
    ) -> Result<i64, StoreError> {
        self.check()?;
        let tables = self.lock();
        let hits: Vec<&Hit> = tables
            .hits
            .iter()
            .filter(|h| params.matches_tenant(h.tenant_id) && h.time >= since)
            .filter(|h| predicates.matches(h))
            .collect();
        Ok(distinct_visitors(&hits))
    }

    async fn active_page_visitors(
        &self,
        params: &QueryParams,
        since: DateTime<Utc>,
        predicates: &Predicates,
    ) -> Result<Vec<PathCount>, StoreError> {
        self.check()?;
        let tables = self.lock();
        let mut by_path: HashMap<&str, HashSet<&str>> = HashMap::new();
        for hit in tables
            .hits
            .iter()
            .filter(|h| params.matches_tenant(h.tenant_id) && h.time >= since)
            .filter(|h| predicates.matches(h))
        {
            by_path
                .entry(hit.path.as_str())
                .or_default()
                .insert(hit.fingerprint.as_str());
        }
        let mut pages: Vec<PathCount> = by_path
            .into_iter()
            .map(|(path, visitors)| PathCount {
                path: path.to_string(),
                visitors: visitors.len() as i64,
            })
            .collect();
        pages.sort_by(|a, b| b.visitors.cmp(&a.visitors).then_with(|| a.path.cmp(&b.path)));
        Ok(pages)
    }
}
