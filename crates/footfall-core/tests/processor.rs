use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};

use footfall_core::memory::MemoryStore;
use footfall_core::stats::{
    DayRollup, Dimension, DimensionCount, DimensionRollup, HourStats, PathCount, PlatformCounts,
    VisitorCounts, VisitorStats, VisitorTimeStats,
};
use footfall_core::{
    Analyzer, DayRange, Filter, Hit, Predicates, Processor, QueryParams, Store, StoreError,
};

fn hit(fingerprint: &str, path: &str, days_ago: i64) -> Hit {
    Hit {
        fingerprint: fingerprint.to_string(),
        path: path.to_string(),
        language: "en".to_string(),
        browser: "Firefox".to_string(),
        mobile: true,
        screen_width: 390,
        screen_height: 844,
        screen_class: "XS".to_string(),
        time: Utc::now() - Duration::days(days_ago),
        ..Default::default()
    }
}

#[tokio::test]
async fn run_rolls_up_closed_days_and_keeps_today() {
    let store = Arc::new(MemoryStore::new());
    store
        .save_hits(&[
            hit("a", "/", 2),
            hit("a", "/blog", 2),
            hit("b", "/", 2),
            hit("c", "/", 0),
        ])
        .await
        .expect("save hits");

    let processor = Processor::new(store.clone());
    assert_eq!(processor.run().await.expect("run"), 1);

    let remaining = store.hits();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].fingerprint, "c");

    let stats = store.visitor_stats();
    let site = stats
        .iter()
        .find(|s| s.path.is_none())
        .expect("site-wide row");
    assert_eq!(site.visitors, 2);
    assert_eq!(site.bounces, 1);
    assert_eq!(site.platform_mobile, 2);
    let blog = stats
        .iter()
        .find(|s| s.path.as_deref() == Some("/blog"))
        .expect("page row");
    assert_eq!(blog.visitors, 1);
    assert_eq!(blog.bounces, 0);

    let screens: Vec<_> = store
        .dimension_stats()
        .into_iter()
        .filter(|d| d.dimension == Dimension::Screen && d.path.is_none())
        .collect();
    assert_eq!(screens.len(), 1);
    assert_eq!(screens[0].value, "390x844");
    assert_eq!(screens[0].label.as_deref(), Some("XS"));

    assert_eq!(store.visitor_time_stats().iter().filter(|s| s.path.is_none()).count(), 1);
}

#[tokio::test]
async fn rolled_up_days_stay_visible_to_the_analyzer() {
    let store = Arc::new(MemoryStore::new());
    store
        .save_hits(&[hit("a", "/", 2), hit("b", "/", 2), hit("c", "/", 0)])
        .await
        .expect("save hits");

    Processor::new(store.clone()).run().await.expect("run");
    // A second run finds nothing left to roll up.
    assert_eq!(Processor::new(store.clone()).run().await.expect("run"), 0);

    let analyzer = Analyzer::new(store.clone());
    let filter = Filter {
        from: Some(Utc::now() - Duration::days(2)),
        ..Default::default()
    };
    let days = analyzer.visitors(Some(&filter)).await.expect("visitors");
    assert_eq!(days.len(), 3);
    assert_eq!(days[0].visitors, 2);
    assert_eq!(days[1].visitors, 0);
    assert_eq!(days[2].visitors, 1);

    let languages = analyzer.languages(Some(&filter)).await.expect("languages");
    assert_eq!(languages.len(), 1);
    assert_eq!(languages[0].visitors, 3);
}

#[tokio::test]
async fn run_is_per_tenant() {
    let store = Arc::new(MemoryStore::new());
    let mut tenant_hit = hit("a", "/", 1);
    tenant_hit.tenant_id = Some(3);
    store
        .save_hits(&[tenant_hit, hit("b", "/", 1)])
        .await
        .expect("save hits");

    assert_eq!(Processor::new(store.clone()).run().await.expect("run"), 2);
    let tenants: Vec<Option<i64>> = store
        .visitor_stats()
        .iter()
        .filter(|s| s.path.is_none())
        .map(|s| s.tenant_id)
        .collect();
    assert_eq!(tenants.len(), 2);
    assert!(tenants.contains(&Some(3)));
    assert!(tenants.contains(&None));
    assert!(store.hits().is_empty());
}

/// A [`MemoryStore`] whose day commits can be made to fail, and which can
/// receive a late hit while a day is being counted.
#[derive(Default)]
struct InterruptedStore {
    inner: MemoryStore,
    failing_commits: AtomicUsize,
    late_hit: Mutex<Option<Hit>>,
}

#[async_trait]
impl Store for InterruptedStore {
    async fn save_hits(&self, hits: &[Hit]) -> Result<(), StoreError> {
        self.inner.save_hits(hits).await
    }

    async fn delete_hits_by_day(&self, params: &QueryParams, day: NaiveDate) -> Result<(), StoreError> {
        self.inner.delete_hits_by_day(params, day).await
    }

    async fn save_visitor_stats(&self, stats: &[VisitorStats]) -> Result<(), StoreError> {
        self.inner.save_visitor_stats(stats).await
    }

    async fn save_visitor_time_stats(&self, stats: &[VisitorTimeStats]) -> Result<(), StoreError> {
        self.inner.save_visitor_time_stats(stats).await
    }

    async fn save_dimension_stats(&self, stats: &[DimensionRollup]) -> Result<(), StoreError> {
        self.inner.save_dimension_stats(stats).await
    }

    async fn count_hits(&self, params: &QueryParams, day: NaiveDate) -> Result<i64, StoreError> {
        self.inner.count_hits(params, day).await
    }

    async fn commit_day(
        &self,
        params: &QueryParams,
        day: NaiveDate,
        rollup: &DayRollup,
        expected_hits: i64,
    ) -> Result<(), StoreError> {
        let fail = self
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(StoreError::Backend(anyhow::anyhow!("disk full")));
        }
        self.inner.commit_day(params, day, rollup, expected_hits).await
    }

    async fn session(
        &self,
        params: &QueryParams,
        fingerprint: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.inner.session(params, fingerprint, since).await
    }

    async fn tenants(&self) -> Result<Vec<Option<i64>>, StoreError> {
        self.inner.tenants().await
    }

    async fn hit_days(&self, params: &QueryParams) -> Result<Vec<NaiveDate>, StoreError> {
        self.inner.hit_days(params).await
    }

    async fn hit_paths(&self, params: &QueryParams, day: NaiveDate) -> Result<Vec<String>, StoreError> {
        self.inner.hit_paths(params, day).await
    }

    async fn paths(&self, params: &QueryParams, range: DayRange) -> Result<Vec<String>, StoreError> {
        self.inner.paths(params, range).await
    }

    async fn count_visitors(
        &self,
        params: &QueryParams,
        day: NaiveDate,
        predicates: &Predicates,
    ) -> Result<VisitorCounts, StoreError> {
        self.inner.count_visitors(params, day, predicates).await
    }

    async fn count_visitors_by_hour(
        &self,
        params: &QueryParams,
        day: NaiveDate,
        predicates: &Predicates,
    ) -> Result<Vec<HourStats>, StoreError> {
        self.inner.count_visitors_by_hour(params, day, predicates).await
    }

    async fn count_visitors_by_dimension(
        &self,
        params: &QueryParams,
        day: NaiveDate,
        dimension: Dimension,
        predicates: &Predicates,
    ) -> Result<Vec<DimensionCount>, StoreError> {
        self.inner
            .count_visitors_by_dimension(params, day, dimension, predicates)
            .await
    }

    async fn count_visitors_by_platform(
        &self,
        params: &QueryParams,
        day: NaiveDate,
        predicates: &Predicates,
    ) -> Result<PlatformCounts, StoreError> {
        let late = self.late_hit.lock().expect("late hit lock").take();
        if let Some(hit) = late {
            self.inner.save_hits(&[hit]).await?;
        }
        self.inner.count_visitors_by_platform(params, day, predicates).await
    }

    async fn visitors(
        &self,
        params: &QueryParams,
        range: DayRange,
        path: Option<&str>,
    ) -> Result<Vec<VisitorStats>, StoreError> {
        self.inner.visitors(params, range, path).await
    }

    async fn visitor_hours(
        &self,
        params: &QueryParams,
        range: DayRange,
        path: Option<&str>,
    ) -> Result<Vec<HourStats>, StoreError> {
        self.inner.visitor_hours(params, range, path).await
    }

    async fn dimension_visitors(
        &self,
        params: &QueryParams,
        dimension: Dimension,
        range: DayRange,
        path: Option<&str>,
    ) -> Result<Vec<DimensionCount>, StoreError> {
        self.inner.dimension_visitors(params, dimension, range, path).await
    }

    async fn platform_visitors(
        &self,
        params: &QueryParams,
        range: DayRange,
        path: Option<&str>,
    ) -> Result<PlatformCounts, StoreError> {
        self.inner.platform_visitors(params, range, path).await
    }

    async fn active_visitors(
        &self,
        params: &QueryParams,
        since: DateTime<Utc>,
        predicates: &Predicates,
    ) -> Result<i64, StoreError> {
        self.inner.active_visitors(params, since, predicates).await
    }

    async fn active_page_visitors(
        &self,
        params: &QueryParams,
        since: DateTime<Utc>,
        predicates: &Predicates,
    ) -> Result<Vec<PathCount>, StoreError> {
        self.inner.active_page_visitors(params, since, predicates).await
    }
}

fn site_visitors(store: &MemoryStore) -> Vec<i64> {
    store
        .visitor_stats()
        .iter()
        .filter(|s| s.path.is_none())
        .map(|s| s.visitors)
        .collect()
}

#[tokio::test]
async fn failed_commit_leaves_the_day_raw_and_retry_counts_once() {
    let store = Arc::new(InterruptedStore::default());
    store
        .save_hits(&[hit("a", "/", 2), hit("a", "/blog", 2), hit("b", "/", 2)])
        .await
        .expect("save hits");
    store.failing_commits.store(1, Ordering::SeqCst);

    let processor = Processor::new(store.clone());
    assert!(processor.run().await.is_err());
    assert!(store.inner.visitor_stats().is_empty());
    assert!(store.inner.dimension_stats().is_empty());
    assert_eq!(store.inner.hits().len(), 3);

    assert_eq!(processor.run().await.expect("retry"), 1);
    assert_eq!(site_visitors(&store.inner), vec![2]);
    assert!(store.inner.hits().is_empty());
}

#[tokio::test]
async fn hit_arriving_during_rollup_aborts_the_day() {
    let store = Arc::new(InterruptedStore::default());
    store
        .save_hits(&[hit("a", "/", 2), hit("b", "/", 2)])
        .await
        .expect("save hits");
    *store.late_hit.lock().expect("late hit lock") = Some(hit("c", "/", 2));

    let processor = Processor::new(store.clone());
    let err = processor.run().await.expect_err("conflict");
    assert!(matches!(err, StoreError::Conflict(_)), "{err}");
    assert!(store.inner.visitor_stats().is_empty());
    assert_eq!(store.inner.hits().len(), 3);

    assert_eq!(processor.run().await.expect("retry"), 1);
    assert_eq!(site_visitors(&store.inner), vec![3]);
    assert!(store.inner.hits().is_empty());
}

#[tokio::test]
async fn commit_day_rejects_a_stale_hit_count() {
    let store = MemoryStore::new();
    store
        .save_hits(&[hit("a", "/", 1), hit("b", "/", 1)])
        .await
        .expect("save hits");
    let params = QueryParams::utc(None);
    let day = (Utc::now() - Duration::days(1)).date_naive();
    assert_eq!(store.count_hits(&params, day).await.expect("count"), 2);

    let rollup = DayRollup {
        visitor_stats: vec![VisitorStats {
            day,
            visitors: 2,
            ..Default::default()
        }],
        ..Default::default()
    };
    let err = store
        .commit_day(&params, day, &rollup, 1)
        .await
        .expect_err("stale count");
    assert!(matches!(err, StoreError::Conflict(_)));
    assert!(store.visitor_stats().is_empty());
    assert_eq!(store.hits().len(), 2);

    store
        .commit_day(&params, day, &rollup, 2)
        .await
        .expect("commit");
    assert_eq!(site_visitors(&store), vec![2]);
    assert!(store.hits().is_empty());
}
