//! Rollup job: turns closed days of raw hits into daily and hourly rollups.

use std::sync::Arc;

use chrono::NaiveDate;
use chrono_tz::Tz;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::filter::Predicates;
use crate::stats::{DayRollup, Dimension, DimensionRollup, VisitorStats, VisitorTimeStats};
use crate::store::{QueryParams, Store};

#[derive(Clone)]
pub struct Processor {
    store: Arc<dyn Store>,
    timezone: Tz,
}

impl Processor {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_timezone(store, Tz::UTC)
    }

    pub fn with_timezone(store: Arc<dyn Store>, timezone: Tz) -> Self {
        Self { store, timezone }
    }

    /// Process every tenant. Returns the number of days rolled up.
    pub async fn run(&self) -> Result<usize, StoreError> {
        let mut processed = 0;
        for tenant_id in self.store.tenants().await? {
            processed += self
                .process(&QueryParams::new(tenant_id, self.timezone))
                .await?;
        }
        Ok(processed)
    }

    /// Roll up every closed day of one tenant and delete its raw hits.
    ///
    /// Today is never touched. Each day is committed as one unit: a day whose
    /// rollup fails, or that received hits while it was being counted, keeps
    /// its raw hits and gets no rollup rows, so the next run counts it once.
    pub async fn process(&self, params: &QueryParams) -> Result<usize, StoreError> {
        let days = self.store.hit_days(params).await?;
        for day in &days {
            let hits = self.store.count_hits(params, *day).await?;
            let rollup = self.roll_up(params, *day).await?;
            self.store.commit_day(params, *day, &rollup, hits).await?;
            info!(tenant_id = ?params.tenant_id, day = %day, hits, "rolled up hits");
        }
        Ok(days.len())
    }

    async fn roll_up(&self, params: &QueryParams, day: NaiveDate) -> Result<DayRollup, StoreError> {
        let mut scopes: Vec<Option<String>> = vec![None];
        scopes.extend(self.store.hit_paths(params, day).await?.into_iter().map(Some));

        let mut visitor_stats = Vec::with_capacity(scopes.len());
        let mut time_stats = Vec::new();
        let mut dimension_stats = Vec::new();

        for path in scopes {
            let predicates = Predicates::for_path(path.as_deref());

            let counts = self.store.count_visitors(params, day, &predicates).await?;
            let platforms = self
                .store
                .count_visitors_by_platform(params, day, &predicates)
                .await?;
            visitor_stats.push(VisitorStats {
                tenant_id: params.tenant_id,
                day,
                path: path.clone(),
                visitors: counts.visitors,
                sessions: counts.sessions,
                bounces: counts.bounces,
                platform_desktop: platforms.desktop,
                platform_mobile: platforms.mobile,
                platform_unknown: platforms.unknown,
            });

            for hour in self
                .store
                .count_visitors_by_hour(params, day, &predicates)
                .await?
            {
                time_stats.push(VisitorTimeStats {
                    tenant_id: params.tenant_id,
                    day,
                    path: path.clone(),
                    hour: hour.hour,
                    visitors: hour.visitors,
                    sessions: hour.sessions,
                });
            }

            for dimension in Dimension::ALL {
                for row in self
                    .store
                    .count_visitors_by_dimension(params, day, dimension, &predicates)
                    .await?
                {
                    dimension_stats.push(DimensionRollup {
                        tenant_id: params.tenant_id,
                        day,
                        path: path.clone(),
                        dimension,
                        value: row.value,
                        label: row.label,
                        visitors: row.visitors,
                    });
                }
            }
        }

        debug!(
            day = %day,
            visitor_rows = visitor_stats.len(),
            hour_rows = time_stats.len(),
            dimension_rows = dimension_stats.len(),
            "computed rollups"
        );
        Ok(DayRollup {
            visitor_stats,
            time_stats,
            dimension_stats,
        })
    }
}
