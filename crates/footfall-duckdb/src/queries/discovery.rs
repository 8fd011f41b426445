//! Tenants, days and paths present in the store.

use std::collections::BTreeSet;

use anyhow::Result;
use chrono::NaiveDate;

use footfall_core::{DayRange, QueryParams};

use crate::backend::{parse_ts, ts};
use crate::queries::SqlFilter;
use crate::DuckDbStore;

impl DuckDbStore {
    /// Every tenant with raw hits, including the untenanted `None`.
    pub async fn tenants(&self) -> Result<Vec<Option<i64>>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT DISTINCT tenant_id FROM hits ORDER BY tenant_id NULLS FIRST")?;
        let rows = stmt.query_map([], |row| row.get::<_, Option<i64>>(0))?;

        let mut tenants = Vec::new();
        for row in rows {
            tenants.push(row?);
        }
        Ok(tenants)
    }

    /// Local days before today that still have raw hits, ascending.
    pub async fn hit_days(&self, params: &QueryParams) -> Result<Vec<NaiveDate>> {
        let today = params.today();
        let (today_start, _) = params.day_bounds(today);

        let conn = self.conn.lock().await;
        let mut filter = SqlFilter::new();
        filter.tenant(params.tenant_id);
        filter.before(today_start);
        let where_clause = filter.sql();

        // Quarter-hour buckets cover every UTC offset in use.
        let sql = format!(
            "SELECT DISTINCT CAST(time_bucket(INTERVAL 15 MINUTE, created_at) AS VARCHAR) \
             FROM hits WHERE {where_clause}"
        );

        let sql_params = filter.params();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(sql_params.as_slice(), |row| row.get::<_, String>(0))?;

        let mut days = BTreeSet::new();
        for row in rows {
            let day = params.local_day(parse_ts(&row?)?);
            if day < today {
                days.insert(day);
            }
        }
        Ok(days.into_iter().collect())
    }

    /// Distinct paths among the raw hits of one local day.
    pub async fn hit_paths(&self, params: &QueryParams, day: NaiveDate) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut filter = SqlFilter::new();
        filter.hits_of_day(params, day);
        let where_clause = filter.sql();

        let sql = format!("SELECT DISTINCT path FROM hits WHERE {where_clause} ORDER BY path");

        let sql_params = filter.params();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(sql_params.as_slice(), |row| row.get::<_, String>(0))?;

        let mut paths = Vec::new();
        for row in rows {
            paths.push(row?);
        }
        Ok(paths)
    }

    /// Paths seen in `range`, from rollups and raw hits alike, sorted.
    pub async fn paths(&self, params: &QueryParams, range: DayRange) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut filter = SqlFilter::new();
        filter.tenant(params.tenant_id);
        filter.days(range);
        filter.push("path <> ''");
        let rollup_clause = filter.sql();

        let tenant = filter.bind(params.tenant_id);
        let (_, end) = params.day_bounds(range.to);
        let mut hits_clause = format!(
            "tenant_id IS NOT DISTINCT FROM {tenant} AND created_at < {}",
            filter.bind(ts(end))
        );
        if let Some(from) = range.from {
            let (start, _) = params.day_bounds(from);
            hits_clause.push_str(&format!(" AND created_at >= {}", filter.bind(ts(start))));
        }

        let sql = format!(
            "SELECT path FROM visitor_stats WHERE {rollup_clause} \
             UNION \
             SELECT path FROM hits WHERE {hits_clause} \
             ORDER BY path"
        );

        let sql_params = filter.params();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(sql_params.as_slice(), |row| row.get::<_, String>(0))?;

        let mut paths = Vec::new();
        for row in rows {
            paths.push(row?);
        }
        Ok(paths)
    }
}
