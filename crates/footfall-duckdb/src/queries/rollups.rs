//! Daily and hourly rollups: merge-on-write saves and range reads.

use anyhow::{ensure, Result};
use chrono::NaiveDate;
use duckdb::Connection;
use tracing::{debug, warn};

use footfall_core::stats::{
    DayRollup, Dimension, DimensionCount, DimensionRollup, HourStats, PlatformCounts,
    VisitorStats, VisitorTimeStats,
};
use footfall_core::{DayRange, QueryParams};

use crate::backend::{parse_day, ts};
use crate::queries::SqlFilter;
use crate::DuckDbStore;

/// Add `stats` to the existing rows of the same key, inserting missing keys.
fn merge_visitor_stats(conn: &Connection, stats: &[VisitorStats]) -> Result<()> {
    for row in stats {
        let day = row.day.to_string();
        let path = row.path.clone().unwrap_or_default();
        let updated = conn.execute(
            "UPDATE visitor_stats SET \
                 visitors = visitors + ?1, sessions = sessions + ?2, bounces = bounces + ?3, \
                 platform_desktop = platform_desktop + ?4, \
                 platform_mobile = platform_mobile + ?5, \
                 platform_unknown = platform_unknown + ?6 \
             WHERE tenant_id IS NOT DISTINCT FROM ?7 AND day = CAST(?8 AS DATE) AND path = ?9",
            duckdb::params![
                row.visitors,
                row.sessions,
                row.bounces,
                row.platform_desktop,
                row.platform_mobile,
                row.platform_unknown,
                row.tenant_id,
                day,
                path,
            ],
        )?;
        if updated == 0 {
            conn.execute(
                "INSERT INTO visitor_stats \
                     (tenant_id, day, path, visitors, sessions, bounces, \
                      platform_desktop, platform_mobile, platform_unknown) \
                 VALUES (?1, CAST(?2 AS DATE), ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                duckdb::params![
                    row.tenant_id,
                    day,
                    path,
                    row.visitors,
                    row.sessions,
                    row.bounces,
                    row.platform_desktop,
                    row.platform_mobile,
                    row.platform_unknown,
                ],
            )?;
        }
    }
    Ok(())
}

fn merge_visitor_time_stats(conn: &Connection, stats: &[VisitorTimeStats]) -> Result<()> {
    for row in stats {
        let day = row.day.to_string();
        let path = row.path.clone().unwrap_or_default();
        let updated = conn.execute(
            "UPDATE visitor_time_stats SET visitors = visitors + ?1, sessions = sessions + ?2 \
             WHERE tenant_id IS NOT DISTINCT FROM ?3 AND day = CAST(?4 AS DATE) \
               AND path = ?5 AND hour = ?6",
            duckdb::params![row.visitors, row.sessions, row.tenant_id, day, path, row.hour],
        )?;
        if updated == 0 {
            conn.execute(
                "INSERT INTO visitor_time_stats (tenant_id, day, path, hour, visitors, sessions) \
                 VALUES (?1, CAST(?2 AS DATE), ?3, ?4, ?5, ?6)",
                duckdb::params![row.tenant_id, day, path, row.hour, row.visitors, row.sessions],
            )?;
        }
    }
    Ok(())
}

fn merge_dimension_stats(conn: &Connection, stats: &[DimensionRollup]) -> Result<()> {
    for row in stats {
        // Path ranks are read from visitor_stats; there is no table to merge into.
        ensure!(
            row.dimension != Dimension::Path,
            "path is not a rolled up dimension"
        );
        let table = row.dimension.table();
        let day = row.day.to_string();
        let path = row.path.clone().unwrap_or_default();
        let updated = conn.execute(
            &format!(
                "UPDATE {table} SET visitors = visitors + ?1, label = COALESCE(?2, label) \
                 WHERE tenant_id IS NOT DISTINCT FROM ?3 AND day = CAST(?4 AS DATE) \
                   AND path = ?5 AND value = ?6"
            ),
            duckdb::params![row.visitors, row.label, row.tenant_id, day, path, row.value],
        )?;
        if updated == 0 {
            conn.execute(
                &format!(
                    "INSERT INTO {table} (tenant_id, day, path, value, label, visitors) \
                     VALUES (?1, CAST(?2 AS DATE), ?3, ?4, ?5, ?6)"
                ),
                duckdb::params![row.tenant_id, day, path, row.value, row.label, row.visitors],
            )?;
        }
    }
    Ok(())
}

fn count_day_hits(conn: &Connection, params: &QueryParams, day: NaiveDate) -> Result<i64> {
    let (start, end) = params.day_bounds(day);
    let count = conn
        .prepare(
            "SELECT COUNT(*) FROM hits \
             WHERE tenant_id IS NOT DISTINCT FROM ?1 AND created_at >= ?2 AND created_at < ?3",
        )?
        .query_row(
            duckdb::params![params.tenant_id, ts(start), ts(end)],
            |row| row.get(0),
        )?;
    Ok(count)
}

impl DuckDbStore {
    pub async fn save_visitor_stats(&self, stats: &[VisitorStats]) -> Result<()> {
        if stats.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        merge_visitor_stats(&tx, stats)?;
        tx.commit()?;
        debug!(rows = stats.len(), "saved visitor stats");
        Ok(())
    }

    pub async fn save_visitor_time_stats(&self, stats: &[VisitorTimeStats]) -> Result<()> {
        if stats.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        merge_visitor_time_stats(&tx, stats)?;
        tx.commit()?;
        debug!(rows = stats.len(), "saved visitor time stats");
        Ok(())
    }

    pub async fn save_dimension_stats(&self, stats: &[DimensionRollup]) -> Result<()> {
        if stats.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        merge_dimension_stats(&tx, stats)?;
        tx.commit()?;
        debug!(rows = stats.len(), "saved dimension stats");
        Ok(())
    }

    /// Raw hits of one local day.
    pub async fn count_hits(&self, params: &QueryParams, day: NaiveDate) -> Result<i64> {
        let conn = self.conn.lock().await;
        count_day_hits(&conn, params, day)
    }

    /// Merge `rollup` and delete the raw hits of `day` in one transaction.
    ///
    /// Returns `false` without writing anything when the day no longer holds
    /// `expected_hits` raw hits. Any error rolls the transaction back.
    pub async fn commit_day(
        &self,
        params: &QueryParams,
        day: NaiveDate,
        rollup: &DayRollup,
        expected_hits: i64,
    ) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let found = count_day_hits(&tx, params, day)?;
        if found != expected_hits {
            warn!(tenant_id = ?params.tenant_id, day = %day, found, expected_hits, "hits changed during rollup");
            return Ok(false);
        }

        merge_visitor_stats(&tx, &rollup.visitor_stats)?;
        merge_visitor_time_stats(&tx, &rollup.time_stats)?;
        merge_dimension_stats(&tx, &rollup.dimension_stats)?;
        let (start, end) = params.day_bounds(day);
        let deleted = tx.execute(
            "DELETE FROM hits \
             WHERE tenant_id IS NOT DISTINCT FROM ?1 AND created_at >= ?2 AND created_at < ?3",
            duckdb::params![params.tenant_id, ts(start), ts(end)],
        )?;
        tx.commit()?;

        debug!(
            tenant_id = ?params.tenant_id,
            day = %day,
            visitor_rows = rollup.visitor_stats.len(),
            deleted,
            "committed day rollup"
        );
        Ok(true)
    }

    /// Daily rows in `range`, ascending by day.
    pub async fn visitors(
        &self,
        params: &QueryParams,
        range: DayRange,
        path: Option<&str>,
    ) -> Result<Vec<VisitorStats>> {
        let conn = self.conn.lock().await;
        let mut filter = SqlFilter::new();
        filter.rollups(params, range, path);
        let where_clause = filter.sql();

        let sql = format!(
            "SELECT CAST(day AS VARCHAR), \
                    CAST(SUM(visitors) AS BIGINT), CAST(SUM(sessions) AS BIGINT), \
                    CAST(SUM(bounces) AS BIGINT), CAST(SUM(platform_desktop) AS BIGINT), \
                    CAST(SUM(platform_mobile) AS BIGINT), CAST(SUM(platform_unknown) AS BIGINT) \
             FROM visitor_stats WHERE {where_clause} \
             GROUP BY day ORDER BY day"
        );

        let sql_params = filter.params();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(sql_params.as_slice(), |row| {
            Ok((
                row.get::<_, String>(0)?,
                [
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                ],
            ))
        })?;

        let mut stats = Vec::new();
        for row in rows {
            let (day, [visitors, sessions, bounces, desktop, mobile, unknown]) = row?;
            stats.push(VisitorStats {
                tenant_id: params.tenant_id,
                day: parse_day(&day)?,
                path: path.map(str::to_string),
                visitors,
                sessions,
                bounces,
                platform_desktop: desktop,
                platform_mobile: mobile,
                platform_unknown: unknown,
            });
        }
        Ok(stats)
    }

    /// Hourly rows in `range` summed per hour.
    pub async fn visitor_hours(
        &self,
        params: &QueryParams,
        range: DayRange,
        path: Option<&str>,
    ) -> Result<Vec<HourStats>> {
        let conn = self.conn.lock().await;
        let mut filter = SqlFilter::new();
        filter.rollups(params, range, path);
        let where_clause = filter.sql();

        let sql = format!(
            "SELECT CAST(hour AS BIGINT), CAST(SUM(visitors) AS BIGINT), CAST(SUM(sessions) AS BIGINT) \
             FROM visitor_time_stats WHERE {where_clause} \
             GROUP BY hour ORDER BY hour"
        );

        let sql_params = filter.params();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(sql_params.as_slice(), |row| {
            Ok(HourStats {
                hour: row.get::<_, i64>(0)? as u32,
                visitors: row.get(1)?,
                sessions: row.get(2)?,
            })
        })?;

        let mut hours = Vec::new();
        for row in rows {
            hours.push(row?);
        }
        Ok(hours)
    }

    /// Dimension rows in `range` summed per value.
    pub async fn dimension_visitors(
        &self,
        params: &QueryParams,
        dimension: Dimension,
        range: DayRange,
        path: Option<&str>,
    ) -> Result<Vec<DimensionCount>> {
        let conn = self.conn.lock().await;
        let mut filter = SqlFilter::new();
        let sql = if dimension == Dimension::Path {
            filter.tenant(params.tenant_id);
            filter.days(range);
            match path {
                Some(path) => {
                    let p = filter.bind(path.to_string());
                    filter.push(format!("path = {p}"));
                }
                None => filter.push("path <> ''"),
            }
            format!(
                "SELECT path, CAST(NULL AS VARCHAR), CAST(SUM(visitors) AS BIGINT) \
                 FROM visitor_stats WHERE {} \
                 GROUP BY path ORDER BY path",
                filter.sql()
            )
        } else {
            filter.rollups(params, range, path);
            format!(
                "SELECT value, MAX(label), CAST(SUM(visitors) AS BIGINT) \
                 FROM {} WHERE {} \
                 GROUP BY value ORDER BY value",
                dimension.table(),
                filter.sql()
            )
        };

        let sql_params = filter.params();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(sql_params.as_slice(), |row| {
            Ok(DimensionCount {
                value: row.get(0)?,
                label: row.get(1)?,
                visitors: row.get(2)?,
            })
        })?;

        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    }

    pub async fn platform_visitors(
        &self,
        params: &QueryParams,
        range: DayRange,
        path: Option<&str>,
    ) -> Result<PlatformCounts> {
        let conn = self.conn.lock().await;
        let mut filter = SqlFilter::new();
        filter.rollups(params, range, path);
        let where_clause = filter.sql();

        let sql = format!(
            "SELECT CAST(COALESCE(SUM(platform_desktop), 0) AS BIGINT), \
                    CAST(COALESCE(SUM(platform_mobile), 0) AS BIGINT), \
                    CAST(COALESCE(SUM(platform_unknown), 0) AS BIGINT) \
             FROM visitor_stats WHERE {where_clause}"
        );

        let sql_params = filter.params();
        let counts = conn.prepare(&sql)?.query_row(sql_params.as_slice(), |row| {
            Ok(PlatformCounts {
                desktop: row.get(0)?,
                mobile: row.get(1)?,
                unknown: row.get(2)?,
            })
        })?;
        Ok(counts)
    }
}
