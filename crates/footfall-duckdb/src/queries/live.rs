//! Counts over raw hits of a single day.

use anyhow::Result;
use chrono::NaiveDate;

use footfall_core::stats::{Dimension, DimensionCount, HourStats, PlatformCounts, VisitorCounts};
use footfall_core::{Predicates, QueryParams};

use crate::queries::{utc_offset_seconds, SqlFilter, SESSION_KEY};
use crate::DuckDbStore;

/// Value and label expressions of a dimension over the `hits` table.
fn dimension_columns(dimension: Dimension) -> (&'static str, &'static str) {
    match dimension {
        Dimension::Path => ("path", "CAST(NULL AS VARCHAR)"),
        Dimension::Language => ("language", "CAST(NULL AS VARCHAR)"),
        Dimension::Referrer => ("COALESCE(referrer, '')", "MAX(referrer_name)"),
        Dimension::Os => ("os", "CAST(NULL AS VARCHAR)"),
        Dimension::Browser => ("browser", "CAST(NULL AS VARCHAR)"),
        Dimension::Country => ("country_code", "CAST(NULL AS VARCHAR)"),
        Dimension::Screen => (
            "CASE WHEN screen_width = 0 OR screen_height = 0 THEN '' \
             ELSE CAST(screen_width AS VARCHAR) || 'x' || CAST(screen_height AS VARCHAR) END",
            "NULLIF(MAX(screen_class), '')",
        ),
    }
}

impl DuckDbStore {
    /// Visitors, sessions and bounces of one day.
    ///
    /// A bounce is a matching visitor whose hits that day, regardless of the
    /// predicates, cover exactly one distinct path.
    pub async fn count_visitors(
        &self,
        params: &QueryParams,
        day: NaiveDate,
        predicates: &Predicates,
    ) -> Result<VisitorCounts> {
        let conn = self.conn.lock().await;
        let mut filter = SqlFilter::new();
        filter.hits_of_day(params, day);
        let day_clause = filter.sql();
        filter.predicates(predicates);
        let matched_clause = filter.sql();

        // Bounce queries use CTEs; correlated subqueries do not work in DuckDB.
        let sql = format!(
            "WITH matched AS ( \
                 SELECT fingerprint, session_start FROM hits WHERE {matched_clause} \
             ), \
             visitor_paths AS ( \
                 SELECT fingerprint, COUNT(DISTINCT path) AS paths FROM hits \
                 WHERE {day_clause} AND fingerprint IN (SELECT fingerprint FROM matched) \
                 GROUP BY fingerprint \
             ) \
             SELECT \
                 (SELECT COUNT(DISTINCT fingerprint) FROM matched), \
                 (SELECT COUNT(DISTINCT {SESSION_KEY}) FROM matched), \
                 (SELECT COUNT(*) FROM visitor_paths WHERE paths = 1)"
        );

        let params = filter.params();
        let counts = conn.prepare(&sql)?.query_row(params.as_slice(), |row| {
            Ok(VisitorCounts {
                visitors: row.get(0)?,
                sessions: row.get(1)?,
                bounces: row.get(2)?,
            })
        })?;
        Ok(counts)
    }

    /// Visitors and sessions per local hour of one day.
    pub async fn count_visitors_by_hour(
        &self,
        params: &QueryParams,
        day: NaiveDate,
        predicates: &Predicates,
    ) -> Result<Vec<HourStats>> {
        let conn = self.conn.lock().await;
        let mut filter = SqlFilter::new();
        filter.hits_of_day(params, day);
        filter.predicates(predicates);
        let where_clause = filter.sql();
        let offset = filter.bind(utc_offset_seconds(params, day));

        let sql = format!(
            "SELECT CAST(hour(created_at + to_seconds(CAST({offset} AS BIGINT))) AS BIGINT) AS h, \
                    COUNT(DISTINCT fingerprint), \
                    COUNT(DISTINCT {SESSION_KEY}) \
             FROM hits WHERE {where_clause} \
             GROUP BY h ORDER BY h"
        );

        let params = filter.params();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params.as_slice(), |row| {
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

    pub async fn count_visitors_by_dimension(
        &self,
        params: &QueryParams,
        day: NaiveDate,
        dimension: Dimension,
        predicates: &Predicates,
    ) -> Result<Vec<DimensionCount>> {
        let conn = self.conn.lock().await;
        let mut filter = SqlFilter::new();
        filter.hits_of_day(params, day);
        filter.predicates(predicates);
        let where_clause = filter.sql();
        let (value, label) = dimension_columns(dimension);

        let sql = format!(
            "SELECT {value} AS v, {label}, COUNT(DISTINCT fingerprint) \
             FROM hits WHERE {where_clause} \
             GROUP BY v ORDER BY v"
        );

        let params = filter.params();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params.as_slice(), |row| {
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

    pub async fn count_visitors_by_platform(
        &self,
        params: &QueryParams,
        day: NaiveDate,
        predicates: &Predicates,
    ) -> Result<PlatformCounts> {
        let conn = self.conn.lock().await;
        let mut filter = SqlFilter::new();
        filter.hits_of_day(params, day);
        filter.predicates(predicates);
        let where_clause = filter.sql();

        let sql = format!(
            "SELECT \
                 COUNT(DISTINCT CASE WHEN desktop THEN fingerprint END), \
                 COUNT(DISTINCT CASE WHEN NOT desktop AND mobile THEN fingerprint END), \
                 COUNT(DISTINCT CASE WHEN NOT desktop AND NOT mobile THEN fingerprint END) \
             FROM hits WHERE {where_clause}"
        );

        let params = filter.params();
        let counts = conn.prepare(&sql)?.query_row(params.as_slice(), |row| {
            Ok(PlatformCounts {
                desktop: row.get(0)?,
                mobile: row.get(1)?,
                unknown: row.get(2)?,
            })
        })?;
        Ok(counts)
    }
}
