use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use duckdb::Connection;
use tokio::sync::Mutex;
use tracing::{debug, info};

use footfall_core::{Hit, QueryParams};

use crate::schema::init_sql;

/// Timestamp format used for every `TIMESTAMP` parameter.
pub(crate) const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

pub(crate) fn ts(t: DateTime<Utc>) -> String {
    t.format(TS_FORMAT).to_string()
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .with_context(|| format!("invalid timestamp {raw:?}"))?;
    Ok(naive.and_utc())
}

pub(crate) fn parse_day(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").with_context(|| format!("invalid date {raw:?}"))
}

/// A DuckDB-backed [`footfall_core::Store`].
///
/// DuckDB is single-writer: concurrent reads are fine, but concurrent writes
/// cause contention. The connection sits behind `Arc<Mutex<_>>` so tracker
/// workers, the rollup job and query handlers all serialise through it.
///
/// Memory and thread limits are enforced by [`init_sql`] at open time.
#[derive(Clone)]
pub struct DuckDbStore {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl DuckDbStore {
    /// Open (or create) a DuckDB database file at `path`.
    ///
    /// `memory_limit` is a DuckDB size string such as `"1GB"` or `"512MB"`.
    pub fn open(path: &str, memory_limit: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(&init_sql(memory_limit))?;
        info!(path, memory_limit, "DuckDB opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database. Data is discarded when the store is dropped.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(&init_sql("1GB"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert a batch of hits in a single transaction. No-op for an empty batch.
    pub async fn insert_hits(&self, hits: &[Hit]) -> Result<()> {
        if hits.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        for hit in hits {
            let meta = if hit.meta.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&hit.meta)?)
            };
            tx.execute(
                r#"INSERT INTO hits (
                    tenant_id, fingerprint, session_start, path, url,
                    language, user_agent, referrer, referrer_name, referrer_icon,
                    os, os_version, browser, browser_version, country_code,
                    desktop, mobile, screen_width, screen_height, screen_class,
                    utm_source, utm_medium, utm_campaign, utm_content, utm_term,
                    meta, created_at
                ) VALUES (
                    ?1,  ?2,  ?3,  ?4,  ?5,
                    ?6,  ?7,  ?8,  ?9,  ?10,
                    ?11, ?12, ?13, ?14, ?15,
                    ?16, ?17, ?18, ?19, ?20,
                    ?21, ?22, ?23, ?24, ?25,
                    ?26, ?27
                )"#,
                duckdb::params![
                    hit.tenant_id,
                    hit.fingerprint,
                    hit.session.map(ts),
                    hit.path,
                    hit.url,
                    hit.language,
                    hit.user_agent,
                    hit.referrer,
                    hit.referrer_name,
                    hit.referrer_icon,
                    hit.os,
                    hit.os_version,
                    hit.browser,
                    hit.browser_version,
                    hit.country_code,
                    hit.desktop,
                    hit.mobile,
                    hit.screen_width,
                    hit.screen_height,
                    hit.screen_class,
                    hit.utm_source,
                    hit.utm_medium,
                    hit.utm_campaign,
                    hit.utm_content,
                    hit.utm_term,
                    meta,
                    ts(hit.time),
                ],
            )?;
        }

        tx.commit()?;
        debug!(count = hits.len(), "inserted hits into DuckDB");
        Ok(())
    }

    pub async fn delete_hits_by_day(&self, params: &QueryParams, day: NaiveDate) -> Result<()> {
        let conn = self.conn.lock().await;
        let (start, end) = params.day_bounds(day);
        let deleted = conn.execute(
            "DELETE FROM hits \
             WHERE tenant_id IS NOT DISTINCT FROM ?1 AND created_at >= ?2 AND created_at < ?3",
            duckdb::params![params.tenant_id, ts(start), ts(end)],
        )?;
        debug!(tenant_id = ?params.tenant_id, day = %day, deleted, "deleted rolled up hits");
        Ok(())
    }

    /// Latest session start of `fingerprint` among hits at or after `since`.
    pub async fn session(
        &self,
        params: &QueryParams,
        fingerprint: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().await;
        let raw: Option<String> = conn
            .prepare(
                "SELECT CAST(MAX(session_start) AS VARCHAR) FROM hits \
                 WHERE tenant_id IS NOT DISTINCT FROM ?1 AND fingerprint = ?2 AND created_at >= ?3",
            )?
            .query_row(
                duckdb::params![params.tenant_id, fingerprint, ts(since)],
                |row| row.get(0),
            )?;
        raw.as_deref().map(parse_ts).transpose()
    }

    /// Execute `SELECT 1` as a lightweight liveness check.
    pub async fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch("SELECT 1")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_round_trip_through_text() {
        let t = parse_ts("2024-05-01 10:11:12.345678").expect("ts");
        assert_eq!(ts(t), "2024-05-01 10:11:12.345678");
        assert_eq!(
            parse_ts("2024-05-01 10:11:12").expect("ts").to_rfc3339(),
            "2024-05-01T10:11:12+00:00"
        );
    }
}
