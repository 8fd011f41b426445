use anyhow::Result;
use chrono::{DateTime, Utc};

use footfall_core::stats::PathCount;
use footfall_core::{Predicates, QueryParams};

use crate::queries::SqlFilter;
use crate::DuckDbStore;

impl DuckDbStore {
    /// Distinct visitors with a matching hit at or after `since`.
    pub async fn active_visitors(
        &self,
        params: &QueryParams,
        since: DateTime<Utc>,
        predicates: &Predicates,
    ) -> Result<i64> {
        let conn = self.conn.lock().await;
        let mut filter = SqlFilter::new();
        filter.tenant(params.tenant_id);
        filter.since(since);
        filter.predicates(predicates);
        let where_clause = filter.sql();

        let sql = format!("SELECT COUNT(DISTINCT fingerprint) FROM hits WHERE {where_clause}");

        let sql_params = filter.params();
        let visitors = conn
            .prepare(&sql)?
            .query_row(sql_params.as_slice(), |row| row.get(0))?;
        Ok(visitors)
    }

    /// Active visitors per path, most visited first.
    pub async fn active_page_visitors(
        &self,
        params: &QueryParams,
        since: DateTime<Utc>,
        predicates: &Predicates,
    ) -> Result<Vec<PathCount>> {
        let conn = self.conn.lock().await;
        let mut filter = SqlFilter::new();
        filter.tenant(params.tenant_id);
        filter.since(since);
        filter.predicates(predicates);
        let where_clause = filter.sql();

        let sql = format!(
            "SELECT path, COUNT(DISTINCT fingerprint) AS visitors \
             FROM hits WHERE {where_clause} \
             GROUP BY path ORDER BY visitors DESC, path ASC"
        );

        let sql_params = filter.params();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(sql_params.as_slice(), |row| {
            Ok(PathCount {
                path: row.get(0)?,
                visitors: row.get(1)?,
            })
        })?;

        let mut pages = Vec::new();
        for row in rows {
            pages.push(row?);
        }
        Ok(pages)
    }
}
