/// DuckDB initialization SQL.
///
/// Executed once at open time via `Connection::execute_batch`. Every statement
/// uses `IF NOT EXISTS`, so re-running it on startup is safe.
///
/// `memory_limit` is a DuckDB size string such as `"512MB"` or `"1GB"`
/// (env `FOOTFALL_DUCKDB_MEMORY`). Always set an explicit limit: the DuckDB
/// default of 80% of system RAM is not acceptable for a server process.
///
/// Timestamps are stored as UTC `TIMESTAMP`. Rollup tables store the site-wide
/// row with `path = ''`. `tenant_id` is nullable and compared with
/// `IS NOT DISTINCT FROM`, so rollup keys are not declared as constraints;
/// merge-on-write is done by the save functions instead.
pub fn init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

-- ===========================================
-- RAW HITS (today and days not yet rolled up)
-- ===========================================
CREATE TABLE IF NOT EXISTS hits (
    tenant_id       BIGINT,
    fingerprint     VARCHAR NOT NULL,
    session_start   TIMESTAMP,                     -- NULL when sessions are disabled
    path            VARCHAR NOT NULL,
    url             VARCHAR NOT NULL,
    language        VARCHAR NOT NULL DEFAULT '',
    user_agent      VARCHAR NOT NULL DEFAULT '',
    referrer        VARCHAR,
    referrer_name   VARCHAR,
    referrer_icon   VARCHAR,
    os              VARCHAR NOT NULL DEFAULT '',
    os_version      VARCHAR NOT NULL DEFAULT '',
    browser         VARCHAR NOT NULL DEFAULT '',
    browser_version VARCHAR NOT NULL DEFAULT '',
    country_code    VARCHAR NOT NULL DEFAULT '',
    desktop         BOOLEAN NOT NULL DEFAULT FALSE,
    mobile          BOOLEAN NOT NULL DEFAULT FALSE,
    screen_width    INTEGER NOT NULL DEFAULT 0,
    screen_height   INTEGER NOT NULL DEFAULT 0,
    screen_class    VARCHAR NOT NULL DEFAULT '',
    utm_source      VARCHAR,
    utm_medium      VARCHAR,
    utm_campaign    VARCHAR,
    utm_content     VARCHAR,
    utm_term        VARCHAR,
    meta            VARCHAR,                       -- JSON object, NULL when empty
    created_at      TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_hits_tenant_time
    ON hits(tenant_id, created_at);
CREATE INDEX IF NOT EXISTS idx_hits_fingerprint
    ON hits(tenant_id, fingerprint, created_at);

-- ===========================================
-- DAILY ROLLUPS
-- ===========================================
CREATE TABLE IF NOT EXISTS visitor_stats (
    tenant_id        BIGINT,
    day              DATE NOT NULL,
    path             VARCHAR NOT NULL DEFAULT '',
    visitors         BIGINT NOT NULL DEFAULT 0,
    sessions         BIGINT NOT NULL DEFAULT 0,
    bounces          BIGINT NOT NULL DEFAULT 0,
    platform_desktop BIGINT NOT NULL DEFAULT 0,
    platform_mobile  BIGINT NOT NULL DEFAULT 0,
    platform_unknown BIGINT NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_visitor_stats_key
    ON visitor_stats(tenant_id, day, path);

CREATE TABLE IF NOT EXISTS visitor_time_stats (
    tenant_id       BIGINT,
    day             DATE NOT NULL,
    path            VARCHAR NOT NULL DEFAULT '',
    hour            INTEGER NOT NULL,
    visitors        BIGINT NOT NULL DEFAULT 0,
    sessions        BIGINT NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_visitor_time_stats_key
    ON visitor_time_stats(tenant_id, day, path, hour);

{dimension_tables}"#,
        dimension_tables = dimension_tables_sql(),
    )
}

const DIMENSION_TABLES: [&str; 6] = [
    "language_stats",
    "referrer_stats",
    "os_stats",
    "browser_stats",
    "country_stats",
    "screen_stats",
];

fn dimension_tables_sql() -> String {
    DIMENSION_TABLES
        .iter()
        .map(|table| {
            format!(
                r#"CREATE TABLE IF NOT EXISTS {table} (
    tenant_id       BIGINT,
    day             DATE NOT NULL,
    path            VARCHAR NOT NULL DEFAULT '',
    value           VARCHAR NOT NULL,
    label           VARCHAR,
    visitors        BIGINT NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_{table}_key
    ON {table}(tenant_id, day, path, value);
"#
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use footfall_core::stats::Dimension;

    use super::*;

    #[test]
    fn every_dimension_has_a_table() {
        let sql = init_sql("1GB");
        for dimension in Dimension::ALL {
            assert!(
                sql.contains(&format!("CREATE TABLE IF NOT EXISTS {} (", dimension.table())),
                "missing table for {dimension}"
            );
        }
    }
}
