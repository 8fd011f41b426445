pub mod discovery;
pub mod live;
pub mod realtime;
pub mod rollups;

use chrono::{DateTime, NaiveDate, Offset, TimeZone, Utc};
use duckdb::types::ToSql;

use footfall_core::filter::Predicates;
use footfall_core::{DayRange, Platform, QueryParams};

use crate::backend::ts;

/// Distinct key of one session: the fingerprint plus its session start.
pub(crate) const SESSION_KEY: &str =
    "fingerprint || '|' || COALESCE(CAST(session_start AS VARCHAR), '')";

/// Incrementally built `WHERE` clause with numbered `?N` placeholders.
///
/// Placeholders are numbered in bind order, so a clause rendered by [`sql`]
/// can be repeated inside one statement (e.g. in a CTE) with the same
/// parameter list.
///
/// [`sql`]: SqlFilter::sql
#[derive(Default)]
pub(crate) struct SqlFilter {
    clauses: Vec<String>,
    params: Vec<Box<dyn ToSql>>,
}

impl SqlFilter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Bind a parameter and return its placeholder.
    pub(crate) fn bind<T: ToSql + 'static>(&mut self, value: T) -> String {
        self.params.push(Box::new(value));
        format!("?{}", self.params.len())
    }

    pub(crate) fn push(&mut self, clause: impl Into<String>) {
        self.clauses.push(clause.into());
    }

    pub(crate) fn tenant(&mut self, tenant_id: Option<i64>) {
        let p = self.bind(tenant_id);
        self.push(format!("tenant_id IS NOT DISTINCT FROM {p}"));
    }

    pub(crate) fn since(&mut self, since: DateTime<Utc>) {
        let p = self.bind(ts(since));
        self.push(format!("created_at >= {p}"));
    }

    pub(crate) fn before(&mut self, end: DateTime<Utc>) {
        let p = self.bind(ts(end));
        self.push(format!("created_at < {p}"));
    }

    /// Raw hits of one local day.
    pub(crate) fn hits_of_day(&mut self, params: &QueryParams, day: NaiveDate) {
        let (start, end) = params.day_bounds(day);
        self.tenant(params.tenant_id);
        self.since(start);
        self.before(end);
    }

    /// Rollup rows of a tenant within `range` for one path scope.
    pub(crate) fn rollups(&mut self, params: &QueryParams, range: DayRange, path: Option<&str>) {
        self.tenant(params.tenant_id);
        self.days(range);
        let p = self.bind(path.unwrap_or_default().to_string());
        self.push(format!("path = {p}"));
    }

    pub(crate) fn days(&mut self, range: DayRange) {
        if let Some(from) = range.from {
            let p = self.bind(from.to_string());
            self.push(format!("day >= CAST({p} AS DATE)"));
        }
        let p = self.bind(range.to.to_string());
        self.push(format!("day <= CAST({p} AS DATE)"));
    }

    pub(crate) fn predicates(&mut self, predicates: &Predicates) {
        if let Some(since) = predicates.since {
            self.since(since);
        }
        for (field, value) in &predicates.fields {
            let p = self.bind(value.clone());
            self.push(format!("COALESCE({}, '') = {p}", field.column()));
        }
        if let Some(platform) = predicates.platform {
            self.push(match platform {
                Platform::Desktop => "desktop",
                Platform::Mobile => "NOT desktop AND mobile",
                Platform::Unknown => "NOT desktop AND NOT mobile",
            });
        }
    }

    pub(crate) fn sql(&self) -> String {
        if self.clauses.is_empty() {
            "TRUE".to_string()
        } else {
            self.clauses.join(" AND ")
        }
    }

    pub(crate) fn params(&self) -> Vec<&dyn ToSql> {
        self.params.iter().map(|p| p.as_ref()).collect()
    }
}

/// UTC offset in seconds of `params`' time zone at the start of `day`.
///
/// Used to shift stored UTC timestamps into local hours.
pub(crate) fn utc_offset_seconds(params: &QueryParams, day: NaiveDate) -> i64 {
    let start = params.day_start(day);
    params
        .timezone
        .offset_from_utc_datetime(&start.naive_utc())
        .fix()
        .local_minus_utc() as i64
}
