use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::json;

use footfall_core::stats::Dimension;
use footfall_core::{Filter, Platform};

use crate::{error::AppError, state::AppState};

/// Window of `GET /api/stats/active` when `seconds` is not given.
const DEFAULT_ACTIVE_SECONDS: i64 = 600;

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    pub tenant_id: Option<i64>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub day: Option<String>,
    pub start: Option<String>,
    pub path: Option<String>,
    pub language: Option<String>,
    pub country: Option<String>,
    pub referrer: Option<String>,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub platform: Option<String>,
    pub screen_class: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_content: Option<String>,
    pub utm_term: Option<String>,
    pub limit: Option<i64>,
    /// Realtime window for `/api/stats/active`.
    pub seconds: Option<i64>,
}

fn parse_day(field: &'static str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, AppError> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|day| Some(day.and_time(NaiveTime::MIN).and_utc()))
        .map_err(|_| AppError::InvalidField {
            field,
            message: format!("{field} must be a date formatted as YYYY-MM-DD"),
        })
}

impl StatsQuery {
    /// Build the query filter. Validation and clamping happen in the analyzer.
    pub fn to_filter(&self) -> Result<Filter, AppError> {
        let start = match self.start.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|_| AppError::InvalidField {
                        field: "start",
                        message: "start must be an RFC 3339 timestamp".to_string(),
                    })?,
            ),
            None => None,
        };
        let platform = match self.platform.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(raw) => Some(raw.parse::<Platform>().map_err(|message| {
                AppError::InvalidField {
                    field: "platform",
                    message,
                }
            })?),
            None => None,
        };

        Ok(Filter {
            tenant_id: self.tenant_id,
            from: parse_day("from", self.from.as_deref())?,
            to: parse_day("to", self.to.as_deref())?,
            day: parse_day("day", self.day.as_deref())?,
            start,
            path: self.path.clone(),
            language: self.language.clone(),
            country: self.country.clone(),
            referrer: self.referrer.clone(),
            os: self.os.clone(),
            os_version: self.os_version.clone(),
            browser: self.browser.clone(),
            browser_version: self.browser_version.clone(),
            platform,
            screen_class: self.screen_class.clone(),
            utm_source: self.utm_source.clone(),
            utm_medium: self.utm_medium.clone(),
            utm_campaign: self.utm_campaign.clone(),
            utm_content: self.utm_content.clone(),
            utm_term: self.utm_term.clone(),
            limit: self.limit.unwrap_or(0),
        })
    }
}

/// `GET /api/stats/visitors` - visitors, sessions and bounces per day.
pub async fn visitors(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filter = query.to_filter()?;
    let data = state.analyzer.visitors(Some(&filter)).await?;
    Ok(Json(json!({ "data": data })))
}

/// `GET /api/stats/pages` - daily visitors per page.
pub async fn pages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filter = query.to_filter()?;
    let data = state.analyzer.page_visitors(Some(&filter)).await?;
    Ok(Json(json!({ "data": data })))
}

/// `GET /api/stats/hours` - visitors per hour of day over the range.
pub async fn hours(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filter = query.to_filter()?;
    let data = state.analyzer.visitor_hours(Some(&filter)).await?;
    Ok(Json(json!({ "data": data })))
}

/// `GET /api/stats/time-of-day` - the hourly distribution of each day.
pub async fn time_of_day(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filter = query.to_filter()?;
    let data = state.analyzer.time_of_day(Some(&filter)).await?;
    Ok(Json(json!({ "data": data })))
}

async fn dimension(
    state: &AppState,
    query: &StatsQuery,
    dimension: Dimension,
) -> Result<Json<serde_json::Value>, AppError> {
    let filter = query.to_filter()?;
    let data = state.analyzer.dimension(dimension, Some(&filter)).await?;
    Ok(Json(json!({ "data": data })))
}

/// `GET /api/stats/top-pages` - pages ranked by visitors.
pub async fn top_pages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    dimension(&state, &query, Dimension::Path).await
}

pub async fn languages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    dimension(&state, &query, Dimension::Language).await
}

pub async fn referrers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    dimension(&state, &query, Dimension::Referrer).await
}

pub async fn os(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    dimension(&state, &query, Dimension::Os).await
}

pub async fn browsers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    dimension(&state, &query, Dimension::Browser).await
}

pub async fn countries(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    dimension(&state, &query, Dimension::Country).await
}

pub async fn screens(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    dimension(&state, &query, Dimension::Screen).await
}

/// `GET /api/stats/platforms` - desktop, mobile and unknown visitors.
pub async fn platforms(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filter = query.to_filter()?;
    let data = state.analyzer.platforms(Some(&filter)).await?;
    Ok(Json(json!({ "data": data })))
}

/// `GET /api/stats/active` - visitors seen in the last `seconds` (default 600).
pub async fn active(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let seconds = query.seconds.unwrap_or(DEFAULT_ACTIVE_SECONDS);
    if seconds <= 0 {
        return Err(AppError::InvalidField {
            field: "seconds",
            message: "seconds must be positive".to_string(),
        });
    }
    let window = chrono::Duration::try_seconds(seconds).ok_or_else(|| AppError::InvalidField {
        field: "seconds",
        message: format!("seconds must be at most {}", i64::MAX / 1000),
    })?;
    let filter = query.to_filter()?;
    let data = state
        .analyzer
        .active_visitors(Some(&filter), window)
        .await?;
    Ok(Json(json!({ "data": data })))
}
