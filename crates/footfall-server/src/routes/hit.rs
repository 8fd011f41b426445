use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode, Uri},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use footfall_core::HitOptions;

use crate::{
    error::AppError,
    state::AppState,
    tracker::request::{MaybeConnectInfo, RequestInfo},
};

/// Longest accepted page URL.
const MAX_URL_LEN: usize = 2048;

/// Body of `POST /api/hit`.
#[derive(Debug, Default, Deserialize)]
pub struct HitPayload {
    pub tenant_id: Option<i64>,
    /// Full URL of the viewed page.
    pub url: String,
    /// Overrides the path taken from `url`.
    pub path: Option<String>,
    /// `document.referrer` of the page, preferred over the `Referer` header.
    pub referrer: Option<String>,
    #[serde(default)]
    pub screen_width: u32,
    #[serde(default)]
    pub screen_height: u32,
    /// Extra entropy for the visitor fingerprint.
    pub signal: Option<String>,
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
}

impl HitPayload {
    fn into_options(self) -> HitOptions {
        HitOptions {
            tenant_id: self.tenant_id,
            url: Some(self.url),
            path: self.path,
            referrer: self.referrer,
            screen_width: self.screen_width,
            screen_height: self.screen_height,
            visitor_signal: self.signal,
            meta: self.meta,
            ..Default::default()
        }
    }
}

/// `POST /api/hit` - track one page view.
///
/// Always answers `202 Accepted` for a well-formed body: bots, blacklisted
/// referrers and full queues are handled silently by the tracker.
#[tracing::instrument(skip_all)]
pub async fn hit(
    State(state): State<Arc<AppState>>,
    MaybeConnectInfo(remote_addr): MaybeConnectInfo,
    headers: HeaderMap,
    uri: Uri,
    Json(payload): Json<HitPayload>,
) -> Result<impl IntoResponse, AppError> {
    let url = payload.url.trim();
    if url.is_empty() {
        return Err(AppError::InvalidField {
            field: "url",
            message: "url is required".to_string(),
        });
    }
    if url.len() > MAX_URL_LEN {
        return Err(AppError::InvalidField {
            field: "url",
            message: format!("url exceeds {MAX_URL_LEN} characters"),
        });
    }

    let request = RequestInfo::new(headers, uri, remote_addr);
    state
        .tracker
        .hit(request, Some(payload.into_options()))
        .await;

    Ok((StatusCode::ACCEPTED, Json(json!({ "ok": true }))))
}
