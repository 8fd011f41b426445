use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// `GET /health` - answered for `footfall health` and load balancers.
///
/// Reports `"ok"` while the hit store accepts queries. A store that cannot be
/// reached yields `503` with `"degraded"`; tracking keeps accepting hits either
/// way, they are dropped by the workers until the store recovers.
#[tracing::instrument(skip(state))]
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let (status, label) = match state.db.ping().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::warn!(error = %e, "hit store did not answer ping");
            (StatusCode::SERVICE_UNAVAILABLE, "degraded")
        }
    };
    let body = json!({
        "status": label,
        "version": env!("CARGO_PKG_VERSION"),
    });
    (status, Json(body))
}
