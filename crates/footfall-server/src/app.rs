use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{error::AppError, routes, state::AppState};

/// Construct the Axum [`Router`] with all routes and middleware attached.
///
/// Middleware is applied in outer-to-inner order (outermost runs first on
/// request, last on response):
///
/// 1. `CorsLayer`: permissive CORS, the hit endpoint is called from
///    third-party pages.
/// 2. `TraceLayer`: structured request/response logging via `tracing`.
/// 3. `CompressionLayer`: gzip for the stats responses.
pub fn build_app(state: Arc<AppState>) -> Router {
    let stats = Router::new()
        .route("/visitors", get(routes::stats::visitors))
        .route("/pages", get(routes::stats::pages))
        .route("/top-pages", get(routes::stats::top_pages))
        .route("/hours", get(routes::stats::hours))
        .route("/time-of-day", get(routes::stats::time_of_day))
        .route("/languages", get(routes::stats::languages))
        .route("/referrers", get(routes::stats::referrers))
        .route("/os", get(routes::stats::os))
        .route("/browsers", get(routes::stats::browsers))
        .route("/countries", get(routes::stats::countries))
        .route("/screens", get(routes::stats::screens))
        .route("/platforms", get(routes::stats::platforms))
        .route("/active", get(routes::stats::active))
        .layer(CompressionLayer::new());

    Router::new()
        .route("/health", get(routes::health::health))
        .route("/api/hit", post(routes::hit::hit))
        .nest("/api/stats", stats)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn not_found() -> AppError {
    AppError::NotFound("no such route".to_string())
}
