use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use footfall_core::{Config, GeoDb};
use footfall_duckdb::DuckDbStore;
use footfall_server::geoip::MaxMindGeoDb;
use footfall_server::state::AppState;

/// `footfall health` - liveness check for Docker HEALTHCHECK.
///
/// Calls `GET http://localhost:$FOOTFALL_PORT/health`.
/// Exits 0 if the server responds with HTTP 200, exits 1 otherwise.
fn run_health_check() -> ! {
    let port = std::env::var("FOOTFALL_PORT").unwrap_or_else(|_| "3000".to_string());
    let url = format!("http://localhost:{}/health", port);
    match ureq::get(&url).call() {
        Ok(resp) if resp.status() == 200 => std::process::exit(0),
        _ => std::process::exit(1),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(|s| s.as_str()) == Some("health") {
        run_health_check();
    }
    // Structured JSON logging. Level controlled via RUST_LOG env var.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("footfall=info".parse()?),
        )
        .json()
        .init();

    let cfg = Config::from_env()?;

    std::fs::create_dir_all(&cfg.data_dir)?;
    let db_path = format!("{}/footfall.db", cfg.data_dir);
    let db = DuckDbStore::open(&db_path, &cfg.duckdb_memory_limit)?;

    let state = Arc::new(AppState::new(db, cfg.clone()));

    // A missing GeoIP database is not fatal: hits are stored without a country.
    if Path::new(&cfg.geoip_path).exists() {
        match MaxMindGeoDb::open(&cfg.geoip_path) {
            Ok(geo_db) => {
                let geo_db: Arc<dyn GeoDb> = Arc::new(geo_db);
                state.tracker.set_geo_db(Some(geo_db));
                info!(geoip_path = %cfg.geoip_path, "GeoIP database loaded");
            }
            Err(e) => warn!(error = %e, "GeoIP database unusable, country lookups disabled"),
        }
    } else {
        warn!(
            geoip_path = %cfg.geoip_path,
            "GeoIP database not found, country lookups disabled. \
             Set FOOTFALL_GEOIP_PATH to a GeoLite2 Country or City .mmdb file."
        );
    }

    // Roll up closed days now and at every local midnight.
    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            state.run_rollup_loop().await;
        });
    }

    let addr = format!("0.0.0.0:{}", cfg.port);
    let app = footfall_server::app::build_app(Arc::clone(&state));

    info!(port = cfg.port, timezone = %cfg.timezone, "Footfall listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        tokio::signal::ctrl_c().await.ok();
    })
    .await?;

    // Flush queued hits before exiting.
    if tokio::time::timeout(std::time::Duration::from_secs(10), state.tracker.stop())
        .await
        .is_err()
    {
        warn!("tracker did not stop within 10s, queued hits lost");
    }

    Ok(())
}
