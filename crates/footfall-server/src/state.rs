use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{error, info};

use footfall_core::config::MAX_WORKER_TIMEOUT;
use footfall_core::{Analyzer, Config, Processor, QueryParams, Store};
use footfall_duckdb::DuckDbStore;

use crate::tracker::Tracker;

/// Shared application state injected into every Axum handler via
/// [`axum::extract::State`].
pub struct AppState {
    /// The DuckDB store, kept concrete for the health check.
    pub db: Arc<DuckDbStore>,

    /// The same store behind the storage trait.
    pub store: Arc<dyn Store>,

    /// Parsed configuration, loaded once at startup from environment variables.
    pub config: Arc<Config>,

    pub tracker: Tracker,
    pub analyzer: Analyzer,
    pub processor: Processor,
}

impl AppState {
    /// Wire the store into a tracker, analyzer and processor.
    ///
    /// Starts the tracker workers, so it must run inside a tokio runtime.
    pub fn new(db: DuckDbStore, config: Config) -> Self {
        let db = Arc::new(db);
        let store: Arc<dyn Store> = db.clone();
        let tracker = Tracker::new(
            Arc::clone(&store),
            config.salt.clone(),
            config.tracker_config(),
        );
        let analyzer = Analyzer::with_timezone(Arc::clone(&store), config.timezone);
        let processor = Processor::with_timezone(Arc::clone(&store), config.timezone);

        Self {
            db,
            store,
            config: Arc::new(config),
            tracker,
            analyzer,
            processor,
        }
    }

    /// Background loop: roll up closed days, then sleep until shortly after the
    /// next local midnight and repeat.
    ///
    /// The first pass runs immediately so days closed while the server was
    /// down are picked up. A failed pass is logged and retried next midnight.
    pub async fn run_rollup_loop(self: Arc<Self>) {
        let params = QueryParams::new(None, self.config.timezone);
        loop {
            match self.processor.run().await {
                Ok(days) => info!(days, "rollup finished"),
                Err(e) => error!(error = %e, "rollup failed, retrying at next midnight"),
            }

            let now = Utc::now();
            let next_midnight = params.day_start(params.today() + Duration::days(1));
            // Wait out the longest tracker flush so hits buffered before midnight
            // are stored before their day is rolled up.
            let secs_until = (next_midnight - now).num_seconds().max(0) as u64
                + MAX_WORKER_TIMEOUT.as_secs()
                + 1;
            tokio::time::sleep(std::time::Duration::from_secs(secs_until)).await;
        }
    }
}
