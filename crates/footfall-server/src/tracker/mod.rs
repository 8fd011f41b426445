//! Page-view ingestion.
//!
//! [`Tracker::hit`] enriches one request into a [`Hit`] and hands it to a
//! fixed pool of workers, each owning a bounded queue. Workers batch hits and
//! save them through the [`Store`]. A full queue drops the hit instead of
//! blocking the request.

pub mod request;
mod session;
mod worker;

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use footfall_core::{
    referrer, screen, visitor, GeoDb, Hit, HitOptions, QueryParams, Store, TrackerConfig,
};

use crate::bot_detection;
use request::{page_url, parse_user_agent, RequestInfo, Utm};
use session::SessionCache;

pub struct Tracker {
    store: Arc<dyn Store>,
    salt: String,
    config: TrackerConfig,
    senders: RwLock<Vec<mpsc::Sender<Hit>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
    geo_db: RwLock<Option<Arc<dyn GeoDb>>>,
    sessions: SessionCache,
}

impl Tracker {
    /// Start a tracker and its workers. Must be called inside a tokio runtime.
    pub fn new(store: Arc<dyn Store>, salt: impl Into<String>, mut config: TrackerConfig) -> Self {
        config.validate();

        let mut senders = Vec::with_capacity(config.worker);
        let mut workers = Vec::with_capacity(config.worker);
        for id in 0..config.worker {
            let (tx, rx) = mpsc::channel(config.worker_buffer_size);
            senders.push(tx);
            workers.push(tokio::spawn(worker::run(
                id,
                Arc::clone(&store),
                rx,
                config.worker_buffer_size,
                config.worker_timeout,
            )));
        }

        let max_age = chrono::Duration::from_std(config.session_max_age)
            .unwrap_or_else(|_| chrono::Duration::minutes(30));
        info!(
            workers = config.worker,
            buffer_size = config.worker_buffer_size,
            timeout_ms = config.worker_timeout.as_millis() as u64,
            sessions = config.sessions,
            "tracker started"
        );

        Self {
            store,
            salt: salt.into(),
            config,
            senders: RwLock::new(senders),
            workers: Mutex::new(workers),
            stopped: AtomicBool::new(false),
            geo_db: RwLock::new(None),
            sessions: SessionCache::new(max_age),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Replace the GeoIP database; `None` disables country lookups.
    pub fn set_geo_db(&self, geo_db: Option<Arc<dyn GeoDb>>) {
        *self.geo_db.write().unwrap_or_else(PoisonError::into_inner) = geo_db;
    }

    fn geo_db(&self) -> Option<Arc<dyn GeoDb>> {
        self.geo_db
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Track one page view.
    ///
    /// Bots and hits arriving after [`Tracker::stop`] are dropped silently.
    /// Returns once the hit is queued or discarded.
    pub async fn hit(&self, request: impl Into<RequestInfo>, options: Option<HitOptions>) {
        if self.stopped.load(Ordering::Acquire) {
            debug!("tracker stopped, hit discarded");
            return;
        }

        let request = request.into();
        let verdict = bot_detection::classify(&request);
        if verdict.is_bot {
            debug!(score = verdict.score, reason = ?verdict.reason, "bot hit rejected");
            return;
        }

        let options = options.unwrap_or_default();
        let now = Utc::now();
        let mut hit = self.build_hit(&request, &options, now);

        if self.config.sessions {
            hit.session = Some(self.session(hit.tenant_id, &hit.fingerprint, now).await);
        }

        if let (Some(geo_db), Some(ip)) = (self.geo_db(), request.client_ip()) {
            hit.country_code = geo_db.country_code(ip).unwrap_or_default();
        }

        self.enqueue(hit);
    }

    fn build_hit(&self, request: &RequestInfo, options: &HitOptions, now: DateTime<Utc>) -> Hit {
        let user_agent = request.user_agent().to_string();
        let ip = request
            .client_ip()
            .map(|ip| ip.to_string())
            .unwrap_or_default();
        let fingerprint = visitor::fingerprint(
            &self.salt,
            &ip,
            &user_agent,
            options.visitor_signal.as_deref(),
        );

        let url = options
            .url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| request.uri.to_string());
        let page = page_url(&url);
        let path = options
            .path
            .clone()
            .filter(|p| !p.trim().is_empty())
            .or_else(|| page.as_ref().map(|u| u.path().to_string()))
            .unwrap_or_else(|| request.uri.path().to_string());
        let utm = page.as_ref().map(Utm::from_url).unwrap_or_default();

        let blacklist = options
            .referrer_domain_blacklist
            .as_deref()
            .unwrap_or(&self.config.referrer_domain_blacklist);
        let include_subdomains = options
            .referrer_domain_blacklist_includes_subdomains
            .unwrap_or(self.config.referrer_domain_blacklist_includes_subdomains);
        let raw_referrer = options
            .referrer
            .clone()
            .filter(|r| !r.trim().is_empty())
            .or_else(|| request.referer_header().map(str::to_string))
            .or_else(|| request.referrer_param());
        let referrer = raw_referrer
            .as_deref()
            .and_then(|raw| referrer::resolve(raw, blacklist, include_subdomains));

        let ua = parse_user_agent(&user_agent);

        Hit {
            tenant_id: options.tenant_id,
            fingerprint,
            session: None,
            path: if path.is_empty() { "/".to_string() } else { path },
            url,
            language: request.language(),
            user_agent,
            referrer: referrer.as_ref().map(|r| r.url.clone()),
            referrer_name: referrer.as_ref().map(|r| r.name.clone()),
            referrer_icon: referrer.and_then(|r| r.icon),
            os: ua.os,
            os_version: ua.os_version,
            browser: ua.browser,
            browser_version: ua.browser_version,
            country_code: String::new(),
            desktop: ua.desktop,
            mobile: ua.mobile,
            screen_width: options.screen_width,
            screen_height: options.screen_height,
            screen_class: screen::screen_class(options.screen_width).to_string(),
            utm_source: utm.source,
            utm_medium: utm.medium,
            utm_campaign: utm.campaign,
            utm_content: utm.content,
            utm_term: utm.term,
            meta: options.meta.clone(),
            time: now,
        }
    }

    /// Session start for a visitor: the cached one, the latest stored one
    /// within `session_max_age`, or a new session starting `now`.
    async fn session(
        &self,
        tenant_id: Option<i64>,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        if let Some(start) = self.sessions.touch(tenant_id, fingerprint, now) {
            return start;
        }

        let since = now
            - chrono::Duration::from_std(self.config.session_max_age)
                .unwrap_or_else(|_| chrono::Duration::minutes(30));
        let start = match self
            .store
            .session(&QueryParams::utc(tenant_id), fingerprint, since)
            .await
        {
            Ok(Some(start)) => start,
            Ok(None) => now,
            Err(e) => {
                warn!(error = %e, "session lookup failed, starting a new session");
                now
            }
        };
        self.sessions.insert(tenant_id, fingerprint, start, now);
        start
    }

    fn enqueue(&self, hit: Hit) {
        let senders = self.senders.read().unwrap_or_else(PoisonError::into_inner);
        if senders.is_empty() {
            debug!("tracker stopped, hit discarded");
            return;
        }

        let index = worker_index(&hit.fingerprint, senders.len());
        match senders[index].try_send(hit) {
            Ok(()) => {}
            Err(TrySendError::Full(hit)) => {
                warn!(worker = index, path = %hit.path, "worker queue full, hit discarded");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(worker = index, "worker closed, hit discarded");
            }
        }
    }

    /// Stop intake, flush every worker and wait for them to exit.
    ///
    /// Calling `stop` again is a no-op.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        // Dropping the senders lets each worker drain its queue and exit.
        let senders = {
            let mut guard = self.senders.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        drop(senders);

        let workers = std::mem::take(&mut *self.workers.lock().await);
        for handle in workers {
            if let Err(e) = handle.await {
                error!(error = %e, "tracker worker panicked");
            }
        }
        info!("tracker stopped");
    }
}

/// Worker owning a fingerprint, so one visitor's hits stay in order.
fn worker_index(fingerprint: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    fingerprint.hash(&mut hasher);
    (hasher.finish() as usize) % workers
}
