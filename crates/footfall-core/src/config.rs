use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use rand::RngCore;

use crate::error::ConfigError;

pub const DEFAULT_WORKER_BUFFER_SIZE: usize = 100;
pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_WORKER_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_SESSION_MAX_AGE: Duration = Duration::from_secs(30 * 60);

/// Tuning knobs for the ingestion pipeline.
///
/// Zero values mean "use the default"; call [`TrackerConfig::validate`] before use.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerConfig {
    /// Number of worker tasks. Defaults to the available CPU parallelism.
    pub worker: usize,
    /// Hits a worker collects before it flushes.
    pub worker_buffer_size: usize,
    /// Longest time a worker waits between flushes. Clamped to [`MAX_WORKER_TIMEOUT`].
    pub worker_timeout: Duration,
    pub referrer_domain_blacklist: Vec<String>,
    pub referrer_domain_blacklist_includes_subdomains: bool,
    pub sessions: bool,
    pub session_max_age: Duration,
}

impl TrackerConfig {
    pub fn validate(&mut self) {
        if self.worker == 0 {
            self.worker = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
        }

        if self.worker_buffer_size == 0 {
            self.worker_buffer_size = DEFAULT_WORKER_BUFFER_SIZE;
        }

        if self.worker_timeout.is_zero() {
            self.worker_timeout = DEFAULT_WORKER_TIMEOUT;
        } else if self.worker_timeout > MAX_WORKER_TIMEOUT {
            self.worker_timeout = MAX_WORKER_TIMEOUT;
        }

        if self.session_max_age.is_zero() {
            self.session_max_age = DEFAULT_SESSION_MAX_AGE;
        }

        self.referrer_domain_blacklist = self
            .referrer_domain_blacklist
            .iter()
            .map(|d| d.trim().to_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: String,
    pub geoip_path: String,
    /// Secret mixed into every visitor fingerprint.
    pub salt: String,
    /// Time zone used for day boundaries in queries and rollups.
    pub timezone: Tz,
    pub duckdb_memory_limit: String,
    pub tracker: TrackerConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let salt = match lookup("FOOTFALL_SALT").filter(|s| !s.is_empty()) {
            Some(salt) => salt,
            None => {
                tracing::warn!(
                    "FOOTFALL_SALT is not set; using a random salt, fingerprints will change on restart"
                );
                random_salt()
            }
        };

        let timezone = match lookup("FOOTFALL_TIMEZONE") {
            Some(raw) => raw.parse::<Tz>().map_err(|e| ConfigError::Invalid {
                name: "FOOTFALL_TIMEZONE",
                reason: e.to_string(),
            })?,
            None => Tz::UTC,
        };

        let mut tracker = TrackerConfig {
            worker: parse_or(&lookup, "FOOTFALL_WORKERS", 0)?,
            worker_buffer_size: parse_or(&lookup, "FOOTFALL_WORKER_BUFFER_SIZE", 0)?,
            worker_timeout: Duration::from_millis(parse_or(
                &lookup,
                "FOOTFALL_WORKER_TIMEOUT_MS",
                0,
            )?),
            referrer_domain_blacklist: lookup("FOOTFALL_REFERRER_BLACKLIST")
                .map(|v| v.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
            referrer_domain_blacklist_includes_subdomains: parse_bool(
                &lookup,
                "FOOTFALL_REFERRER_BLACKLIST_SUBDOMAINS",
            ),
            sessions: parse_bool(&lookup, "FOOTFALL_SESSIONS"),
            session_max_age: Duration::from_secs(parse_or(
                &lookup,
                "FOOTFALL_SESSION_MAX_AGE_SECS",
                0,
            )?),
        };
        tracker.validate();

        Ok(Self {
            port: parse_or(&lookup, "FOOTFALL_PORT", 3000)?,
            data_dir: lookup("FOOTFALL_DATA_DIR").unwrap_or_else(|| "./data".to_string()),
            geoip_path: lookup("FOOTFALL_GEOIP_PATH")
                .unwrap_or_else(|| "./GeoLite2-Country.mmdb".to_string()),
            salt,
            timezone,
            duckdb_memory_limit: lookup("FOOTFALL_DUCKDB_MEMORY")
                .unwrap_or_else(|| "1GB".to_string()),
            tracker,
        })
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        self.tracker.clone()
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_bool<F>(lookup: &F, name: &str) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn random_salt() -> String {
    let mut buf = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}
