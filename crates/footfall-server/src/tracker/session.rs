use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

const SESSION_SHARDS: usize = 16;
/// Shard size at which expired sessions are swept on insert.
const SWEEP_THRESHOLD: usize = 4096;

type SessionKey = (Option<i64>, String);

#[derive(Debug, Clone, Copy)]
struct SessionEntry {
    start: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

/// Most recent session of every visitor seen by one tracker.
pub(crate) struct SessionCache {
    shards: [Mutex<HashMap<SessionKey, SessionEntry>>; SESSION_SHARDS],
    max_age: Duration,
}

impl SessionCache {
    pub(crate) fn new(max_age: Duration) -> Self {
        Self {
            shards: std::array::from_fn(|_| Mutex::new(HashMap::new())),
            max_age,
        }
    }

    fn shard(
        &self,
        tenant_id: Option<i64>,
        fingerprint: &str,
    ) -> &Mutex<HashMap<SessionKey, SessionEntry>> {
        let mut hasher = DefaultHasher::new();
        tenant_id.hash(&mut hasher);
        fingerprint.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SESSION_SHARDS]
    }

    /// Session start of a visitor active within `max_age`, marking it seen at `now`.
    pub(crate) fn touch(
        &self,
        tenant_id: Option<i64>,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let mut map = self
            .shard(tenant_id, fingerprint)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let key = (tenant_id, fingerprint.to_string());
        match map.get_mut(&key) {
            Some(entry) if now - entry.last_seen <= self.max_age => {
                entry.last_seen = now;
                Some(entry.start)
            }
            Some(_) => {
                map.remove(&key);
                None
            }
            None => None,
        }
    }

    pub(crate) fn insert(
        &self,
        tenant_id: Option<i64>,
        fingerprint: &str,
        start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        let mut map = self
            .shard(tenant_id, fingerprint)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if map.len() >= SWEEP_THRESHOLD {
            let max_age = self.max_age;
            map.retain(|_, entry| now - entry.last_seen <= max_age);
        }
        map.insert(
            (tenant_id, fingerprint.to_string()),
            SessionEntry {
                start,
                last_seen: now,
            },
        );
    }
}
