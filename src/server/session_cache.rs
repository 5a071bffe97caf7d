//! Ephemeral per-attempt key/value cache
//!
//! Holds CMI writes that arrive over HTTP between commits. Each attempt owns
//! a disjoint entry, so concurrent attempts never contend on the same value.
//! Entries expire `ttl` after their last access.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::SessionCacheSettings;

#[derive(Debug, Clone)]
struct CachedSession {
    values: BTreeMap<String, String>,
    last_access: Instant,
}

impl CachedSession {
    fn new(now: Instant) -> Self {
        Self {
            values: BTreeMap::new(),
            last_access: now,
        }
    }

    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_access) >= ttl
    }
}

/// Session cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct SessionCacheStats {
    pub total_sessions: usize,
    pub expired_sessions: usize,
    pub active_sessions: usize,
    pub cached_keys: usize,
}

pub struct SessionCache {
    sessions: DashMap<String, CachedSession>,
    ttl: Duration,
}

impl SessionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    pub fn from_settings(settings: &SessionCacheSettings) -> Self {
        Self::new(Duration::from_secs(settings.ttl_secs))
    }

    pub fn put(&self, attempt_id: &str, key: &str, value: &str) {
        let now = Instant::now();
        let mut session = self
            .sessions
            .entry(attempt_id.to_string())
            .or_insert_with(|| CachedSession::new(now));
        session.values.insert(key.to_string(), value.to_string());
        session.last_access = now;
    }

    pub fn put_all<I, K, V>(&self, attempt_id: &str, values: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let now = Instant::now();
        let mut session = self
            .sessions
            .entry(attempt_id.to_string())
            .or_insert_with(|| CachedSession::new(now));
        session
            .values
            .extend(values.into_iter().map(|(k, v)| (k.into(), v.into())));
        session.last_access = now;
    }

    /// Value for `key`, or `None` if absent or the attempt has expired.
    pub fn get(&self, attempt_id: &str, key: &str) -> Option<String> {
        let now = Instant::now();
        let mut session = self.live(attempt_id, now)?;
        session.last_access = now;
        session.values.get(key).cloned()
    }

    pub fn snapshot(&self, attempt_id: &str) -> Option<BTreeMap<String, String>> {
        let now = Instant::now();
        let mut session = self.live(attempt_id, now)?;
        session.last_access = now;
        Some(session.values.clone())
    }

    /// Extend an attempt's lifetime. Returns false if it is unknown or gone.
    pub fn touch(&self, attempt_id: &str) -> bool {
        let now = Instant::now();
        match self.live(attempt_id, now) {
            Some(mut session) => {
                session.last_access = now;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, attempt_id: &str) -> Option<BTreeMap<String, String>> {
        let (_, session) = self.sessions.remove(attempt_id)?;
        debug!(attempt_id, "Removed cached session");
        Some(session.values)
    }

    fn live(
        &self,
        attempt_id: &str,
        now: Instant,
    ) -> Option<dashmap::mapref::one::RefMut<'_, String, CachedSession>> {
        let session = self.sessions.get_mut(attempt_id)?;
        if !session.is_expired(self.ttl, now) {
            return Some(session);
        }
        drop(session);
        self.evict_if_expired(attempt_id, now);
        None
    }

    /// Re-checks expiry under the shard lock, so a `put` that refreshed the
    /// entry after `now` keeps it.
    fn evict_if_expired(&self, attempt_id: &str, now: Instant) -> bool {
        let ttl = self.ttl;
        self.sessions
            .remove_if(attempt_id, |_, session| session.is_expired(ttl, now))
            .is_some()
    }

    /// Remove every expired attempt. Returns how many were evicted.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let ttl = self.ttl;
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_expired(ttl, now));
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            info!(evicted, "Evicted expired cached sessions");
        }
        evicted
    }

    pub fn spawn_eviction(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        info!(interval_secs = interval.as_secs(), "Session cache eviction task started");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                cache.evict_expired();
            }
        })
    }

    pub fn stats(&self) -> SessionCacheStats {
        let now = Instant::now();
        let total = self.sessions.len();
        let mut expired = 0;
        let mut cached_keys = 0;
        for session in self.sessions.iter() {
            if session.is_expired(self.ttl, now) {
                expired += 1;
            }
            cached_keys += session.values.len();
        }

        SessionCacheStats {
            total_sessions: total,
            expired_sessions: expired,
            active_sessions: total - expired,
            cached_keys,
        }
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::from_settings(&SessionCacheSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_get() {
        let cache = SessionCache::default();
        cache.put("att_1", "cmi.location", "p1");
        cache.put_all("att_1", [("cmi.suspend_data", "x"), ("cmi.location", "p2")]);

        assert_eq!(cache.get("att_1", "cmi.location").as_deref(), Some("p2"));
        assert_eq!(cache.snapshot("att_1").unwrap().len(), 2);
        assert!(cache.get("att_2", "cmi.location").is_none());
    }

    #[test]
    fn test_expiry() {
        let cache = SessionCache::new(Duration::from_millis(1));
        cache.put("att_1", "cmi.location", "p1");
        std::thread::sleep(Duration::from_millis(5));

        let stats = cache.stats();
        assert_eq!(stats.expired_sessions, 1);
        assert!(!cache.touch("att_1"));
        assert_eq!(cache.stats().total_sessions, 0);
    }

    #[test]
    fn test_evict_expired() {
        let cache = SessionCache::new(Duration::from_millis(1));
        cache.put("a", "k", "v");
        cache.put("b", "k", "v");
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.evict_expired(), 2);
    }

    #[test]
    fn test_refreshed_entry_survives_stale_expiry_check() {
        let cache = SessionCache::new(Duration::from_millis(10));
        cache.put("att", "cmi.location", "p1");
        std::thread::sleep(Duration::from_millis(20));

        // A reader saw the entry expired at `seen`; a writer refreshed it since
        let seen = Instant::now();
        cache.put("att", "cmi.location", "p2");
        assert!(!cache.evict_if_expired("att", seen));
        assert_eq!(cache.get("att", "cmi.location").as_deref(), Some("p2"));

        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.evict_if_expired("att", Instant::now()));
        assert_eq!(cache.stats().total_sessions, 0);
    }

    #[test]
    fn test_remove_returns_values() {
        let cache = SessionCache::default();
        cache.put("att", "cmi.exit", "suspend");
        let values = cache.remove("att").unwrap();
        assert_eq!(values["cmi.exit"], "suspend");
        assert!(cache.remove("att").is_none());
    }
}
