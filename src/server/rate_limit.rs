//! Sliding-window rate limiter for runtime HTTP endpoints.
//!
//! Keyed by client address (or anything hashable). Each key keeps the
//! instants of its requests inside the current window; older ones are
//! discarded on every check and by the periodic sweep.

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::RateLimitSettings;

/// Outcome of one [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests still available in the current window.
    pub remaining: u32,
    /// When denied, how long until the oldest request leaves the window.
    pub retry_after: Option<Duration>,
}

pub struct RateLimiter<K> {
    requests: DashMap<K, VecDeque<Instant>>,
    window: Duration,
    max_requests: u32,
}

impl<K> RateLimiter<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            requests: DashMap::new(),
            window,
            max_requests,
        }
    }

    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self::new(Duration::from_secs(settings.window_secs), settings.max_requests)
    }

    /// Check whether a request is allowed and record it if so.
    pub fn check(&self, key: &K) -> RateDecision {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &K, now: Instant) -> RateDecision {
        let mut entry = self.requests.entry(key.clone()).or_default();
        while entry
            .front()
            .is_some_and(|oldest| now.saturating_duration_since(*oldest) >= self.window)
        {
            entry.pop_front();
        }

        let used = entry.len() as u32;
        if used >= self.max_requests {
            let retry_after = entry
                .front()
                .map(|oldest| self.window.saturating_sub(now.saturating_duration_since(*oldest)));
            return RateDecision {
                allowed: false,
                remaining: 0,
                retry_after,
            };
        }

        entry.push_back(now);
        RateDecision {
            allowed: true,
            remaining: self.max_requests - used - 1,
            retry_after: None,
        }
    }

    /// Number of keys currently tracked.
    pub fn tracked(&self) -> usize {
        self.requests.len()
    }

    /// Drop expired instants and keys with nothing left in the window.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let window = self.window;
        let before = self.requests.len();
        self.requests.retain(|_, hits| {
            hits.retain(|t| now.saturating_duration_since(*t) < window);
            !hits.is_empty()
        });
        before.saturating_sub(self.requests.len())
    }

    /// Sweep on `interval` until the returned handle is aborted.
    pub fn spawn_cleanup(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        info!(interval_secs = interval.as_secs(), "Rate limiter cleanup task started");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = limiter.cleanup();
                if removed > 0 {
                    debug!(removed, "Evicted idle rate-limit keys");
                }
            }
        })
    }
}
