//! Server-side collaborators consumed by the HTTP boundary.

pub mod rate_limit;
pub mod session_cache;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::Config;

pub use rate_limit::{RateDecision, RateLimiter};
pub use session_cache::{SessionCache, SessionCacheStats};

/// Shared state for runtime endpoints: per-client throttle plus the
/// per-attempt write cache.
#[derive(Clone)]
pub struct RuntimeServices {
    pub rate_limiter: Arc<RateLimiter<IpAddr>>,
    pub session_cache: Arc<SessionCache>,
    cleanup_interval: Duration,
    eviction_interval: Duration,
}

impl RuntimeServices {
    pub fn from_config(config: &Config) -> Self {
        Self {
            rate_limiter: Arc::new(RateLimiter::from_settings(&config.rate_limit)),
            session_cache: Arc::new(SessionCache::from_settings(&config.session_cache)),
            cleanup_interval: Duration::from_secs(config.rate_limit.cleanup_interval_secs.max(1)),
            eviction_interval: Duration::from_secs(config.session_cache.eviction_interval_secs.max(1)),
        }
    }

    /// Start the periodic sweeps. Must be called inside a tokio runtime.
    pub fn spawn_background_tasks(&self) -> Vec<JoinHandle<()>> {
        vec![
            self.rate_limiter.spawn_cleanup(self.cleanup_interval),
            self.session_cache.spawn_eviction(self.eviction_interval),
        ]
    }
}
