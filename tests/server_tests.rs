//! Server collaborator tests
//!
//! Exercises the rate limiter and session cache the way the HTTP boundary
//! wires them: built from a loaded config, shared behind `Arc`, swept by the
//! background tasks.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use scorm_runtime::config::Config;
use scorm_runtime::{RateLimiter, RuntimeServices, SessionCache};

/// Config with a tiny request budget and short-lived cache entries.
fn tight_config() -> Config {
    let toml = r#"
[rate_limit]
window_secs = 60
max_requests = 2
cleanup_interval_secs = 1

[session_cache]
ttl_secs = 1
eviction_interval_secs = 1
"#;
    toml::from_str(toml).unwrap()
}

#[test]
fn test_services_from_config() {
    let services = RuntimeServices::from_config(&tight_config());
    let client = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7));

    assert!(services.rate_limiter.check(&client).allowed);
    assert!(services.rate_limiter.check(&client).allowed);
    let denied = services.rate_limiter.check(&client);
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);

    services.session_cache.put("att_1", "cmi.location", "p2");
    assert_eq!(services.session_cache.get("att_1", "cmi.location").as_deref(), Some("p2"));
}

#[test]
fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let config = tight_config();
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.rate_limit.max_requests, 2);
    assert_eq!(loaded.session_cache.ttl_secs, 1);
    // Sections absent from the file keep their defaults
    assert_eq!(loaded.package.max_entries, 5_000);
}

#[tokio::test]
async fn test_background_sweeps_evict_expired_state() {
    let services = RuntimeServices::from_config(&tight_config());
    services.session_cache.put_all("att_1", [("cmi.exit", "suspend"), ("cmi.location", "p9")]);
    assert_eq!(services.session_cache.stats().cached_keys, 2);

    let tasks = services.spawn_background_tasks();
    assert_eq!(tasks.len(), 2);

    tokio::time::sleep(Duration::from_millis(2200)).await;
    let stats = services.session_cache.stats();
    assert_eq!(stats.total_sessions, 0);
    assert_eq!(stats.cached_keys, 0);

    for task in tasks {
        task.abort();
    }
}

#[tokio::test]
async fn test_concurrent_attempts_do_not_interfere() {
    let cache = Arc::new(SessionCache::new(Duration::from_secs(60)));
    let mut handles = Vec::new();
    for worker in 0..8 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            let attempt = format!("att_{worker}");
            for i in 0..50 {
                cache.put(&attempt, &format!("cmi.interactions.{i}.id"), &format!("q{i}"));
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stats = cache.stats();
    assert_eq!(stats.total_sessions, 8);
    assert_eq!(stats.cached_keys, 400);
    assert_eq!(cache.get("att_3", "cmi.interactions.49.id").as_deref(), Some("q49"));
}

#[test]
fn test_limiter_keys_are_independent() {
    let limiter: RateLimiter<String> = RateLimiter::new(Duration::from_secs(60), 1);
    assert!(limiter.check(&"a".to_string()).allowed);
    assert!(!limiter.check(&"a".to_string()).allowed);
    assert!(limiter.check(&"b".to_string()).allowed);
    assert_eq!(limiter.tracked(), 2);
}
