//! Configuration for scorm-runtime

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Default config file location
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("scorm-runtime")
        .join("config.toml")
}

/// Configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub package: PackageLimits,

    #[serde(default)]
    pub runtime: RuntimeSettings,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    #[serde(default)]
    pub session_cache: SessionCacheSettings,
}

/// Limits applied when validating an uploaded package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageLimits {
    /// Maximum number of entries in the archive
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Maximum decompressed size of a single entry
    #[serde(default = "default_max_entry_bytes")]
    pub max_entry_bytes: u64,

    /// File extensions that are never allowed (lowercase, no dot)
    #[serde(default = "default_blocked_extensions")]
    pub blocked_extensions: Vec<String>,

    /// File extensions whose text is scanned for suspicious patterns
    #[serde(default = "default_scanned_extensions")]
    pub scanned_extensions: Vec<String>,

    /// Maximum bytes read from one entry during the content scan
    #[serde(default = "default_max_entry_bytes")]
    pub max_scan_bytes: u64,
}

fn default_max_entries() -> usize {
    5_000
}

fn default_max_entry_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_blocked_extensions() -> Vec<String> {
    ["exe", "bat", "cmd", "sh", "php", "asp", "jsp", "cgi", "pl", "py", "rb"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_scanned_extensions() -> Vec<String> {
    ["html", "htm", "js"].iter().map(|s| s.to_string()).collect()
}

impl Default for PackageLimits {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_entry_bytes: default_max_entry_bytes(),
            blocked_extensions: default_blocked_extensions(),
            scanned_extensions: default_scanned_extensions(),
            max_scan_bytes: default_max_entry_bytes(),
        }
    }
}

/// Runtime adapter defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Pass threshold as a fraction of `score.max` when the package sets none
    #[serde(default = "default_scaled_passing_score")]
    pub scaled_passing_score: f64,

    /// Delay before the exit callback fires after Terminate
    #[serde(default = "default_exit_notify_delay_ms")]
    pub exit_notify_delay_ms: u64,

    /// `credit` / `no-credit`
    #[serde(default = "default_credit")]
    pub credit: String,

    /// `normal` / `browse` / `review`
    #[serde(default = "default_mode")]
    pub mode: String,
}

fn default_scaled_passing_score() -> f64 {
    0.8
}

fn default_exit_notify_delay_ms() -> u64 {
    300
}

fn default_credit() -> String {
    "credit".to_string()
}

fn default_mode() -> String {
    "normal".to_string()
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            scaled_passing_score: default_scaled_passing_score(),
            exit_notify_delay_ms: default_exit_notify_delay_ms(),
            credit: default_credit(),
            mode: default_mode(),
        }
    }
}

impl RuntimeSettings {
    pub fn exit_notify_delay(&self) -> Duration {
        Duration::from_millis(self.exit_notify_delay_ms)
    }
}

/// Sliding-window throttle for runtime HTTP endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Requests allowed per client per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_requests() -> u32 {
    600
}

fn default_cleanup_interval_secs() -> u64 {
    300
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_requests: default_max_requests(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

/// Per-attempt ephemeral key/value cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCacheSettings {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_cleanup_interval_secs")]
    pub eviction_interval_secs: u64,
}

fn default_ttl_secs() -> u64 {
    3600
}

impl Default for SessionCacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            eviction_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}
