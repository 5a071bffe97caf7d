//! Backing-store boundary
//!
//! The adapter never talks to a database directly. Everything it needs from
//! persistence goes through [`BackingStore`]; every method returns a `Result`
//! so failures can be logged and counted even though SCO content never sees
//! them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TransportError;

/// Objective state persisted outside the CMI map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveRecord {
    pub id: String,
    pub success_status: Option<String>,
    pub completion_status: Option<String>,
    pub score_raw: Option<String>,
    pub score_min: Option<String>,
    pub score_max: Option<String>,
    pub score_scaled: Option<String>,
    pub progress_measure: Option<String>,
    pub description: Option<String>,
}

impl ObjectiveRecord {
    /// `(field, value)` pairs under `cmi.objectives.N.`
    pub fn fields(&self) -> Vec<(&'static str, &str)> {
        [
            ("success_status", &self.success_status),
            ("completion_status", &self.completion_status),
            ("score.raw", &self.score_raw),
            ("score.min", &self.score_min),
            ("score.max", &self.score_max),
            ("score.scaled", &self.score_scaled),
            ("progress_measure", &self.progress_measure),
            ("description", &self.description),
        ]
        .into_iter()
        .filter_map(|(field, value)| value.as_deref().map(|v| (field, v)))
        .collect()
    }
}

/// Prior state returned when an attempt is opened.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hydration {
    pub attempt_id: String,
    pub cmi_data: BTreeMap<String, String>,
    pub objectives: Vec<ObjectiveRecord>,
}

/// Persistence collaborator for one learner's attempts.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Open (or resume) the attempt for `package_id`.
    async fn initialize(&self, package_id: &str) -> Result<Hydration, TransportError>;

    async fn set_value(&self, attempt_id: &str, key: &str, value: &str) -> Result<(), TransportError>;

    async fn commit(&self, attempt_id: &str) -> Result<(), TransportError>;

    /// Fire-and-forget delivery of the full snapshot that survives page
    /// unload. `Err(TransportError::Unavailable)` tells the caller to fall
    /// back to ordinary requests.
    fn commit_sync(
        &self,
        attempt_id: &str,
        snapshot: &BTreeMap<String, String>,
    ) -> Result<(), TransportError>;

    /// Unload-resilient end-of-session notification.
    fn terminate(&self, attempt_id: &str) -> Result<(), TransportError>;
}

/// A call observed by [`MemoryBackingStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Initialize { package_id: String },
    SetValue { attempt_id: String, key: String, value: String },
    Commit { attempt_id: String },
    CommitSync { attempt_id: String, keys: usize },
    Terminate { attempt_id: String },
}

#[derive(Debug, Clone, Default)]
struct AttemptRecord {
    package_id: String,
    cmi: BTreeMap<String, String>,
    objectives: Vec<ObjectiveRecord>,
    commits: u32,
    terminated: bool,
}

/// In-process backing store. Useful for local players, previews and tests.
pub struct MemoryBackingStore {
    attempts: DashMap<String, AttemptRecord>,
    by_package: DashMap<String, String>,
    calls: Mutex<Vec<StoreCall>>,
    fail_initialize: AtomicBool,
    fail_writes: AtomicBool,
    beacon_available: AtomicBool,
}

impl Default for MemoryBackingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackingStore {
    pub fn new() -> Self {
        Self {
            attempts: DashMap::new(),
            by_package: DashMap::new(),
            calls: Mutex::new(Vec::new()),
            fail_initialize: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            beacon_available: AtomicBool::new(true),
        }
    }

    /// Pre-populate an attempt so the next `initialize` resumes it.
    pub fn seed_attempt(
        &self,
        package_id: &str,
        cmi: BTreeMap<String, String>,
        objectives: Vec<ObjectiveRecord>,
    ) -> String {
        let attempt_id = format!("att_{}", uuid::Uuid::new_v4());
        self.attempts.insert(
            attempt_id.clone(),
            AttemptRecord {
                package_id: package_id.to_string(),
                cmi,
                objectives,
                ..Default::default()
            },
        );
        self.by_package.insert(package_id.to_string(), attempt_id.clone());
        attempt_id
    }

    pub fn set_fail_initialize(&self, fail: bool) {
        self.fail_initialize.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_beacon_available(&self, available: bool) {
        self.beacon_available.store(available, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn attempt_for(&self, package_id: &str) -> Option<String> {
        self.by_package.get(package_id).map(|id| id.clone())
    }

    /// Persisted CMI data for an attempt.
    pub fn data(&self, attempt_id: &str) -> Option<BTreeMap<String, String>> {
        self.attempts.get(attempt_id).map(|a| a.cmi.clone())
    }

    pub fn commit_count(&self, attempt_id: &str) -> u32 {
        self.attempts.get(attempt_id).map_or(0, |a| a.commits)
    }

    pub fn is_terminated(&self, attempt_id: &str) -> bool {
        self.attempts.get(attempt_id).is_some_and(|a| a.terminated)
    }

    fn record(&self, call: StoreCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn check_writes(&self) -> Result<(), TransportError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Network("simulated write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BackingStore for MemoryBackingStore {
    async fn initialize(&self, package_id: &str) -> Result<Hydration, TransportError> {
        self.record(StoreCall::Initialize {
            package_id: package_id.to_string(),
        });
        if self.fail_initialize.load(Ordering::SeqCst) {
            return Err(TransportError::Network("simulated initialize failure".into()));
        }

        let attempt_id = match self.attempt_for(package_id) {
            Some(id) => id,
            None => self.seed_attempt(package_id, BTreeMap::new(), Vec::new()),
        };
        let attempt = self
            .attempts
            .get(&attempt_id)
            .ok_or_else(|| TransportError::NotFound(attempt_id.clone()))?;
        debug!(attempt_id = %attempt_id, package_id = %attempt.package_id, "Opened attempt");

        Ok(Hydration {
            attempt_id: attempt_id.clone(),
            cmi_data: attempt.cmi.clone(),
            objectives: attempt.objectives.clone(),
        })
    }

    async fn set_value(&self, attempt_id: &str, key: &str, value: &str) -> Result<(), TransportError> {
        self.record(StoreCall::SetValue {
            attempt_id: attempt_id.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        });
        self.check_writes()?;
        let mut attempt = self
            .attempts
            .get_mut(attempt_id)
            .ok_or_else(|| TransportError::NotFound(attempt_id.to_string()))?;
        attempt.cmi.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn commit(&self, attempt_id: &str) -> Result<(), TransportError> {
        self.record(StoreCall::Commit {
            attempt_id: attempt_id.to_string(),
        });
        self.check_writes()?;
        let mut attempt = self
            .attempts
            .get_mut(attempt_id)
            .ok_or_else(|| TransportError::NotFound(attempt_id.to_string()))?;
        attempt.commits += 1;
        Ok(())
    }

    fn commit_sync(
        &self,
        attempt_id: &str,
        snapshot: &BTreeMap<String, String>,
    ) -> Result<(), TransportError> {
        self.record(StoreCall::CommitSync {
            attempt_id: attempt_id.to_string(),
            keys: snapshot.len(),
        });
        if !self.beacon_available.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("beacon delivery disabled".into()));
        }
        self.check_writes()?;
        let mut attempt = self
            .attempts
            .get_mut(attempt_id)
            .ok_or_else(|| TransportError::NotFound(attempt_id.to_string()))?;
        attempt.cmi = snapshot.clone();
        attempt.commits += 1;
        Ok(())
    }

    fn terminate(&self, attempt_id: &str) -> Result<(), TransportError> {
        self.record(StoreCall::Terminate {
            attempt_id: attempt_id.to_string(),
        });
        let mut attempt = self
            .attempts
            .get_mut(attempt_id)
            .ok_or_else(|| TransportError::NotFound(attempt_id.to_string()))?;
        attempt.terminated = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initialize_resumes_same_attempt() {
        let store = MemoryBackingStore::new();
        let first = store.initialize("pkg").await.unwrap();
        let second = store.initialize("pkg").await.unwrap();
        assert_eq!(first.attempt_id, second.attempt_id);
        assert!(first.attempt_id.starts_with("att_"));
    }

    #[tokio::test]
    async fn test_writes_and_commit() {
        let store = MemoryBackingStore::new();
        let attempt = store.initialize("pkg").await.unwrap().attempt_id;
        store.set_value(&attempt, "cmi.location", "p3").await.unwrap();
        store.commit(&attempt).await.unwrap();
        assert_eq!(store.data(&attempt).unwrap()["cmi.location"], "p3");
        assert_eq!(store.commit_count(&attempt), 1);
    }

    #[tokio::test]
    async fn test_unavailable_beacon() {
        let store = MemoryBackingStore::new();
        let attempt = store.initialize("pkg").await.unwrap().attempt_id;
        store.set_beacon_available(false);
        let err = store.commit_sync(&attempt, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, TransportError::Unavailable(_)));
    }

    #[test]
    fn test_objective_record_fields() {
        let record = ObjectiveRecord {
            id: "o1".into(),
            success_status: Some("passed".into()),
            score_raw: Some("9".into()),
            ..Default::default()
        };
        assert_eq!(record.fields(), vec![("success_status", "passed"), ("score.raw", "9")]);
    }
}
