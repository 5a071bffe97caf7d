//! End-to-end runtime adapter tests
//!
//! Drives full learner sessions through the public API against the
//! in-memory backing store: Initialize, a run of SetValue/GetValue calls,
//! Commit and Terminate, then inspects what the host observed (hooks) and
//! what the store received.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use scorm_runtime::cmi::time::parse_session_time;
use scorm_runtime::config::RuntimeSettings;
use scorm_runtime::runtime::ObjectiveRecord;
use scorm_runtime::{
    AdapterConfig, AdapterHooks, CompletionEvent, ExitEvent, LessonStatus, MemoryBackingStore,
    PackageManifest, RuntimeAdapter, RuntimeApi, ScormVersion,
};

/// Hook recorders shared between the adapter and the test body.
#[derive(Clone, Default)]
struct Recorded {
    completions: Arc<Mutex<Vec<CompletionEvent>>>,
    exits: Arc<Mutex<Vec<ExitEvent>>>,
}

impl Recorded {
    fn hooks(&self) -> AdapterHooks {
        let completions = self.completions.clone();
        let exits = self.exits.clone();
        AdapterHooks::new()
            .on_completion(move |event| completions.lock().unwrap().push(event.clone()))
            .on_exit(move |event| exits.lock().unwrap().push(event.clone()))
    }

    fn completions(&self) -> Vec<(String, Option<f64>)> {
        self.completions
            .lock()
            .unwrap()
            .iter()
            .map(|e| (e.status.clone(), e.score))
            .collect()
    }

    fn exits(&self) -> Vec<ExitEvent> {
        self.exits.lock().unwrap().clone()
    }
}

/// Adapter for `pkg-1` with an immediate exit notification.
fn start(version: ScormVersion) -> (RuntimeAdapter, Arc<MemoryBackingStore>, Recorded) {
    start_with(AdapterConfig::new("pkg-1", version))
}

fn start_with(config: AdapterConfig) -> (RuntimeAdapter, Arc<MemoryBackingStore>, Recorded) {
    let store = Arc::new(MemoryBackingStore::new());
    let recorded = Recorded::default();
    let config = config.with_exit_notify_delay(Duration::from_millis(5));
    let adapter = RuntimeAdapter::new(config, store.clone(), recorded.hooks()).unwrap();
    (adapter, store, recorded)
}

#[tokio::test]
async fn test_terminate_twice_is_idempotent() {
    let (adapter, _, _) = start(ScormVersion::Scorm2004);
    assert!(adapter.initialize(""));
    adapter.settle().await;

    assert!(adapter.set_value("cmi.location", "page-4"));
    assert!(adapter.terminate(""));
    adapter.settle().await;
    let first = adapter.snapshot();

    assert!(adapter.terminate(""));
    assert_eq!(adapter.get_last_error(), "0");
    adapter.settle().await;
    assert_eq!(adapter.snapshot(), first);
}

#[tokio::test]
async fn test_objective_ids_grow_count_once() {
    let (adapter, _, _) = start(ScormVersion::Scorm2004);
    adapter.initialize("");
    adapter.settle().await;

    assert_eq!(adapter.get_value("cmi.objectives._count"), "0");

    assert!(adapter.set_value("cmi.objectives.0.id", "obj-a"));
    assert_eq!(adapter.get_value("cmi.objectives._count"), "1");
    assert_eq!(adapter.get_value("cmi.objectives.0.success_status"), "unknown");
    assert_eq!(adapter.get_value("cmi.objectives.0.completion_status"), "unknown");

    // Same id again: no new member
    assert!(adapter.set_value("cmi.objectives.0.id", "obj-a"));
    assert_eq!(adapter.get_value("cmi.objectives._count"), "1");

    // A sparse index still counts as exactly one new member
    assert!(adapter.set_value("cmi.objectives.5.id", "obj-b"));
    assert_eq!(adapter.get_value("cmi.objectives._count"), "2");
    assert_eq!(adapter.get_value("cmi.objectives.5.success_status"), "unknown");
}

#[tokio::test]
async fn test_interactions_reusing_index_zero_get_stable_slots() {
    let (adapter, _, _) = start(ScormVersion::Scorm2004);
    adapter.initialize("");
    adapter.settle().await;

    assert!(adapter.set_value("cmi.interactions.0.id", "q1"));
    assert!(adapter.set_value("cmi.interactions.0.result", "correct"));
    assert!(adapter.set_value("cmi.interactions.0.id", "q2"));
    assert!(adapter.set_value("cmi.interactions.0.result", "incorrect"));

    assert_eq!(adapter.get_value("cmi.interactions._count"), "2");
    assert_eq!(adapter.get_value("cmi.interactions.0.id"), "q1");
    assert_eq!(adapter.get_value("cmi.interactions.0.result"), "correct");
    assert_eq!(adapter.get_value("cmi.interactions.1.id"), "q2");
    assert_eq!(adapter.get_value("cmi.interactions.1.result"), "incorrect");

    // Re-addressing q1 goes back to its slot
    assert!(adapter.set_value("cmi.interactions.0.id", "q1"));
    assert_eq!(adapter.get_value("cmi.interactions._count"), "2");
}

#[tokio::test]
async fn test_session_time_tracks_wall_clock() {
    let (adapter, _, _) = start(ScormVersion::Scorm2004);
    adapter.initialize("");
    adapter.settle().await;

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(adapter.terminate(""));
    adapter.settle().await;

    let recorded = adapter.get_value("cmi.session_time");
    assert!(recorded.starts_with("PT"), "unexpected format {recorded}");
    let elapsed = parse_session_time(&recorded).unwrap();
    assert!(elapsed >= Duration::from_secs(1), "too short: {recorded}");
    assert!(elapsed < Duration::from_secs(5), "too long: {recorded}");
}

#[tokio::test]
async fn test_content_session_time_is_kept() {
    let (adapter, _, _) = start(ScormVersion::Scorm2004);
    adapter.initialize("");
    adapter.settle().await;

    assert!(adapter.set_value("cmi.session_time", "PT42S"));
    adapter.terminate("");
    adapter.settle().await;
    assert_eq!(adapter.get_value("cmi.session_time"), "PT42S");
}

#[tokio::test]
async fn test_success_reported_once_with_score() {
    let (adapter, _, recorded) = start(ScormVersion::Scorm2004);
    adapter.initialize("");
    adapter.settle().await;

    assert!(adapter.set_value("cmi.score.raw", "85"));
    assert!(recorded.completions().is_empty());

    assert!(adapter.set_value("cmi.success_status", "passed"));
    assert_eq!(recorded.completions(), vec![("passed".to_string(), Some(85.0))]);

    // Writing the same status again stays quiet
    assert!(adapter.set_value("cmi.success_status", "passed"));
    adapter.terminate("");
    adapter.settle().await;
    assert_eq!(recorded.completions().len(), 1);
    assert_eq!(adapter.stats().completion_events, 1);
}

#[tokio::test]
async fn test_scorm12_session_before_hydration() {
    let (adapter, store, recorded) = start(ScormVersion::Scorm12);

    // Everything happens before the hydration task gets to run
    assert!(adapter.initialize(""));
    assert!(adapter.set_value("cmi.core.lesson_status", "incomplete"));
    assert!(adapter.set_value("cmi.core.score.raw", "92"));
    assert!(adapter.set_value("cmi.core.lesson_status", "passed"));
    assert!(adapter.terminate(""));
    adapter.settle().await;

    assert_eq!(recorded.completions(), vec![("passed".to_string(), Some(92.0))]);
    assert!(!adapter.get_value("cmi.core.session_time").is_empty());
    assert_eq!(adapter.get_value("cmi.core.lesson_status"), "passed");

    // The final flush carried the replayed writes
    let attempt = store.attempt_for("pkg-1").unwrap();
    let data = store.data(&attempt).unwrap();
    assert_eq!(data["cmi.core.lesson_status"], "passed");
    assert_eq!(data["cmi.core.score.raw"], "92");
    assert!(store.is_terminated(&attempt));

    let summary = adapter.summary();
    assert_eq!(summary.lesson_status, LessonStatus::Passed);
    assert_eq!(summary.score_raw, Some(92.0));
}

#[tokio::test]
async fn test_scorm12_mastery_score_decides_on_finish() {
    let mut config = AdapterConfig::new("pkg-1", ScormVersion::Scorm12);
    config.mastery_score = Some(80.0);
    let (adapter, _, recorded) = start_with(config);

    adapter.initialize("");
    adapter.settle().await;
    assert_eq!(adapter.get_value("cmi.student_data.mastery_score"), "80");

    adapter.set_value("cmi.core.score.raw", "70");
    adapter.terminate("");
    adapter.settle().await;

    assert_eq!(adapter.get_value("cmi.core.lesson_status"), "failed");
    assert_eq!(recorded.completions(), vec![("failed".to_string(), Some(70.0))]);
}

#[tokio::test]
async fn test_exit_hook_fires_on_logout() {
    let (adapter, _, recorded) = start(ScormVersion::Scorm2004);
    adapter.initialize("");
    adapter.settle().await;

    assert!(adapter.set_value("cmi.exit", "logout"));
    adapter.terminate("");
    adapter.settle().await;

    let exits = recorded.exits();
    assert_eq!(exits.len(), 1);
    assert_eq!(exits[0].exit, "logout");
    assert!(exits[0].attempt_id.is_some());
    assert_eq!(exits[0].outcome, None);
}

#[tokio::test]
async fn test_exit_hook_silent_when_suspending() {
    let (adapter, _, recorded) = start(ScormVersion::Scorm2004);
    adapter.initialize("");
    adapter.settle().await;

    adapter.set_value("cmi.location", "p3");
    adapter.terminate("");
    adapter.settle().await;

    assert_eq!(adapter.get_value("cmi.exit"), "suspend");
    assert!(recorded.exits().is_empty());
}

#[tokio::test]
async fn test_nav_request_triggers_exit_hook() {
    let (adapter, _, recorded) = start(ScormVersion::Scorm2004);
    adapter.initialize("");
    adapter.settle().await;

    assert!(adapter.set_value("adl.nav.request", "exitAll"));
    adapter.terminate("");
    adapter.settle().await;

    let exits = recorded.exits();
    assert_eq!(exits.len(), 1);
    assert_eq!(exits[0].nav_request.as_deref(), Some("exitAll"));
}

#[tokio::test]
async fn test_resume_from_suspended_attempt() {
    let store = Arc::new(MemoryBackingStore::new());
    let mut saved = BTreeMap::new();
    saved.insert("cmi.exit".to_string(), "suspend".to_string());
    saved.insert("cmi.location".to_string(), "chapter-3".to_string());
    saved.insert("cmi.suspend_data".to_string(), "{\"q\":7}".to_string());
    let attempt = store.seed_attempt(
        "pkg-1",
        saved,
        vec![ObjectiveRecord {
            id: "obj-a".to_string(),
            success_status: Some("passed".to_string()),
            ..Default::default()
        }],
    );

    let config = AdapterConfig::new("pkg-1", ScormVersion::Scorm2004);
    let adapter = RuntimeAdapter::new(config, store.clone(), AdapterHooks::new()).unwrap();
    adapter.initialize("");
    adapter.settle().await;

    assert_eq!(adapter.attempt_id().as_deref(), Some(attempt.as_str()));
    assert_eq!(adapter.get_value("cmi.entry"), "resume");
    assert_eq!(adapter.get_value("cmi.exit"), "");
    assert_eq!(adapter.get_value("cmi.location"), "chapter-3");
    assert_eq!(adapter.get_value("cmi.suspend_data"), "{\"q\":7}");
    assert_eq!(adapter.get_value("cmi.objectives._count"), "1");
    assert_eq!(adapter.get_value("cmi.objectives.0.id"), "obj-a");
    assert_eq!(adapter.get_value("cmi.objectives.0.success_status"), "passed");

    assert!(adapter.commit(""));
    adapter.settle().await;
    let data = store.data(&attempt).unwrap();
    assert_eq!(data["cmi.entry"], "resume");
    assert_eq!(data["cmi.exit"], "");
    assert_eq!(store.commit_count(&attempt), 1);
}

#[tokio::test]
async fn test_learner_seeds_are_read_only() {
    let config = AdapterConfig::new("pkg-1", ScormVersion::Scorm2004).with_learner("u-17", "Ada L.");
    let (adapter, _, _) = start_with(config);
    adapter.initialize("");

    assert_eq!(adapter.get_value("cmi.learner_id"), "u-17");
    assert_eq!(adapter.get_value("cmi.learner_name"), "Ada L.");
    assert!(!adapter.set_value("cmi.learner_name", "Mallory"));
    assert_eq!(adapter.get_last_error(), "403");
    adapter.settle().await;
}

#[tokio::test]
async fn test_manifest_objective_satisfied_by_measure() {
    let manifest = PackageManifest::parse(
        r#"<manifest identifier="m" xmlns:imsss="http://www.imsglobal.org/xsd/imsss">
  <metadata><schemaversion>2004 4th Edition</schemaversion></metadata>
  <organizations default="o">
    <organization identifier="o">
      <title>Measured</title>
      <item identifier="i" identifierref="r">
        <title>SCO</title>
        <imsss:sequencing>
          <imsss:objectives>
            <imsss:primaryObjective objectiveID="obj-primary" satisfiedByMeasure="true">
              <imsss:minNormalizedMeasure>0.6</imsss:minNormalizedMeasure>
            </imsss:primaryObjective>
          </imsss:objectives>
        </imsss:sequencing>
      </item>
    </organization>
  </organizations>
  <resources><resource identifier="r" href="sco.html"/></resources>
</manifest>"#,
    )
    .unwrap();

    let config = AdapterConfig::from_manifest("pkg-1", &manifest, &RuntimeSettings::default());
    let (adapter, _, _) = start_with(config);
    adapter.initialize("");
    adapter.settle().await;

    assert_eq!(adapter.get_value("cmi.scaled_passing_score"), "0.6");
    assert_eq!(adapter.get_value("cmi.objectives._count"), "1");
    assert_eq!(adapter.get_value("cmi.objectives.0.id"), "obj-primary");

    assert!(adapter.set_value("cmi.objectives.0.score.scaled", "0.7"));
    assert_eq!(adapter.get_value("cmi.objectives.0.success_status"), "passed");

    assert!(adapter.set_value("cmi.objectives.0.score.scaled", "0.4"));
    assert_eq!(adapter.get_value("cmi.objectives.0.success_status"), "failed");
}

#[tokio::test]
async fn test_failed_hydration_keeps_session_usable() {
    let store = Arc::new(MemoryBackingStore::new());
    store.set_fail_initialize(true);
    let errors = Arc::new(Mutex::new(0usize));
    let seen = errors.clone();
    let hooks = AdapterHooks::new().on_error(move |_| *seen.lock().unwrap() += 1);

    let config = AdapterConfig::new("pkg-1", ScormVersion::Scorm2004);
    let adapter = RuntimeAdapter::new(config, store.clone(), hooks).unwrap();
    adapter.initialize("");
    adapter.settle().await;

    assert_eq!(*errors.lock().unwrap(), 1);
    assert!(adapter.attempt_id().is_none());
    assert!(adapter.set_value("cmi.location", "p1"));
    assert_eq!(adapter.get_value("cmi.location"), "p1");

    adapter.commit("");
    adapter.terminate("");
    adapter.settle().await;
    let stats = adapter.stats();
    assert_eq!(stats.transport_failures, 1);
    assert_eq!(stats.skipped_flushes, 2);
}

#[tokio::test]
async fn test_facade_dispatch_by_name() {
    let (adapter, _, _) = start(ScormVersion::Scorm12);
    let api = RuntimeApi::for_adapter(adapter.clone());
    assert_eq!(api.global_name(), "API");

    assert_eq!(api.invoke("LMSInitialize", &[""]).as_deref(), Some("true"));
    assert_eq!(
        api.invoke("LMSSetValue", &["cmi.core.lesson_location", "intro"]).as_deref(),
        Some("true")
    );
    assert_eq!(
        api.invoke("LMSGetValue", &["cmi.core.lesson_location"]).as_deref(),
        Some("intro")
    );
    assert_eq!(api.invoke("Initialize", &[""]), None);
    assert_eq!(api.invoke("LMSFinish", &[""]).as_deref(), Some("true"));
    adapter.settle().await;
}
