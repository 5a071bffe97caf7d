//! Runtime API adapter
//!
//! The state machine SCO content drives through the fixed runtime API.
//!
//! ```text
//! Uninitialized ──Initialize──▶ Initializing ──hydrated──▶ Ready
//!                                   ▲                        │
//!                                   └──────Initialize── Terminated ◀──Terminate
//! ```
//!
//! Every runtime call returns synchronously. Hydration, commits and the
//! fallback flush run as tasks on the tokio runtime the adapter was built
//! on; [`RuntimeAdapter::settle`] waits for them. Transport failures are
//! logged and counted, never surfaced to content. The one exception is the
//! initial hydration, which reports to the host's error hook.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::completion::{apply_objective_measure, CompletionEvent, CompletionTracker};
use super::error_code::ErrorCode;
use super::transport::{BackingStore, Hydration};
use crate::cmi::element::{CmiElement, OBJECTIVES};
use crate::cmi::model::{check_value, children_for, is_known_scalar, is_read_only, seeded_defaults};
use crate::cmi::sanitize::parse_real;
use crate::cmi::time::{format_session_time, is_unset_session_time};
use crate::cmi::{parse_lesson_status, sanitize_cmi_value, validate_cmi_key, AttemptSummary, CmiStore};
use crate::config::RuntimeSettings;
use crate::error::{ScormError, TransportError};
use crate::manifest::{ManifestObjective, PackageManifest};
use crate::version::ScormVersion;

const NAV_REQUEST: &str = "adl.nav.request";

/// Lifecycle of one adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterState {
    Uninitialized,
    Initializing,
    Ready,
    Terminated,
}

/// Everything the adapter needs to know about the attempt it serves.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub package_id: String,
    pub version: ScormVersion,
    pub learner_id: String,
    pub learner_name: String,
    /// `credit` / `no-credit`
    pub credit: String,
    /// `normal` / `browse` / `review`
    pub mode: String,
    pub launch_data: Option<String>,
    /// 1.2 `cmi.student_data.mastery_score`
    pub mastery_score: Option<f64>,
    /// 2004 `cmi.scaled_passing_score` declared by the package.
    pub scaled_passing_score: Option<f64>,
    /// Threshold used when neither content nor package declares one.
    pub default_passing_score: f64,
    /// Manifest-authored objectives, seeded at construction.
    pub objectives: Vec<ManifestObjective>,
    pub exit_notify_delay: Duration,
}

impl AdapterConfig {
    pub fn new(package_id: impl Into<String>, version: ScormVersion) -> Self {
        let settings = RuntimeSettings::default();
        Self {
            package_id: package_id.into(),
            version,
            learner_id: String::new(),
            learner_name: String::new(),
            credit: settings.credit.clone(),
            mode: settings.mode.clone(),
            launch_data: None,
            mastery_score: None,
            scaled_passing_score: None,
            default_passing_score: settings.scaled_passing_score,
            objectives: Vec::new(),
            exit_notify_delay: settings.exit_notify_delay(),
        }
    }

    /// Build from a parsed package and the runtime section of the config.
    pub fn from_manifest(
        package_id: impl Into<String>,
        manifest: &PackageManifest,
        settings: &RuntimeSettings,
    ) -> Self {
        Self {
            package_id: package_id.into(),
            version: manifest.version,
            learner_id: String::new(),
            learner_name: String::new(),
            credit: settings.credit.clone(),
            mode: settings.mode.clone(),
            launch_data: None,
            mastery_score: manifest.mastery_score,
            scaled_passing_score: manifest.scaled_passing_score(),
            default_passing_score: settings.scaled_passing_score,
            objectives: manifest.objectives.clone(),
            exit_notify_delay: settings.exit_notify_delay(),
        }
    }

    pub fn with_learner(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.learner_id = id.into();
        self.learner_name = name.into();
        self
    }

    pub fn with_exit_notify_delay(mut self, delay: Duration) -> Self {
        self.exit_notify_delay = delay;
        self
    }

    /// Scalar values present before hydration.
    fn seeds(&self) -> Vec<(String, String)> {
        let mut seeds: Vec<(String, String)> = seeded_defaults(self.version)
            .into_iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        let mut push = |key: &str, value: String| seeds.push((key.to_string(), value));

        match self.version {
            ScormVersion::Scorm12 => {
                push("cmi.core.student_id", self.learner_id.clone());
                push("cmi.core.student_name", self.learner_name.clone());
                push("cmi.core.credit", self.credit.clone());
                push("cmi.core.lesson_mode", self.mode.clone());
                if let Some(mastery) = self.mastery_score {
                    push("cmi.student_data.mastery_score", mastery.to_string());
                }
            }
            ScormVersion::Scorm2004 => {
                push("cmi.learner_id", self.learner_id.clone());
                push("cmi.learner_name", self.learner_name.clone());
                push("cmi.credit", self.credit.clone());
                push("cmi.mode", self.mode.clone());
                if let Some(passing) = self.scaled_passing_score {
                    push("cmi.scaled_passing_score", passing.to_string());
                }
            }
        }
        if let Some(launch_data) = &self.launch_data {
            push("cmi.launch_data", launch_data.clone());
        }
        seeds
    }
}

/// Delivered to the host once content has signalled it is leaving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitEvent {
    pub attempt_id: Option<String>,
    pub exit: String,
    pub nav_request: Option<String>,
    /// `passed` / `failed` when determined during this session.
    pub outcome: Option<String>,
}

type Hook<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Host callbacks. All of them run outside the adapter's lock.
#[derive(Clone, Default)]
pub struct AdapterHooks {
    on_completion: Option<Hook<CompletionEvent>>,
    on_exit: Option<Hook<ExitEvent>>,
    on_error: Option<Hook<TransportError>>,
}

impl AdapterHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_completion(mut self, hook: impl Fn(&CompletionEvent) + Send + Sync + 'static) -> Self {
        self.on_completion = Some(Arc::new(hook));
        self
    }

    pub fn on_exit(mut self, hook: impl Fn(&ExitEvent) + Send + Sync + 'static) -> Self {
        self.on_exit = Some(Arc::new(hook));
        self
    }

    /// Called when the initial hydration request fails.
    pub fn on_error(mut self, hook: impl Fn(&TransportError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }
}

/// Transport outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterStats {
    pub flushes: u64,
    pub transport_failures: u64,
    pub skipped_flushes: u64,
    pub completion_events: u64,
}

#[derive(Debug, Default)]
struct Counters {
    flushes: AtomicU64,
    transport_failures: AtomicU64,
    skipped_flushes: AtomicU64,
    completion_events: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HydrationPhase {
    NotStarted,
    Pending,
    Settled,
}

/// Writes made before hydration, replayed in order once it lands.
#[derive(Debug, Clone)]
enum QueuedWrite {
    /// From content; re-resolves collection identity on replay.
    Content { key: String, value: String },
    /// Derived by Terminate; stored verbatim.
    Runtime { key: String, value: String },
}

struct Session {
    state: AdapterState,
    cmi: CmiStore,
    attempt_id: Option<String>,
    hydration: HydrationPhase,
    pending: Vec<QueuedWrite>,
    last_error: ErrorCode,
    diagnostic: String,
    started_at: Option<Instant>,
    /// Session time was computed by Terminate rather than set by content.
    session_time_auto: bool,
    /// Exit was forced to `suspend` by Terminate rather than set by content.
    exit_auto: bool,
    tracker: CompletionTracker,
    outcome_since_init: Option<String>,
}

impl Session {
    fn clear_error(&mut self) {
        self.last_error = ErrorCode::NoError;
        self.diagnostic.clear();
    }

    fn fail(&mut self, code: ErrorCode, diagnostic: impl Into<String>) -> bool {
        self.last_error = code;
        self.diagnostic = diagnostic.into();
        debug!(code = code.code(), diagnostic = %self.diagnostic, "Runtime call failed");
        false
    }
}

enum FinalFlush {
    Now { attempt_id: String, snapshot: BTreeMap<String, String> },
    AfterHydration,
    Skip,
}

struct Inner {
    config: AdapterConfig,
    store: Arc<dyn BackingStore>,
    hooks: AdapterHooks,
    handle: Handle,
    session: Mutex<Session>,
    hydrated: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    counters: Counters,
}

/// One attempt's runtime API handle. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RuntimeAdapter {
    inner: Arc<Inner>,
}

fn bind_objective(cmi: &mut CmiStore, id: &str) -> usize {
    if let Some(index) = cmi.objective_index(id) {
        return index;
    }
    let next = cmi.count(OBJECTIVES);
    cmi.write(&format!("{OBJECTIVES}.{next}.id"), id);
    cmi.objective_index(id).unwrap_or(next)
}

fn is_terminal(cmi: &CmiStore) -> bool {
    match cmi.version() {
        ScormVersion::Scorm12 => cmi
            .get("cmi.core.lesson_status")
            .is_some_and(|s| parse_lesson_status(s).is_terminal()),
        ScormVersion::Scorm2004 => {
            cmi.get("cmi.completion_status") == Some("completed")
                || matches!(cmi.get("cmi.success_status"), Some("passed" | "failed"))
        }
    }
}

impl RuntimeAdapter {
    /// Build on the ambient tokio runtime.
    pub fn new(
        config: AdapterConfig,
        store: Arc<dyn BackingStore>,
        hooks: AdapterHooks,
    ) -> Result<Self, ScormError> {
        let handle = Handle::try_current().map_err(|e| ScormError::Runtime(e.to_string()))?;
        Ok(Self::with_handle(config, store, hooks, handle))
    }

    pub fn with_handle(
        config: AdapterConfig,
        store: Arc<dyn BackingStore>,
        hooks: AdapterHooks,
        handle: Handle,
    ) -> Self {
        let mut cmi = CmiStore::new(config.version);
        for (key, value) in config.seeds() {
            cmi.seed(&key, &value);
        }
        for objective in &config.objectives {
            bind_objective(&mut cmi, &objective.id);
        }
        cmi.take_dirty();

        info!(
            package_id = %config.package_id,
            version = %config.version,
            objectives = config.objectives.len(),
            "Runtime adapter created"
        );

        let (hydrated, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                hooks,
                handle,
                session: Mutex::new(Session {
                    state: AdapterState::Uninitialized,
                    cmi,
                    attempt_id: None,
                    hydration: HydrationPhase::NotStarted,
                    pending: Vec::new(),
                    last_error: ErrorCode::NoError,
                    diagnostic: String::new(),
                    started_at: None,
                    session_time_auto: false,
                    exit_auto: false,
                    tracker: CompletionTracker::default(),
                    outcome_since_init: None,
                }),
                hydrated,
                tasks: Mutex::new(Vec::new()),
                counters: Counters::default(),
            }),
        }
    }

    pub fn version(&self) -> ScormVersion {
        self.inner.config.version
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.inner.config
    }

    pub fn state(&self) -> AdapterState {
        self.inner.lock().state
    }

    pub fn attempt_id(&self) -> Option<String> {
        self.inner.lock().attempt_id.clone()
    }

    /// Full copy of the CMI cache.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.inner.lock().cmi.snapshot()
    }

    pub fn summary(&self) -> AttemptSummary {
        AttemptSummary::from_snapshot(self.version(), &self.snapshot())
    }

    pub fn stats(&self) -> AdapterStats {
        let c = &self.inner.counters;
        AdapterStats {
            flushes: c.flushes.load(Ordering::Relaxed),
            transport_failures: c.transport_failures.load(Ordering::Relaxed),
            skipped_flushes: c.skipped_flushes.load(Ordering::Relaxed),
            completion_events: c.completion_events.load(Ordering::Relaxed),
        }
    }

    /// Wait until every background task (including ones spawned by other
    /// tasks) has finished.
    pub async fn settle(&self) {
        loop {
            let tasks = std::mem::take(&mut *self.inner.tasks());
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                if let Err(e) = task.await {
                    warn!(error = %e, "Adapter task did not complete");
                }
            }
        }
    }

    /// Resolves once the first hydration attempt has settled.
    pub async fn wait_hydrated(&self) {
        self.inner.wait_hydrated().await;
    }

    // =========================================================================
    // Runtime API
    // =========================================================================

    pub fn initialize(&self, arg: &str) -> bool {
        let mut session = self.inner.lock();
        session.clear_error();
        if !arg.is_empty() {
            return session.fail(ErrorCode::InvalidArgument, "Initialize expects an empty string");
        }

        let state = session.state;
        match state {
            AdapterState::Ready => session.fail(ErrorCode::GeneralException, "Already initialized"),
            AdapterState::Initializing => true,
            AdapterState::Uninitialized => {
                session.state = AdapterState::Initializing;
                session.started_at = Some(Instant::now());
                session.hydration = HydrationPhase::Pending;
                drop(session);

                debug!(package_id = %self.inner.config.package_id, "Initialize; hydrating");
                let inner = self.inner.clone();
                self.inner.spawn(async move { inner.hydrate().await });
                true
            }
            AdapterState::Terminated => {
                session.outcome_since_init = None;
                session.state = if session.hydration == HydrationPhase::Settled {
                    AdapterState::Ready
                } else {
                    AdapterState::Initializing
                };
                debug!(attempt_id = ?session.attempt_id, "Re-initialized after Terminate");
                true
            }
        }
    }

    pub fn get_value(&self, key: &str) -> String {
        if self.state() == AdapterState::Uninitialized {
            debug!(key, "GetValue before Initialize; initializing");
            self.initialize("");
        }

        let version = self.version();
        let mut session = self.inner.lock();
        session.clear_error();
        if key.is_empty() {
            session.fail(ErrorCode::InvalidArgument, "GetValue requires an element name");
            return String::new();
        }
        if let Some(value) = session.cmi.get(key) {
            return value.to_string();
        }

        match CmiElement::parse(key) {
            CmiElement::Count { parent } => {
                if is_known_scalar(version, &parent) {
                    session.fail(ErrorCode::ElementNotAnArray, format!("{parent} is not an array"));
                    String::new()
                } else {
                    "0".to_string()
                }
            }
            CmiElement::Children { parent } => match children_for(version, &parent) {
                Some(children) => children.to_string(),
                None => {
                    session.fail(
                        ErrorCode::ElementCannotHaveChildren,
                        format!("{parent} has no children"),
                    );
                    String::new()
                }
            },
            // Content reads indices that do not exist yet
            element if element.is_data_model() => String::new(),
            _ => {
                session.fail(ErrorCode::NotImplemented, format!("Unknown element {key}"));
                String::new()
            }
        }
    }

    pub fn set_value(&self, key: &str, value: &str) -> bool {
        let version = self.version();
        let event = {
            let mut session = self.inner.lock();
            session.clear_error();

            if matches!(session.state, AdapterState::Uninitialized | AdapterState::Terminated) {
                return session.fail(ErrorCode::NotInitialized, "SetValue outside an active session");
            }
            if key.is_empty() {
                return session.fail(ErrorCode::InvalidArgument, "SetValue requires an element name");
            }
            if is_read_only(version, key) {
                return session.fail(ErrorCode::ReadOnly, format!("{key} is read only"));
            }
            if CmiElement::parse(key).is_keyword() || key.ends_with("._version") {
                return session.fail(ErrorCode::InvalidSetOnKeyword, format!("{key} is a keyword"));
            }
            if !validate_cmi_key(key) {
                return session.fail(ErrorCode::NotImplemented, format!("Unknown element {key}"));
            }

            let sanitized = sanitize_cmi_value(key, value);
            let value = match check_value(version, key, &sanitized) {
                Ok(value) => value,
                Err(rejection) => {
                    return session.fail(
                        ErrorCode::IncorrectDataType,
                        format!("{key} rejected value {sanitized:?}: {rejection:?}"),
                    );
                }
            };

            if session.hydration == HydrationPhase::Pending {
                session.pending.push(QueuedWrite::Content {
                    key: key.to_string(),
                    value: value.clone(),
                });
            }
            self.inner.store_write(&mut session, key, &value)
        };

        self.inner.emit_completion(event);
        true
    }

    pub fn commit(&self, arg: &str) -> bool {
        {
            let mut session = self.inner.lock();
            session.clear_error();
            if !arg.is_empty() {
                return session.fail(ErrorCode::InvalidArgument, "Commit expects an empty string");
            }
            if !matches!(session.state, AdapterState::Initializing | AdapterState::Ready) {
                return session.fail(ErrorCode::NotInitialized, "Commit outside an active session");
            }
        }

        let inner = self.inner.clone();
        self.inner.spawn(async move { inner.flush_dirty().await });
        true
    }

    pub fn terminate(&self, arg: &str) -> bool {
        let version = self.version();
        let (completion, exit, flush) = {
            let mut guard = self.inner.lock();
            let session = &mut *guard;
            session.clear_error();
            if !arg.is_empty() {
                return session.fail(ErrorCode::InvalidArgument, "Terminate expects an empty string");
            }
            match session.state {
                AdapterState::Terminated => return true,
                AdapterState::Uninitialized => {
                    return session.fail(ErrorCode::NotInitialized, "Terminate before Initialize");
                }
                AdapterState::Initializing | AdapterState::Ready => {}
            }

            let watched = [
                version.status_key(),
                "cmi.success_status",
                version.session_time_key(),
                version.exit_key(),
            ];
            let before: Vec<Option<String>> = watched
                .iter()
                .map(|key| session.cmi.get(key).map(str::to_string))
                .collect();

            let passing = self.inner.passing_score(&session.cmi);
            let mastery = session
                .cmi
                .get("cmi.student_data.mastery_score")
                .and_then(parse_real)
                .or(self.inner.config.mastery_score);
            let for_credit = self.inner.config.credit == "credit";
            let completion = session
                .tracker
                .finalize(&mut session.cmi, passing, mastery, for_credit);
            self.inner.note_outcome(session, completion.as_ref());

            let time_key = version.session_time_key();
            if session.session_time_auto || session.cmi.get(time_key).map_or(true, is_unset_session_time) {
                let elapsed = session.started_at.map(|t| t.elapsed()).unwrap_or_default();
                session.cmi.insert(time_key, &format_session_time(version, elapsed));
                session.session_time_auto = true;
            }

            let exit_key = version.exit_key();
            if !is_terminal(&session.cmi) {
                if session.cmi.get(exit_key).map_or(true, str::is_empty) {
                    session.cmi.insert(exit_key, "suspend");
                    session.exit_auto = true;
                }
            } else if session.exit_auto {
                // A finished attempt must not resume
                session.cmi.insert(exit_key, "");
                session.exit_auto = false;
            }

            if session.hydration == HydrationPhase::Pending {
                for (key, old) in watched.iter().zip(before) {
                    if let Some(now) = session.cmi.get(key) {
                        if old.as_deref() != Some(now) {
                            session.pending.push(QueuedWrite::Runtime {
                                key: key.to_string(),
                                value: now.to_string(),
                            });
                        }
                    }
                }
            }

            session.state = AdapterState::Terminated;
            let exit = self.inner.exit_event(session);
            let flush = match (session.hydration, session.attempt_id.clone()) {
                (HydrationPhase::Settled, Some(attempt_id)) => FinalFlush::Now {
                    attempt_id,
                    snapshot: session.cmi.snapshot(),
                },
                (HydrationPhase::Settled, None) | (HydrationPhase::NotStarted, _) => FinalFlush::Skip,
                (HydrationPhase::Pending, _) => FinalFlush::AfterHydration,
            };
            (completion, exit, flush)
        };

        info!(
            package_id = %self.inner.config.package_id,
            exit = ?exit.as_ref().map(|e| e.exit.as_str()),
            "Terminate"
        );
        self.inner.emit_completion(completion);

        match flush {
            FinalFlush::Now { attempt_id, snapshot } => self.inner.deliver_final(attempt_id, snapshot),
            FinalFlush::AfterHydration => {
                let inner = self.inner.clone();
                self.inner.spawn(async move {
                    inner.wait_hydrated().await;
                    let target = {
                        let session = inner.lock();
                        let attempt_id = session.attempt_id.clone();
                        attempt_id.map(|id| (id, session.cmi.snapshot()))
                    };
                    match target {
                        Some((attempt_id, snapshot)) => inner.deliver_final(attempt_id, snapshot),
                        None => inner.skip_flush("final flush"),
                    }
                });
            }
            FinalFlush::Skip => self.inner.skip_flush("final flush"),
        }

        if let (Some(event), Some(hook)) = (exit, self.inner.hooks.on_exit.clone()) {
            let delay = self.inner.config.exit_notify_delay;
            self.inner.spawn(async move {
                tokio::time::sleep(delay).await;
                hook(&event);
            });
        }
        true
    }

    pub fn get_last_error(&self) -> String {
        self.inner.lock().last_error.to_string()
    }

    pub fn get_error_string(&self, code: &str) -> String {
        ErrorCode::parse(code)
            .map(|c| c.message().to_string())
            .unwrap_or_default()
    }

    pub fn get_diagnostic(&self, code: &str) -> String {
        let session = self.inner.lock();
        let last = session.last_error;
        let asked = if code.trim().is_empty() {
            Some(last)
        } else {
            ErrorCode::parse(code)
        };
        match asked {
            Some(c) if c == last && !session.diagnostic.is_empty() => session.diagnostic.clone(),
            Some(c) => c.message().to_string(),
            None => String::new(),
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = self.handle.spawn(task);
        let mut tasks = self.tasks();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    async fn wait_hydrated(&self) {
        let mut rx = self.hydrated.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn passing_score(&self, cmi: &CmiStore) -> f64 {
        cmi.get("cmi.scaled_passing_score")
            .and_then(parse_real)
            .or(self.config.scaled_passing_score)
            .unwrap_or(self.config.default_passing_score)
    }

    /// Apply a validated write: identity resolution, objective measure, then
    /// completion inference.
    fn store_write(&self, session: &mut Session, key: &str, value: &str) -> Option<CompletionEvent> {
        let stored = session.cmi.write(key, value);
        if stored == self.config.version.session_time_key() {
            session.session_time_auto = false;
        }
        if stored == self.config.version.exit_key() {
            session.exit_auto = false;
        }
        apply_objective_measure(&mut session.cmi, &stored, &self.config.objectives);

        let passing = self.passing_score(&session.cmi);
        let event = session.tracker.observe(&mut session.cmi, &stored, passing);
        self.note_outcome(session, event.as_ref());
        event
    }

    fn note_outcome(&self, session: &mut Session, event: Option<&CompletionEvent>) {
        if let Some(event) = event.filter(|e| matches!(e.status.as_str(), "passed" | "failed")) {
            session.outcome_since_init = Some(event.status.clone());
        }
    }

    fn emit_completion(&self, event: Option<CompletionEvent>) {
        let Some(event) = event else {
            return;
        };
        Counters::bump(&self.counters.completion_events);
        info!(
            package_id = %self.config.package_id,
            status = %event.status,
            score = ?event.score,
            "Completion"
        );
        if let Some(hook) = &self.hooks.on_completion {
            hook(&event);
        }
    }

    fn exit_event(&self, session: &Session) -> Option<ExitEvent> {
        let exit = session.cmi.get(self.config.version.exit_key()).unwrap_or_default();
        let nav_request = session.cmi.get(NAV_REQUEST).filter(|n| !n.is_empty());

        let explicit_exit = matches!(exit, "logout" | "normal");
        let nav_exit = nav_request.is_some_and(|n| matches!(n, "exit" | "exitAll" | "abandon" | "abandonAll"));
        if !(explicit_exit || nav_exit || session.outcome_since_init.is_some()) {
            return None;
        }
        Some(ExitEvent {
            attempt_id: session.attempt_id.clone(),
            exit: exit.to_string(),
            nav_request: nav_request.map(str::to_string),
            outcome: session.outcome_since_init.clone(),
        })
    }

    fn skip_flush(&self, what: &str) {
        Counters::bump(&self.counters.skipped_flushes);
        warn!(package_id = %self.config.package_id, what, "No attempt id; flush skipped");
    }

    fn record_failure(&self, operation: &str, error: &TransportError) {
        Counters::bump(&self.counters.transport_failures);
        warn!(package_id = %self.config.package_id, operation, error = %error, "Backing store call failed");
    }

    // =========================================================================
    // Background work
    // =========================================================================

    async fn hydrate(self: Arc<Self>) {
        let result = self.store.initialize(&self.config.package_id).await;

        let failure = {
            let mut session = self.lock();
            session.hydration = HydrationPhase::Settled;
            let failure = match result {
                Ok(hydration) => {
                    info!(
                        attempt_id = %hydration.attempt_id,
                        keys = hydration.cmi_data.len(),
                        objectives = hydration.objectives.len(),
                        "Attempt hydrated"
                    );
                    self.apply_hydration(&mut session, hydration);
                    None
                }
                Err(e) => {
                    self.record_failure("initialize", &e);
                    session.pending.clear();
                    Some(e)
                }
            };
            if session.state == AdapterState::Initializing {
                session.state = AdapterState::Ready;
            }
            failure
        };

        self.hydrated.send_replace(true);
        if let (Some(error), Some(hook)) = (failure, &self.hooks.on_error) {
            hook(&error);
        }
    }

    /// Rebuild the cache as seeds < server data < writes made meanwhile.
    fn apply_hydration(&self, session: &mut Session, hydration: Hydration) {
        let Hydration {
            attempt_id,
            cmi_data,
            objectives,
        } = hydration;
        let resumed = !cmi_data.is_empty();

        let mut values: BTreeMap<String, String> = self.config.seeds().into_iter().collect();
        values.extend(cmi_data);
        session.cmi.replace_all(values);

        for objective in &self.config.objectives {
            bind_objective(&mut session.cmi, &objective.id);
        }
        for record in &objectives {
            let index = bind_objective(&mut session.cmi, &record.id);
            for (field, value) in record.fields() {
                session.cmi.insert(&format!("{OBJECTIVES}.{index}.{field}"), value);
            }
        }
        session.cmi.take_dirty();

        let version = self.config.version;
        if session.cmi.get(version.exit_key()) == Some("suspend") {
            session.cmi.insert(version.entry_key(), "resume");
            session.cmi.insert(version.exit_key(), "");
        } else if resumed {
            session.cmi.insert(version.entry_key(), "");
        }

        session.attempt_id = Some(attempt_id);
        let queued = std::mem::take(&mut session.pending);
        if !queued.is_empty() {
            debug!(writes = queued.len(), "Replaying writes made before hydration");
        }
        for write in queued {
            match write {
                // Events already fired when the write first landed
                QueuedWrite::Content { key, value } => {
                    self.store_write(session, &key, &value);
                }
                QueuedWrite::Runtime { key, value } => session.cmi.insert(&key, &value),
            }
        }
    }

    /// Commit: push dirty keys one by one, then commit.
    async fn flush_dirty(self: Arc<Self>) {
        self.wait_hydrated().await;
        let target = {
            let mut session = self.lock();
            let attempt_id = session.attempt_id.clone();
            attempt_id.map(|id| (id, session.cmi.take_dirty()))
        };
        let Some((attempt_id, dirty)) = target else {
            self.skip_flush("commit");
            return;
        };

        let mut failed = Vec::new();
        for (key, value) in &dirty {
            if let Err(e) = self.store.set_value(&attempt_id, key, value).await {
                self.record_failure("set_value", &e);
                failed.push(key.clone());
            }
        }
        if !failed.is_empty() {
            self.lock().cmi.mark_dirty(failed);
        }

        match self.store.commit(&attempt_id).await {
            Ok(()) => {
                Counters::bump(&self.counters.flushes);
                debug!(attempt_id = %attempt_id, keys = dirty.len(), "Committed");
            }
            Err(e) => self.record_failure("commit", &e),
        }
    }

    /// Terminate: unload-resilient delivery of the full snapshot, falling
    /// back to ordinary requests.
    fn deliver_final(self: &Arc<Self>, attempt_id: String, snapshot: BTreeMap<String, String>) {
        match self.store.commit_sync(&attempt_id, &snapshot) {
            Ok(()) => {
                Counters::bump(&self.counters.flushes);
                self.lock().cmi.take_dirty();
                debug!(attempt_id = %attempt_id, keys = snapshot.len(), "Final flush delivered");
                self.end_attempt(&attempt_id);
            }
            Err(e) => {
                self.record_failure("commit_sync", &e);
                let inner = Arc::clone(self);
                self.spawn(async move { inner.deliver_async(attempt_id, snapshot).await });
            }
        }
    }

    async fn deliver_async(self: Arc<Self>, attempt_id: String, snapshot: BTreeMap<String, String>) {
        let mut failures = 0usize;
        for (key, value) in &snapshot {
            if let Err(e) = self.store.set_value(&attempt_id, key, value).await {
                self.record_failure("set_value", &e);
                failures += 1;
            }
        }
        match self.store.commit(&attempt_id).await {
            Ok(()) if failures == 0 => {
                Counters::bump(&self.counters.flushes);
                self.lock().cmi.take_dirty();
                debug!(attempt_id = %attempt_id, "Final flush delivered by fallback");
            }
            Ok(()) => {}
            Err(e) => self.record_failure("commit", &e),
        }
        self.end_attempt(&attempt_id);
    }

    fn end_attempt(&self, attempt_id: &str) {
        if let Err(e) = self.store.terminate(attempt_id) {
            self.record_failure("terminate", &e);
        }
    }
}
