//! SCORM Runtime - Learning content runtime for SCORM 1.2 and SCORM 2004
//!
//! Lets third-party e-learning packages (SCOs) report progress, scores and
//! completion to a host LMS, and vets uploaded packages before anything in
//! them is served.
//!
//! ## Architecture
//!
//! ```text
//! imsmanifest.xml ──▶ manifest ──▶ AdapterConfig ──▶ RuntimeAdapter ◀── SCO content
//!       │                                                 │             (API / API_1484_11)
//!   package.zip ──▶ security (verdict)              BackingStore
//! ```
//!
//! - **cmi**: key classification, sanitizers, the CMI store and session time
//! - **manifest**: namespace-tolerant `imsmanifest.xml` parsing
//! - **security**: archive validation (traversal, blocked types, size, scripts)
//! - **runtime**: the adapter state machine, version facades, transport trait
//! - **server**: rate limiter and session cache for the HTTP boundary

pub mod cmi;
pub mod config;
pub mod error;
pub mod manifest;
pub mod runtime;
pub mod security;
pub mod server;
pub mod version;

// Re-exports
pub use cmi::{AttemptSummary, CmiElement, CmiStore, LessonStatus};
pub use config::Config;
pub use error::{ConfigError, ManifestError, PackageError, ScormError, TransportError};
pub use manifest::{ManifestObjective, PackageManifest};
pub use runtime::{
    AdapterConfig, AdapterHooks, AdapterState, BackingStore, CompletionEvent, ErrorCode, ExitEvent,
    MemoryBackingStore, RuntimeAdapter, RuntimeApi, Scorm12Api, Scorm2004Api,
};
pub use security::{PackageValidator, SecurityVerdict};
pub use server::{RateLimiter, RuntimeServices, SessionCache};
pub use version::ScormVersion;
