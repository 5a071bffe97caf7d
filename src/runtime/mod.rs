//! Runtime API adapter and its collaborators.

pub mod adapter;
pub mod api;
mod completion;
pub mod error_code;
pub mod transport;

pub use adapter::{AdapterConfig, AdapterHooks, AdapterState, AdapterStats, ExitEvent, RuntimeAdapter};
pub use api::{RuntimeApi, Scorm12Api, Scorm2004Api};
pub use completion::CompletionEvent;
pub use error_code::ErrorCode;
pub use transport::{BackingStore, Hydration, MemoryBackingStore, ObjectiveRecord, StoreCall};
