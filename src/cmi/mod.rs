//! CMI data model: key classification, sanitizing, storage and timing.

pub mod element;
pub mod model;
pub mod sanitize;
pub mod store;
pub mod summary;
pub mod time;

pub use element::CmiElement;
pub use sanitize::{
    parse_lesson_status, parse_scaled_score, parse_score, sanitize_cmi_value, validate_cmi_key,
    LessonStatus,
};
pub use store::CmiStore;
pub use summary::AttemptSummary;
