//! Fixed per-version data-model tables: `_children` literals, read-only
//! elements, seeded defaults and value vocabularies.

use super::element::generalize_indices;
use super::sanitize::parse_real;
use super::time::{is_unset_session_time, parse_session_time};
use crate::version::ScormVersion;

const CHILDREN_12: &[(&str, &str)] = &[
    (
        "cmi.core",
        "student_id,student_name,lesson_location,credit,lesson_status,entry,score,total_time,lesson_mode,exit,session_time",
    ),
    ("cmi.core.score", "raw,min,max"),
    ("cmi.objectives", "id,score,status"),
    ("cmi.objectives.n.score", "raw,min,max"),
    ("cmi.student_data", "mastery_score,max_time_allowed,time_limit_action"),
    ("cmi.student_preference", "audio,language,speed,text"),
    (
        "cmi.interactions",
        "id,objectives,time,type,correct_responses,weighting,student_response,result,latency",
    ),
];

const CHILDREN_2004: &[(&str, &str)] = &[
    ("cmi.score", "scaled,raw,min,max"),
    (
        "cmi.objectives",
        "id,score,success_status,completion_status,progress_measure,description",
    ),
    ("cmi.objectives.n.score", "scaled,raw,min,max"),
    (
        "cmi.interactions",
        "id,type,objectives,timestamp,correct_responses,weighting,learner_response,result,latency,description",
    ),
    (
        "cmi.learner_preference",
        "audio_level,language,delivery_speed,audio_captioning",
    ),
    ("cmi.comments_from_learner", "comment,location,timestamp"),
    ("cmi.comments_from_lms", "comment,location,timestamp"),
    ("adl.data", "id,store"),
];

const READ_ONLY_12: &[&str] = &[
    "cmi.core.student_id",
    "cmi.core.student_name",
    "cmi.core.credit",
    "cmi.core.entry",
    "cmi.core.total_time",
    "cmi.core.lesson_mode",
    "cmi.launch_data",
    "cmi.comments_from_lms",
    "cmi.student_data.mastery_score",
    "cmi.student_data.max_time_allowed",
    "cmi.student_data.time_limit_action",
    "cmi._version",
];

const READ_ONLY_2004: &[&str] = &[
    "cmi._version",
    "cmi.completion_threshold",
    "cmi.credit",
    "cmi.entry",
    "cmi.launch_data",
    "cmi.learner_id",
    "cmi.learner_name",
    "cmi.max_time_allowed",
    "cmi.mode",
    "cmi.scaled_passing_score",
    "cmi.time_limit_action",
    "cmi.total_time",
];

const STATUS_12: &[&str] = &[
    "passed",
    "completed",
    "failed",
    "incomplete",
    "browsed",
    "not attempted",
];
const COMPLETION_2004: &[&str] = &["completed", "incomplete", "not attempted", "unknown"];
const SUCCESS_2004: &[&str] = &["passed", "failed", "unknown"];
const EXIT_12: &[&str] = &["time-out", "suspend", "logout", ""];
const EXIT_2004: &[&str] = &["time-out", "suspend", "logout", "normal", ""];

/// Fixed `_children` literal for `parent`, if the version defines one.
pub fn children_for(version: ScormVersion, parent: &str) -> Option<&'static str> {
    let table = match version {
        ScormVersion::Scorm12 => CHILDREN_12,
        ScormVersion::Scorm2004 => CHILDREN_2004,
    };
    let general = generalize_indices(parent);
    table
        .iter()
        .find(|(path, _)| *path == general)
        .map(|(_, children)| *children)
}

/// Whether content may not write `key`.
pub fn is_read_only(version: ScormVersion, key: &str) -> bool {
    match version {
        ScormVersion::Scorm12 => READ_ONLY_12.contains(&key),
        ScormVersion::Scorm2004 => READ_ONLY_2004.contains(&key),
    }
}

/// Whether `key` names a scalar leaf that can never be counted.
pub fn is_known_scalar(version: ScormVersion, key: &str) -> bool {
    is_read_only(version, key)
        || vocabulary_for(version, key).is_some()
        || matches!(
            key,
            "cmi.suspend_data" | "cmi.core.lesson_location" | "cmi.location" | "cmi.core.session_time" | "cmi.session_time"
        )
}

/// Why a value was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueRejection {
    NotInVocabulary,
    NotANumber,
    OutOfRange,
    BadTimespan,
}

fn vocabulary_for(version: ScormVersion, key: &str) -> Option<&'static [&'static str]> {
    let general = generalize_indices(key);
    match (version, general.as_str()) {
        (ScormVersion::Scorm12, "cmi.core.lesson_status") => Some(STATUS_12),
        (ScormVersion::Scorm12, "cmi.objectives.n.status") => Some(STATUS_12),
        (ScormVersion::Scorm12, "cmi.core.exit") => Some(EXIT_12),
        (ScormVersion::Scorm2004, "cmi.completion_status") => Some(COMPLETION_2004),
        (ScormVersion::Scorm2004, "cmi.objectives.n.completion_status") => Some(COMPLETION_2004),
        (ScormVersion::Scorm2004, "cmi.success_status") => Some(SUCCESS_2004),
        (ScormVersion::Scorm2004, "cmi.objectives.n.success_status") => Some(SUCCESS_2004),
        (ScormVersion::Scorm2004, "cmi.exit") => Some(EXIT_2004),
        _ => None,
    }
}

/// Check a (sanitized) value against the element's data type, returning the
/// normalized value to store.
pub fn check_value(version: ScormVersion, key: &str, value: &str) -> Result<String, ValueRejection> {
    if let Some(vocabulary) = vocabulary_for(version, key) {
        let normalized = value.trim().to_ascii_lowercase();
        return if vocabulary.contains(&normalized.as_str()) {
            Ok(normalized)
        } else {
            Err(ValueRejection::NotInVocabulary)
        };
    }

    let general = generalize_indices(key);
    let leaf = general.rsplit('.').next().unwrap_or_default();
    let in_score = general.ends_with(&format!("score.{leaf}"));

    if key == version.session_time_key() {
        if is_unset_session_time(value) || parse_session_time(value).is_some() {
            return Ok(value.trim().to_string());
        }
        return Err(ValueRejection::BadTimespan);
    }

    if in_score && matches!(leaf, "raw" | "min" | "max" | "scaled") {
        let number = parse_real(value).ok_or(ValueRejection::NotANumber)?;
        if leaf == "scaled" && !(-1.0..=1.0).contains(&number) {
            return Err(ValueRejection::OutOfRange);
        }
        return Ok(value.trim().to_string());
    }

    if leaf == "progress_measure" {
        let number = parse_real(value).ok_or(ValueRejection::NotANumber)?;
        if !(0.0..=1.0).contains(&number) {
            return Err(ValueRejection::OutOfRange);
        }
        return Ok(value.trim().to_string());
    }

    Ok(value.to_string())
}

/// Defaults present before any hydration or content write.
pub fn seeded_defaults(version: ScormVersion) -> Vec<(&'static str, &'static str)> {
    match version {
        ScormVersion::Scorm12 => vec![
            ("cmi.core.lesson_location", ""),
            ("cmi.core.lesson_status", "not attempted"),
            ("cmi.core.entry", "ab-initio"),
            ("cmi.core.total_time", "0000:00:00.00"),
            ("cmi.suspend_data", ""),
        ],
        ScormVersion::Scorm2004 => vec![
            ("cmi._version", "1.0"),
            ("cmi.location", ""),
            ("cmi.completion_status", "unknown"),
            ("cmi.success_status", "unknown"),
            ("cmi.entry", "ab-initio"),
            ("cmi.total_time", "PT0H0M0S"),
            ("cmi.suspend_data", ""),
        ],
    }
}

/// Scalar fields synthesized for a newly created objective.
pub fn objective_defaults(version: ScormVersion) -> &'static [(&'static str, &'static str)] {
    match version {
        ScormVersion::Scorm12 => &[("status", "not attempted")],
        ScormVersion::Scorm2004 => &[
            ("success_status", "unknown"),
            ("completion_status", "unknown"),
        ],
    }
}
