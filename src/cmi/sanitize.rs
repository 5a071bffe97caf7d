//! Pure sanitizers and validators for CMI keys and values.
//!
//! These never fail loudly: values are silently truncated/stripped, keys are
//! either on the allow-list or not, and content-supplied scores and statuses
//! are clamped into range.

use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Maximum length of `suspend_data` values (characters).
pub const MAX_SUSPEND_DATA_LEN: usize = 64_000;

/// Maximum length of location-family values (characters).
pub const MAX_LOCATION_LEN: usize = 1_000;

/// Maximum length of every other value (characters).
pub const MAX_VALUE_LEN: usize = 4_096;

/// Keys accepted for both SCORM 1.2 and SCORM 2004.
const ALLOWED_KEY_PATTERNS: &[&str] = &[
    // SCORM 1.2 core
    r"^cmi\.core\.(_children|student_id|student_name|lesson_location|credit|lesson_status|entry|total_time|lesson_mode|exit|session_time)$",
    r"^cmi\.core\.score\.(_children|raw|min|max)$",
    r"^cmi\.(suspend_data|launch_data|comments|comments_from_lms|_version)$",
    r"^cmi\.student_data\.(_children|mastery_score|max_time_allowed|time_limit_action)$",
    r"^cmi\.student_preference\.(_children|audio|language|speed|text)$",
    // SCORM 2004 scalars
    r"^cmi\.(completion_status|success_status|completion_threshold|credit|entry|exit|learner_id|learner_name|location|max_time_allowed|mode|progress_measure|scaled_passing_score|session_time|time_limit_action|total_time)$",
    r"^cmi\.score\.(_children|scaled|raw|min|max)$",
    r"^cmi\.learner_preference\.(_children|audio_level|language|delivery_speed|audio_captioning)$",
    r"^cmi\.comments_from_(learner|lms)\.(_children|_count|\d+\.(comment|location|timestamp))$",
    // Objectives (both versions)
    r"^cmi\.objectives\.(_children|_count)$",
    r"^cmi\.objectives\.\d+\.(id|status|success_status|completion_status|progress_measure|description)$",
    r"^cmi\.objectives\.\d+\.score\.(_children|scaled|raw|min|max)$",
    // Interactions (both versions)
    r"^cmi\.interactions\.(_children|_count)$",
    r"^cmi\.interactions\.\d+\.(id|time|timestamp|type|weighting|student_response|learner_response|result|latency|description)$",
    r"^cmi\.interactions\.\d+\.objectives\.(_count|\d+\.id)$",
    r"^cmi\.interactions\.\d+\.correct_responses\.(_count|\d+\.pattern)$",
    // ADL namespaces
    r"^adl\.nav\.request$",
    r"^adl\.nav\.request_valid\.(continue|previous|choice|jump)(\.\{target=[^}]+\})?$",
    r"^adl\.data\.(_children|_count|\d+\.(id|store))$",
    // Generic aggregates
    r"^(cmi|adl)\.[a-z0-9_.]+\.(_count|_children)$",
];

fn allowed_keys() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new(ALLOWED_KEY_PATTERNS).unwrap_or_else(|_| RegexSet::empty())
    })
}

/// Whether `key` is a data-model element this runtime accepts.
pub fn validate_cmi_key(key: &str) -> bool {
    !key.is_empty() && allowed_keys().is_match(key)
}

fn max_len_for(key: &str) -> usize {
    if key.ends_with("suspend_data") {
        MAX_SUSPEND_DATA_LEN
    } else if key.ends_with("location") {
        MAX_LOCATION_LEN
    } else {
        MAX_VALUE_LEN
    }
}

/// Strip `<`/`>` and truncate to the key family's limit.
pub fn sanitize_cmi_value(key: &str, value: &str) -> String {
    let limit = max_len_for(key);
    value
        .chars()
        .filter(|c| *c != '<' && *c != '>')
        .take(limit)
        .collect()
}

/// Normalized lesson / completion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonStatus {
    Passed,
    Completed,
    Failed,
    Incomplete,
    Browsed,
    NotAttempted,
}

impl LessonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Incomplete => "incomplete",
            Self::Browsed => "browsed",
            Self::NotAttempted => "not attempted",
        }
    }

    /// Passed, failed or completed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Passed | Self::Failed | Self::Completed)
    }
}

/// Parse a content-supplied status. Unknown input becomes `incomplete`.
pub fn parse_lesson_status(raw: &str) -> LessonStatus {
    match raw.trim().to_ascii_lowercase().as_str() {
        "passed" => LessonStatus::Passed,
        "completed" => LessonStatus::Completed,
        "failed" => LessonStatus::Failed,
        "browsed" => LessonStatus::Browsed,
        "not attempted" | "not_attempted" => LessonStatus::NotAttempted,
        _ => LessonStatus::Incomplete,
    }
}

/// Parse a raw score, clamped to [0, 100].
pub fn parse_score(raw: &str) -> Option<f64> {
    let value: f64 = raw.trim().parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(value.clamp(0.0, 100.0))
}

/// Parse a scaled score, clamped to [-1, 1].
pub fn parse_scaled_score(raw: &str) -> Option<f64> {
    let value: f64 = raw.trim().parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(value.clamp(-1.0, 1.0))
}

/// Parse a finite real number without clamping.
pub(crate) fn parse_real(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_scorm12_keys() {
        for key in [
            "cmi.core.lesson_status",
            "cmi.core.score.raw",
            "cmi.core._children",
            "cmi.suspend_data",
            "cmi.comments",
            "cmi.objectives.3.id",
            "cmi.objectives.0.score.max",
            "cmi.interactions.12.student_response",
            "cmi.interactions.0.correct_responses.1.pattern",
            "cmi.student_data.mastery_score",
        ] {
            assert!(validate_cmi_key(key), "{key} should be accepted");
        }
    }

    #[test]
    fn test_accepts_scorm2004_keys() {
        for key in [
            "cmi.completion_status",
            "cmi.success_status",
            "cmi.score.scaled",
            "cmi.location",
            "cmi.comments_from_learner.0.comment",
            "cmi.interactions.0.learner_response",
            "cmi.interactions.4.objectives.0.id",
            "adl.nav.request",
            "adl.nav.request_valid.choice.{target=intro}",
            "adl.data.0.store",
            "cmi.learner_preference.audio_level",
        ] {
            assert!(validate_cmi_key(key), "{key} should be accepted");
        }
    }

    #[test]
    fn test_rejects_unknown_keys() {
        for key in [
            "",
            "cmi",
            "cmi.core.favourite_colour",
            "cmi.objectives.x.id",
            "window.location",
            "CMI.CORE.LESSON_STATUS",
            "cmi.interactions.0.id.extra",
        ] {
            assert!(!validate_cmi_key(key), "{key} should be rejected");
        }
    }

    #[test]
    fn test_sanitize_limits() {
        let long = "a".repeat(70_000);
        assert_eq!(sanitize_cmi_value("cmi.suspend_data", &long).len(), MAX_SUSPEND_DATA_LEN);
        assert_eq!(sanitize_cmi_value("cmi.core.lesson_location", &long).len(), MAX_LOCATION_LEN);
        assert_eq!(sanitize_cmi_value("cmi.location", &long).len(), MAX_LOCATION_LEN);
        assert_eq!(sanitize_cmi_value("cmi.core.lesson_status", &long).len(), MAX_VALUE_LEN);
    }

    #[test]
    fn test_sanitize_strips_angle_brackets() {
        assert_eq!(
            sanitize_cmi_value("cmi.comments", "<script>alert(1)</script>"),
            "scriptalert(1)/script"
        );
    }

    #[test]
    fn test_parse_lesson_status() {
        assert_eq!(parse_lesson_status(" Passed "), LessonStatus::Passed);
        assert_eq!(parse_lesson_status("not attempted"), LessonStatus::NotAttempted);
        assert_eq!(parse_lesson_status("garbage"), LessonStatus::Incomplete);
        assert_eq!(parse_lesson_status("unknown"), LessonStatus::Incomplete);
    }

    #[test]
    fn test_parse_scores() {
        assert_eq!(parse_score("85"), Some(85.0));
        assert_eq!(parse_score("150"), Some(100.0));
        assert_eq!(parse_score("-3"), Some(0.0));
        assert_eq!(parse_score("abc"), None);
        assert_eq!(parse_scaled_score("0.5"), Some(0.5));
        assert_eq!(parse_scaled_score("2"), Some(1.0));
        assert_eq!(parse_scaled_score("-7"), Some(-1.0));
        assert_eq!(parse_scaled_score("NaN"), None);
    }
}
