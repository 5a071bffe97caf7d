//! Typed projection of a CMI snapshot for the persistence collaborator.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::sanitize::{parse_lesson_status, parse_scaled_score, parse_score, LessonStatus};
use super::time::parse_session_time;
use crate::version::ScormVersion;

/// What an attempts table stores about a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub version: ScormVersion,
    pub lesson_status: LessonStatus,
    /// 2004 only; `None` while unknown.
    pub success_status: Option<LessonStatus>,
    pub score_raw: Option<f64>,
    pub score_scaled: Option<f64>,
    pub session_time: Option<Duration>,
    pub location: Option<String>,
    pub suspend_data_len: usize,
    pub exit: Option<String>,
}

impl AttemptSummary {
    pub fn from_snapshot(version: ScormVersion, cmi: &BTreeMap<String, String>) -> Self {
        let get = |key: &str| cmi.get(key).map(String::as_str).filter(|v| !v.is_empty());

        let lesson_status = match version {
            ScormVersion::Scorm12 => get("cmi.core.lesson_status")
                .map(parse_lesson_status)
                .unwrap_or(LessonStatus::NotAttempted),
            ScormVersion::Scorm2004 => {
                match get("cmi.success_status").map(parse_lesson_status) {
                    Some(status @ (LessonStatus::Passed | LessonStatus::Failed)) => status,
                    _ => match get("cmi.completion_status") {
                        Some("not attempted") | None => LessonStatus::NotAttempted,
                        Some(raw) => parse_lesson_status(raw),
                    },
                }
            }
        };

        let success_status = match version {
            ScormVersion::Scorm12 => None,
            ScormVersion::Scorm2004 => get("cmi.success_status")
                .filter(|s| *s != "unknown")
                .map(parse_lesson_status),
        };

        let score_scaled = match version {
            ScormVersion::Scorm12 => None,
            ScormVersion::Scorm2004 => get("cmi.score.scaled").and_then(parse_scaled_score),
        };

        Self {
            version,
            lesson_status,
            success_status,
            score_raw: get(version.score_raw_key()).and_then(parse_score),
            score_scaled,
            session_time: get(version.session_time_key()).and_then(parse_session_time),
            location: get(version.location_key()).map(str::to_string),
            suspend_data_len: cmi.get("cmi.suspend_data").map_or(0, |s| s.chars().count()),
            exit: get(version.exit_key()).map(str::to_string),
        }
    }

    /// Whether the attempt reached a terminal completion state.
    pub fn is_finished(&self) -> bool {
        self.lesson_status.is_terminal()
    }
}
