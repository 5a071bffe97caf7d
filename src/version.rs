//! SCORM data-model versions and the per-version names of the elements the
//! runtime itself manipulates.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScormVersion {
    #[serde(rename = "SCORM_1.2")]
    Scorm12,
    #[serde(rename = "SCORM_2004")]
    Scorm2004,
}

impl ScormVersion {
    /// Detect the version from a `schemaversion` / root `version` value.
    pub fn detect(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.contains("2004") || raw.eq_ignore_ascii_case("CAM 1.3") {
            Self::Scorm2004
        } else {
            Self::Scorm12
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scorm12 => "SCORM_1.2",
            Self::Scorm2004 => "SCORM_2004",
        }
    }

    pub fn session_time_key(&self) -> &'static str {
        match self {
            Self::Scorm12 => "cmi.core.session_time",
            Self::Scorm2004 => "cmi.session_time",
        }
    }

    pub fn exit_key(&self) -> &'static str {
        match self {
            Self::Scorm12 => "cmi.core.exit",
            Self::Scorm2004 => "cmi.exit",
        }
    }

    pub fn entry_key(&self) -> &'static str {
        match self {
            Self::Scorm12 => "cmi.core.entry",
            Self::Scorm2004 => "cmi.entry",
        }
    }

    pub fn score_raw_key(&self) -> &'static str {
        match self {
            Self::Scorm12 => "cmi.core.score.raw",
            Self::Scorm2004 => "cmi.score.raw",
        }
    }

    pub fn score_max_key(&self) -> &'static str {
        match self {
            Self::Scorm12 => "cmi.core.score.max",
            Self::Scorm2004 => "cmi.score.max",
        }
    }

    pub fn location_key(&self) -> &'static str {
        match self {
            Self::Scorm12 => "cmi.core.lesson_location",
            Self::Scorm2004 => "cmi.location",
        }
    }

    /// `lesson_status` for 1.2, `completion_status` for 2004.
    pub fn status_key(&self) -> &'static str {
        match self {
            Self::Scorm12 => "cmi.core.lesson_status",
            Self::Scorm2004 => "cmi.completion_status",
        }
    }
}

impl fmt::Display for ScormVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
