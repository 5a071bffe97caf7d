//! Completion and success inference.
//!
//! SCORM 2004 keeps "viewed" (`completion_status`) apart from the assessment
//! result (`success_status`); SCORM 1.2 folds both into `lesson_status`. The
//! host only hears about outcomes, each status at most once in a row.

use serde::{Deserialize, Serialize};

use crate::cmi::element::{CmiElement, OBJECTIVES};
use crate::cmi::sanitize::parse_real;
use crate::cmi::CmiStore;
use crate::manifest::ManifestObjective;
use crate::version::ScormVersion;

const SUCCESS_2004: &str = "cmi.success_status";
const COMPLETION_2004: &str = "cmi.completion_status";
const STATUS_12: &str = "cmi.core.lesson_status";

/// Reported to the host when an attempt reaches an outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub status: String,
    pub score: Option<f64>,
}

fn is_outcome(status: &str) -> bool {
    matches!(status, "passed" | "failed")
}

fn raw_score(cmi: &CmiStore) -> Option<f64> {
    cmi.get(cmi.version().score_raw_key()).and_then(parse_real)
}

/// Remembers the last status reported so repeated writes stay quiet.
#[derive(Debug, Clone, Default)]
pub(crate) struct CompletionTracker {
    reported: Option<String>,
}

impl CompletionTracker {
    #[cfg(test)]
    pub fn reported(&self) -> Option<&str> {
        self.reported.as_deref()
    }

    /// Inspect a write that just landed at `key`. May store a derived
    /// `success_status`.
    pub fn observe(&mut self, cmi: &mut CmiStore, key: &str, passing_score: f64) -> Option<CompletionEvent> {
        let status = match cmi.version() {
            ScormVersion::Scorm2004 => match key {
                SUCCESS_2004 => cmi
                    .get(key)
                    .filter(|s| is_outcome(s))
                    .map(str::to_string),
                "cmi.score.raw" => derive_success(cmi, passing_score),
                _ => None,
            },
            ScormVersion::Scorm12 if key == STATUS_12 => match cmi.get(key) {
                Some(status) if is_outcome(status) => Some(status.to_string()),
                Some("completed") if raw_score(cmi).is_some() => Some("completed".to_string()),
                _ => None,
            },
            ScormVersion::Scorm12 => None,
        }?;
        self.report(cmi, status)
    }

    /// Final status rules applied once per Terminate.
    pub fn finalize(
        &mut self,
        cmi: &mut CmiStore,
        passing_score: f64,
        mastery_score: Option<f64>,
        for_credit: bool,
    ) -> Option<CompletionEvent> {
        match cmi.version() {
            ScormVersion::Scorm2004 => {
                let status = derive_success(cmi, passing_score)?;
                self.report(cmi, status)
            }
            ScormVersion::Scorm12 => {
                if matches!(cmi.get(STATUS_12), None | Some("not attempted") | Some("")) {
                    cmi.insert(STATUS_12, "incomplete");
                }
                if !for_credit || cmi.get(STATUS_12).is_some_and(is_outcome) {
                    return None;
                }
                let (mastery, raw) = (mastery_score?, raw_score(cmi)?);
                let status = if raw >= mastery { "passed" } else { "failed" };
                cmi.insert(STATUS_12, status);
                self.report(cmi, status.to_string())
            }
        }
    }

    fn report(&mut self, cmi: &CmiStore, status: String) -> Option<CompletionEvent> {
        if self.reported.as_deref() == Some(status.as_str()) {
            return None;
        }
        self.reported = Some(status.clone());
        Some(CompletionEvent {
            status,
            score: raw_score(cmi),
        })
    }
}

/// 2004: completed content with a raw score but no verdict is judged against
/// `score.max * passing_score`.
fn derive_success(cmi: &mut CmiStore, passing_score: f64) -> Option<String> {
    if cmi.get(COMPLETION_2004) != Some("completed") {
        return None;
    }
    if !matches!(cmi.get(SUCCESS_2004), None | Some("unknown") | Some("")) {
        return None;
    }
    let raw = raw_score(cmi)?;
    let max = cmi
        .get(cmi.version().score_max_key())
        .and_then(parse_real)
        .filter(|max| *max > 0.0)
        .unwrap_or(100.0);

    let status = if raw >= max * passing_score { "passed" } else { "failed" };
    cmi.insert(SUCCESS_2004, status);
    Some(status.to_string())
}

/// Objectives satisfied by measure take their success status from the
/// scaled score. Returns whether a status was written.
pub(crate) fn apply_objective_measure(
    cmi: &mut CmiStore,
    stored_key: &str,
    objectives: &[ManifestObjective],
) -> bool {
    let CmiElement::Member {
        collection,
        index,
        field,
    } = CmiElement::parse(stored_key)
    else {
        return false;
    };
    if collection != OBJECTIVES || field != "score.scaled" {
        return false;
    }
    let Some(id) = cmi.objective_id_at(index) else {
        return false;
    };
    let Some(objective) = objectives.iter().find(|o| o.id == id && o.satisfied_by_measure) else {
        return false;
    };
    let Some(scaled) = cmi.get(stored_key).and_then(parse_real) else {
        return false;
    };

    let status = if scaled >= objective.min_normalized_measure {
        "passed"
    } else {
        "failed"
    };
    cmi.insert(&format!("{OBJECTIVES}.{index}.success_status"), status);
    true
}
