//! Typed view over dotted CMI key paths.

use std::fmt;

/// Collections whose members carry a content-authored `id`.
pub const OBJECTIVES: &str = "cmi.objectives";
pub const INTERACTIONS: &str = "cmi.interactions";

/// Classification of a data-model key.
///
/// Storage stays string-keyed (an ordered map), but every read and write is
/// dispatched on this union so collection members and aggregates are never
/// handled by ad-hoc string matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CmiElement {
    /// Leaf scalar such as `cmi.core.lesson_status`.
    Scalar(String),
    /// Member of an indexed collection, split at the first numeric segment:
    /// `cmi.objectives.3.score.raw` → (`cmi.objectives`, 3, `score.raw`).
    Member {
        collection: String,
        index: usize,
        field: String,
    },
    /// `<parent>._count`
    Count { parent: String },
    /// `<parent>._children`
    Children { parent: String },
    /// Anything outside the `cmi.` / `adl.` namespaces.
    Generic(String),
}

impl CmiElement {
    pub fn parse(key: &str) -> Self {
        if !(key.starts_with("cmi.") || key.starts_with("adl.")) {
            return Self::Generic(key.to_string());
        }
        if let Some(parent) = key.strip_suffix("._count") {
            return Self::Count {
                parent: parent.to_string(),
            };
        }
        if let Some(parent) = key.strip_suffix("._children") {
            return Self::Children {
                parent: parent.to_string(),
            };
        }

        let segments: Vec<&str> = key.split('.').collect();
        for (pos, segment) in segments.iter().enumerate().skip(1) {
            if let Ok(index) = segment.parse::<usize>() {
                if pos + 1 >= segments.len() {
                    break;
                }
                return Self::Member {
                    collection: segments[..pos].join("."),
                    index,
                    field: segments[pos + 1..].join("."),
                };
            }
        }
        Self::Scalar(key.to_string())
    }

    /// Whether this is one of the synthetic aggregates (`_count`, `_children`).
    pub fn is_keyword(&self) -> bool {
        matches!(self, Self::Count { .. } | Self::Children { .. })
    }


    /// Whether the key lives in the `cmi.` / `adl.` data-model namespaces.
    pub fn is_data_model(&self) -> bool {
        !matches!(self, Self::Generic(_))
    }
}

impl fmt::Display for CmiElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(key) | Self::Generic(key) => f.write_str(key),
            Self::Member {
                collection,
                index,
                field,
            } => write!(f, "{collection}.{index}.{field}"),
            Self::Count { parent } => write!(f, "{parent}._count"),
            Self::Children { parent } => write!(f, "{parent}._children"),
        }
    }
}

/// Replace numeric segments with `n` (`cmi.objectives.3.score` → `cmi.objectives.n.score`).
pub fn generalize_indices(path: &str) -> String {
    path.split('.')
        .map(|segment| {
            if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
                "n"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}
