//! In-memory CMI store.
//!
//! An ordered map of dotted keys to string values, plus the bookkeeping that
//! keeps collection identity stable:
//!
//! - `_count` of every indexed collection equals the number of distinct
//!   populated indices under it.
//! - Objectives and interactions are identified by their content-authored
//!   `id`. Once an id is bound to an index, that binding never changes for the
//!   life of the store.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::element::{CmiElement, INTERACTIONS, OBJECTIVES};
use super::model::objective_defaults;
use crate::version::ScormVersion;

/// How an unseen id is placed in its collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    /// At the index content asked for, or the lowest free index if that one
    /// already belongs to another id. Used for objectives.
    Requested,
    /// Dense, in first-insertion order of distinct ids. Used for
    /// interactions, where content routinely reuses index 0 for everything.
    Append,
}

/// id ↔ stable index bookkeeping for one collection.
#[derive(Debug, Clone)]
struct IdentityIndex {
    placement: Placement,
    /// Stable index → id bound to it (if any yet).
    slots: BTreeMap<usize, Option<String>>,
    ids: HashMap<String, usize>,
    /// Content-supplied index → stable index it currently addresses.
    aliases: HashMap<usize, usize>,
}

impl IdentityIndex {
    fn new(placement: Placement) -> Self {
        Self {
            placement,
            slots: BTreeMap::new(),
            ids: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.ids.clear();
        self.aliases.clear();
    }

    fn slot_is_unbound(&self, index: usize) -> bool {
        matches!(self.slots.get(&index), Some(None))
    }

    /// First index past every slot, bound or not. Hydrated slots may be sparse.
    fn next_index(&self) -> usize {
        self.slots.last_key_value().map_or(0, |(index, _)| index + 1)
    }

    fn lowest_free(&self) -> usize {
        (0..).find(|i| !self.slots.contains_key(i)).unwrap_or(self.slots.len())
    }

    /// Resolve a content write to its stable index. Returns the index and
    /// whether a new slot or id binding was created.
    fn resolve(&mut self, content_index: usize, field: &str, value: &str) -> (usize, bool) {
        if field == "id" {
            if let Some(&existing) = self.ids.get(value) {
                self.aliases.insert(content_index, existing);
                return (existing, false);
            }

            let target = match self.placement {
                Placement::Requested => {
                    if !self.slots.contains_key(&content_index) || self.slot_is_unbound(content_index) {
                        content_index
                    } else {
                        self.lowest_free()
                    }
                }
                Placement::Append => {
                    let candidate = self
                        .aliases
                        .get(&content_index)
                        .copied()
                        .unwrap_or(content_index);
                    if self.slot_is_unbound(candidate) {
                        candidate
                    } else {
                        self.next_index()
                    }
                }
            };

            self.slots.insert(target, Some(value.to_string()));
            self.ids.insert(value.to_string(), target);
            self.aliases.insert(content_index, target);
            return (target, true);
        }

        if let Some(&aliased) = self.aliases.get(&content_index) {
            return (aliased, false);
        }

        match self.placement {
            Placement::Requested => {
                let created = !self.slots.contains_key(&content_index);
                self.slots.entry(content_index).or_insert(None);
                (content_index, created)
            }
            Placement::Append => {
                if self.slots.contains_key(&content_index) {
                    (content_index, false)
                } else {
                    let next = self.next_index();
                    self.slots.insert(next, None);
                    self.aliases.insert(content_index, next);
                    (next, true)
                }
            }
        }
    }

    /// Rebuild from already-stored keys; stored indices are authoritative.
    fn rebuild<'a>(&mut self, collection: &str, values: impl Iterator<Item = (&'a String, &'a String)>) {
        self.clear();
        for (key, value) in values {
            if let CmiElement::Member {
                collection: c,
                index,
                field,
            } = CmiElement::parse(key)
            {
                if c != collection {
                    continue;
                }
                let slot = self.slots.entry(index).or_insert(None);
                if field == "id" && !value.is_empty() && !self.ids.contains_key(value) {
                    *slot = Some(value.clone());
                    self.ids.insert(value.clone(), index);
                }
            }
        }
    }
}

/// The CMI key/value cache owned by one attempt.
#[derive(Debug, Clone)]
pub struct CmiStore {
    version: ScormVersion,
    values: BTreeMap<String, String>,
    populated: BTreeMap<String, BTreeSet<usize>>,
    objectives: IdentityIndex,
    interactions: IdentityIndex,
    dirty: BTreeSet<String>,
}

impl CmiStore {
    pub fn new(version: ScormVersion) -> Self {
        Self {
            version,
            values: BTreeMap::new(),
            populated: BTreeMap::new(),
            objectives: IdentityIndex::new(Placement::Requested),
            interactions: IdentityIndex::new(Placement::Append),
            dirty: BTreeSet::new(),
        }
    }

    pub fn version(&self) -> ScormVersion {
        self.version
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Number of members in an indexed collection.
    pub fn count(&self, collection: &str) -> usize {
        self.populated.get(collection).map_or(0, BTreeSet::len)
    }

    /// Stable index of the objective with content id `id`.
    pub fn objective_index(&self, id: &str) -> Option<usize> {
        self.objectives.ids.get(id).copied()
    }

    /// Stable index of the interaction with content id `id`.
    pub fn interaction_index(&self, id: &str) -> Option<usize> {
        self.interactions.ids.get(id).copied()
    }

    /// Content id bound to objective slot `index`.
    pub fn objective_id_at(&self, index: usize) -> Option<&str> {
        self.objectives.slots.get(&index)?.as_deref()
    }

    /// Write a value as content addresses it, relocating objective and
    /// interaction members to their stable slot. Returns the key actually
    /// written.
    pub fn write(&mut self, key: &str, value: &str) -> String {
        let element = CmiElement::parse(key);
        let (stored_key, new_objective) = match &element {
            CmiElement::Member {
                collection,
                index,
                field,
            } if collection == OBJECTIVES => {
                let (slot, created) = self.objectives.resolve(*index, field, value);
                (format!("{OBJECTIVES}.{slot}.{field}"), created.then_some(slot))
            }
            CmiElement::Member {
                collection,
                index,
                field,
            } if collection == INTERACTIONS => {
                let (slot, _) = self.interactions.resolve(*index, field, value);
                (format!("{INTERACTIONS}.{slot}.{field}"), None)
            }
            _ => (key.to_string(), None),
        };

        self.insert(&stored_key, value);
        if let Some(slot) = new_objective {
            for (field, default) in objective_defaults(self.version) {
                let default_key = format!("{OBJECTIVES}.{slot}.{field}");
                if !self.values.contains_key(&default_key) {
                    self.insert(&default_key, default);
                }
            }
        }
        stored_key
    }

    /// Write a key verbatim (no identity relocation).
    pub fn insert(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
        self.dirty.insert(key.to_string());
        self.track_indices(key);
    }

    /// Insert if absent; does not mark the key dirty.
    pub fn seed(&mut self, key: &str, value: &str) {
        if !self.values.contains_key(key) {
            self.values.insert(key.to_string(), value.to_string());
            self.track_indices(key);
        }
    }

    fn track_indices(&mut self, key: &str) {
        let segments: Vec<&str> = key.split('.').collect();
        for pos in 1..segments.len().saturating_sub(1) {
            let Ok(index) = segments[pos].parse::<usize>() else {
                continue;
            };
            let collection = segments[..pos].join(".");
            let members = self.populated.entry(collection.clone()).or_default();
            if members.insert(index) {
                let count = members.len().to_string();
                let count_key = format!("{collection}._count");
                self.values.insert(count_key.clone(), count);
                self.dirty.insert(count_key);
            }
        }
    }

    /// Replace the whole store content, rebuilding counts and identities.
    pub fn replace_all(&mut self, values: BTreeMap<String, String>) {
        self.values = values;
        self.populated.clear();
        let keys: Vec<String> = self.values.keys().cloned().collect();
        for key in &keys {
            if !key.ends_with("._count") {
                self.track_indices(key);
            }
        }
        self.objectives.rebuild(OBJECTIVES, self.values.iter());
        self.interactions.rebuild(INTERACTIONS, self.values.iter());
        self.dirty = self.values.keys().cloned().collect();
    }

    /// Full copy of every key.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.values.clone()
    }

    /// Keys changed since the last call, with their current values.
    pub fn take_dirty(&mut self) -> BTreeMap<String, String> {
        let dirty = std::mem::take(&mut self.dirty);
        dirty
            .into_iter()
            .filter_map(|key| self.values.get(&key).map(|v| (key, v.clone())))
            .collect()
    }

    /// Re-mark keys whose delivery failed.
    pub fn mark_dirty<I: IntoIterator<Item = String>>(&mut self, keys: I) {
        self.dirty.extend(keys);
    }
}
