//! Depth-bounded structural diffing of JSON values
//!
//! `diff(src, dest, depth)` returns `None` when the two values are equal up
//! to `depth` levels of nesting, and otherwise a [`Delta`] naming only what
//! differs. Below the depth limit children are compared by plain value
//! equality instead of being walked.
//!
//! The result is not symmetric: a difference is always reported with the
//! `dest` side's value, so `diff(a, b, d)` and `diff(b, a, d)` agree on
//! *whether* the values differ but not on the payload.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default compare depth
pub const DEFAULT_DIFF_DEPTH: usize = 3;

/// A structural difference between two values
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum Delta {
    /// The destination value replaces the source wholesale
    Replace(Value),
    /// The key exists in the source but not in the destination
    Removed,
    /// Per-key differences of two containers
    Fields(BTreeMap<String, Delta>),
}

impl Delta {
    pub fn is_removal(&self) -> bool {
        matches!(self, Delta::Removed)
    }

    /// Number of leaf changes (replacements and removals)
    pub fn change_count(&self) -> usize {
        match self {
            Delta::Replace(_) | Delta::Removed => 1,
            Delta::Fields(fields) => fields.values().map(Delta::change_count).sum(),
        }
    }

    /// Apply this delta onto `target` so that it matches the diff's destination.
    ///
    /// Field deltas walk into objects, creating them where the target holds
    /// a non-object. Removals delete the key.
    pub fn apply_to(&self, target: &mut Value) {
        match self {
            Delta::Replace(value) => *target = value.clone(),
            Delta::Removed => *target = Value::Null,
            Delta::Fields(fields) => {
                if let Value::Array(items) = target {
                    apply_to_array(items, fields);
                    return;
                }
                if !target.is_object() {
                    *target = Value::Object(Map::new());
                }
                if let Value::Object(map) = target {
                    for (key, delta) in fields {
                        match delta {
                            Delta::Removed => {
                                map.remove(key);
                            }
                            _ => delta.apply_to(map.entry(key.clone()).or_insert(Value::Null)),
                        }
                    }
                }
            }
        }
    }
}

fn apply_to_array(items: &mut Vec<Value>, fields: &BTreeMap<String, Delta>) {
    let mut removed = Vec::new();
    for (key, delta) in fields {
        let Ok(index) = key.parse::<usize>() else {
            continue;
        };
        match delta {
            Delta::Removed => removed.push(index),
            _ => {
                if index >= items.len() {
                    items.resize(index + 1, Value::Null);
                }
                delta.apply_to(&mut items[index]);
            }
        }
    }
    // removals in an array diff are always a trailing run
    removed.sort_unstable();
    if let Some(&first) = removed.first() {
        items.truncate(first);
    }
}

/// Calculate the difference between two values.
///
/// - Scalars compare with `==`; a mismatch reports `dest`.
/// - A null on exactly one side reports `dest`.
/// - A container against a non-container (or array against object)
///   reports `dest`.
/// - Two containers compare over the union of their keys. Keys only in
///   `dest` report `dest[key]`, keys only in `src` report [`Delta::Removed`],
///   shared keys recurse with `depth - 1` while `depth > 0` and fall back
///   to value equality at `depth == 0`.
pub fn diff(src: &Value, dest: &Value, depth: usize) -> Option<Delta> {
    match (src, dest) {
        (Value::Null, Value::Null) => None,
        (Value::Null, _) | (_, Value::Null) => Some(Delta::Replace(dest.clone())),
        (Value::Object(a), Value::Object(b)) => diff_maps(a, b, depth),
        (Value::Array(a), Value::Array(b)) => diff_arrays(a, b, depth),
        (Value::Object(_), _) | (Value::Array(_), _) => Some(Delta::Replace(dest.clone())),
        _ => (src != dest).then(|| Delta::Replace(dest.clone())),
    }
}

/// Diff two state maps (the common case for slices)
pub fn diff_maps(src: &Map<String, Value>, dest: &Map<String, Value>, depth: usize) -> Option<Delta> {
    let mut fields = BTreeMap::new();

    for (key, src_value) in src {
        match dest.get(key) {
            None => {
                fields.insert(key.clone(), Delta::Removed);
            }
            Some(dest_value) => {
                if let Some(delta) = diff_shared(src_value, dest_value, depth) {
                    fields.insert(key.clone(), delta);
                }
            }
        }
    }
    for (key, dest_value) in dest {
        if !src.contains_key(key) {
            fields.insert(key.clone(), Delta::Replace(dest_value.clone()));
        }
    }

    (!fields.is_empty()).then_some(Delta::Fields(fields))
}

fn diff_arrays(src: &[Value], dest: &[Value], depth: usize) -> Option<Delta> {
    let mut fields = BTreeMap::new();

    for index in 0..src.len().max(dest.len()) {
        let delta = match (src.get(index), dest.get(index)) {
            (Some(a), Some(b)) => diff_shared(a, b, depth),
            (Some(_), None) => Some(Delta::Removed),
            (None, Some(b)) => Some(Delta::Replace(b.clone())),
            (None, None) => None,
        };
        if let Some(delta) = delta {
            fields.insert(index.to_string(), delta);
        }
    }

    (!fields.is_empty()).then_some(Delta::Fields(fields))
}

fn diff_shared(src: &Value, dest: &Value, depth: usize) -> Option<Delta> {
    if depth > 0 {
        diff(src, dest, depth - 1)
    } else {
        (src != dest).then(|| Delta::Replace(dest.clone()))
    }
}

/// True if the two values are equal up to `depth`
pub fn values_match(a: &Value, b: &Value, depth: usize) -> bool {
    diff(a, b, depth).is_none()
}
