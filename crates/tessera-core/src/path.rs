//! Dot-path addressing over nested JSON values
//!
//! A dot path such as `app.user.profile` names a location inside a nested
//! mapping. Segments are alphanumeric and never empty. Array elements are
//! reachable through decimal segments (`items.0`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{TesseraError, TesseraResult};

static NULL: Value = Value::Null;

/// A validated dot path
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DotPath(String);

impl DotPath {
    /// Parse and validate a dot path
    pub fn parse(path: &str) -> TesseraResult<Self> {
        if is_dot_path(path) {
            Ok(DotPath(path.to_string()))
        } else {
            Err(TesseraError::InvalidPath(path.to_string()))
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the path segments
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Split into the parent path (if any) and the terminal key
    pub fn split_last(&self) -> (Option<&str>, &str) {
        match self.0.rfind('.') {
            Some(i) => (Some(&self.0[..i]), &self.0[i + 1..]),
            None => (None, &self.0),
        }
    }

    /// Number of segments
    pub fn depth(&self) -> usize {
        self.segments().count()
    }
}

impl fmt::Debug for DotPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DotPath({})", self.0)
    }
}

impl fmt::Display for DotPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DotPath {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DotPath::parse(s)
    }
}

impl TryFrom<String> for DotPath {
    type Error = TesseraError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        DotPath::parse(&s)
    }
}

impl From<DotPath> for String {
    fn from(path: DotPath) -> Self {
        path.0
    }
}

/// True if `s` is a legal dot path: `[0-9A-Za-z.]+` with no empty segment
pub fn is_dot_path(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '.')
        && s.split('.').all(|segment| !segment.is_empty())
}

/// JS-style truthiness: null, false, zero and "" are falsy
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f == 0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

fn child<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn child_mut<'a>(value: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    match value {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(move |i| items.get_mut(i)),
        _ => None,
    }
}

/// Look up the value at `path` inside `root`.
///
/// Returns `Null` if any intermediate segment is missing or falsy, and the
/// terminal value otherwise. Fails only if the path contains whitespace.
pub fn lookup<'a>(root: &'a Value, path: &str) -> TesseraResult<&'a Value> {
    if path.chars().any(char::is_whitespace) {
        return Err(TesseraError::InvalidPath(path.to_string()));
    }

    let mut current = root;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        match child(current, segment) {
            Some(next) if segments.peek().is_none() || !is_falsy(next) => current = next,
            _ => return Ok(&NULL),
        }
    }
    Ok(current)
}

fn lookup_mut<'a>(root: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    let mut current = root;
    for segment in path.split('.') {
        let next = child_mut(current, segment)?;
        if is_falsy(next) {
            return None;
        }
        current = next;
    }
    Some(current)
}

/// Assign `value` at `path` inside `root`, in place.
///
/// The parent of the terminal key must already exist and be a container;
/// missing parents are never created.
pub fn set(root: &mut Value, path: &str, value: Value) -> TesseraResult<()> {
    let path = DotPath::parse(path)?;
    let (parent_path, key) = path.split_last();

    let parent = match parent_path {
        Some(parent_path) => lookup_mut(root, parent_path),
        None if is_falsy(root) => None,
        None => Some(root),
    };
    let unaddressable = || TesseraError::UnaddressableTarget(path.to_string());

    match parent.ok_or_else(unaddressable)? {
        Value::Object(map) => {
            map.insert(key.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            let index: usize = key.parse().map_err(|_| unaddressable())?;
            if index < items.len() {
                items[index] = value;
            } else if index == items.len() {
                items.push(value);
            } else {
                return Err(unaddressable());
            }
            Ok(())
        }
        _ => Err(unaddressable()),
    }
}
