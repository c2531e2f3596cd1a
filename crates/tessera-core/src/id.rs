//! Identity types for tessera
//!
//! Slices are registered under a free-form identifier and publish actions
//! under a type name derived from it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::naming::pascal_case;

/// Slice identity - the key a slice is registered under
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SliceId(String);

impl SliceId {
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        SliceId(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SliceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slice({})", self.0)
    }
}

impl fmt::Display for SliceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SliceId {
    fn from(id: &str) -> Self {
        SliceId::new(id)
    }
}

/// Action type name, e.g. `ServiceCounter`
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionType(String);

impl ActionType {
    /// Prefix joined onto every slice identifier before normalisation
    pub const SLICE_PREFIX: &'static str = "Service_";

    /// Action type used by host stores for their initial dispatch
    pub const INIT: &'static str = "@@INIT";

    /// An arbitrary action type, taken verbatim
    #[inline]
    pub fn new(name: impl Into<String>) -> Self {
        ActionType(name.into())
    }

    /// Derive the action type published by a slice.
    ///
    /// The identifier is lower-cased, prefixed, split into words and
    /// recombined in PascalCase, so the result only depends on the id.
    pub fn for_slice(id: &SliceId) -> Self {
        let raw = format!("{}{}", Self::SLICE_PREFIX, id.as_str().to_lowercase());
        ActionType(pascal_case(&raw))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Action({})", self.0)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
