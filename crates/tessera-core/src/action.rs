//! Actions and state maps
//!
//! An action is the unit handed to a host store's `dispatch`. Slice actions
//! carry only the fields that changed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ActionType;

/// A flat mapping from field name to value - one slice's state
pub type StateMap = Map<String, Value>;

/// Wire shape: `{ "type": ..., "payload": ... }`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub payload: Value,
}

impl Action {
    pub fn new(action_type: ActionType, payload: Value) -> Self {
        Action {
            action_type,
            payload,
        }
    }

    /// A slice action carrying a partial state map
    pub fn with_changes(action_type: ActionType, changes: StateMap) -> Self {
        Action::new(action_type, Value::Object(changes))
    }

    /// The host store's initial action
    pub fn init() -> Self {
        Action::new(ActionType::new(ActionType::INIT), Value::Null)
    }

    #[inline]
    pub fn type_name(&self) -> &str {
        self.action_type.as_str()
    }

    /// Payload as a state map, if it is one
    pub fn changes(&self) -> Option<&StateMap> {
        self.payload.as_object()
    }
}
