//! Host store contract
//!
//! Slices never own the composite state; they talk to whatever store the
//! application runs through this trait and get called back as a reducer.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tessera_core::{Action, TesseraResult};

/// `(composite state, action) -> composite state`
pub type Reducer = Arc<dyn Fn(Value, &Action) -> TesseraResult<Value> + Send + Sync>;

/// Store-level change listener
pub type StoreListener = Arc<dyn Fn() + Send + Sync>;

/// Receives a store handle once the store exists, e.g. to record it as a
/// dispatch target. Must not alter action flow.
pub type Middleware = Box<dyn FnOnce(Arc<dyn Store>) + Send>;

/// Name of the process-wide default store
pub const DEFAULT_STORE: &str = "default";

/// Handle returned by [`Store::subscribe`]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SubscriptionId(pub u64);

/// The host store contract
pub trait Store: Send + Sync {
    /// Run the reducer for `action` and notify store listeners
    fn dispatch(&self, action: &Action) -> TesseraResult<()>;

    /// Snapshot of the composite state
    fn get_state(&self) -> Value;

    fn subscribe(&self, listener: StoreListener) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Swap the reducer, returning the previous one
    fn replace_reducer(&self, reducer: Reducer) -> Reducer;
}

/// Named store handles shared by every slice of a registry
#[derive(Default)]
pub struct StoreTable {
    stores: RwLock<HashMap<String, Arc<dyn Store>>>,
}

impl StoreTable {
    pub fn new() -> Self {
        StoreTable::default()
    }

    /// Record `store` under `name`, replacing any previous handle
    pub fn attach(&self, name: &str, store: Arc<dyn Store>) {
        self.stores.write().insert(name.to_string(), store);
        tracing::debug!(store = name, "store attached");
    }

    pub fn detach(&self, name: &str) -> Option<Arc<dyn Store>> {
        self.stores.write().remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Store>> {
        self.stores.read().get(name).cloned()
    }

    /// The process-wide default store, if one is attached
    pub fn default_store(&self) -> Option<Arc<dyn Store>> {
        self.get(DEFAULT_STORE)
    }

    pub fn len(&self) -> usize {
        self.stores.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.read().is_empty()
    }
}

impl fmt::Debug for StoreTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.stores.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("StoreTable").field("stores", &names).finish()
    }
}
