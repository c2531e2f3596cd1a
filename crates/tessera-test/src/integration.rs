//! End-to-end Integration Test Suite
//!
//! Slices running against the reference host store on a manual clock:
//! - Immediate and debounced propagation
//! - Merge precedence between pending and incoming state
//! - Disjointness of slice paths in the composite state
//! - Reentrancy inside lifecycle hooks
//! - Subscriber notification ordering

use std::sync::Arc;

use serde_json::Value;
use tessera_core::{lookup, Action, StateMap, TesseraResult};
use tessera_runtime::{Runtime, RuntimeConfig};
use tessera_state::{Slice, SliceSpec};
use tessera_time::ManualClock;

// ============================================================================
// TEST APPLICATION
// ============================================================================

/// A runtime on a manual clock, so scheduled work is settled on demand
pub struct TestApp {
    pub runtime: Runtime,
    pub clock: Arc<ManualClock>,
}

impl TestApp {
    /// Default configuration, host reducer that leaves the state alone
    pub fn new() -> TesseraResult<Self> {
        TestApp::with_reducer(RuntimeConfig::default(), Arc::new(keep_state))
    }

    pub fn with_reducer(
        config: RuntimeConfig,
        host: tessera_state::Reducer,
    ) -> TesseraResult<Self> {
        let clock = Arc::new(ManualClock::new());
        let runtime = Runtime::with_clock(config, host, clock.clone())?;
        Ok(TestApp { runtime, clock })
    }

    /// Define a slice at `path` with `initial` as its starting state
    pub fn slice(&self, id: &str, path: &str, initial: Value) -> TesseraResult<Arc<Slice>> {
        self.define(id, SliceSpec::new(path, into_map(initial)))
    }

    pub fn define(&self, id: &str, spec: SliceSpec) -> TesseraResult<Arc<Slice>> {
        self.runtime.define(id, move || spec)
    }

    /// Run every scheduled dispatch and notification
    pub fn settle(&self) -> usize {
        self.runtime.flush_all()
    }

    pub fn state(&self) -> Value {
        self.runtime.state()
    }

    /// Composite value at `path`, `Null` when absent
    pub fn at(&self, path: &str) -> Value {
        lookup(&self.state(), path).cloned().unwrap_or(Value::Null)
    }

    pub fn dispatch(&self, action: &Action) -> TesseraResult<()> {
        self.runtime.dispatch(action)
    }
}

fn keep_state(state: Value, _: &Action) -> TesseraResult<Value> {
    Ok(state)
}

/// Object value as a state map; anything else is an empty map
pub fn into_map(value: Value) -> StateMap {
    match value {
        Value::Object(map) => map,
        _ => StateMap::new(),
    }
}

/// Bump an integer field of a slice by one
pub fn increment(slice: &Slice, key: &str) -> TesseraResult<bool> {
    let next = slice.get(key).and_then(|v| v.as_i64()).unwrap_or(0) + 1;
    slice.set(key, Value::from(next))
}
