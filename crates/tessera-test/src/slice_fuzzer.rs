//! Slice Fuzzer - Randomised testing of slice reconciliation
//!
//! Drives many slices through random local writes, external writes to the
//! composite state and partial flushes, then checks:
//! - Resolved view is always `last_known` overlaid with `pending`
//! - Slices converge with the composite state once settled
//! - Local pending values win over concurrent external writes
//! - No slice ever writes outside its own path

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use tessera_core::{lookup, set, Action, ActionType, StateMap, TesseraResult};
use tessera_runtime::RuntimeConfig;
use tessera_state::{DispatchPolicy, Slice, SliceSpec};

use crate::integration::TestApp;

const EXTERNAL: &str = "EXTERNAL";

/// Fuzzer configuration
#[derive(Clone, Debug)]
pub struct FuzzerConfig {
    /// Number of slices
    pub slice_count: usize,
    /// Distinct keys per slice
    pub key_count: usize,
    /// Number of steps to run
    pub step_count: usize,
    /// Values are drawn from `0..value_range`
    pub value_range: i64,
    /// Probability of an external write instead of a local one
    pub external_prob: f64,
    /// Probability of settling scheduled work after a step
    pub flush_prob: f64,
    /// Share of slices that always defer their dispatch
    pub deferred_share: f64,
    /// Random seed
    pub seed: u64,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        FuzzerConfig {
            slice_count: 6,
            key_count: 4,
            step_count: 1000,
            value_range: 8,
            external_prob: 0.25,
            flush_prob: 0.2,
            deferred_share: 0.5,
            seed: 42,
        }
    }
}

impl FuzzerConfig {
    /// Light fuzzing for quick tests
    pub fn light() -> Self {
        FuzzerConfig {
            slice_count: 3,
            key_count: 3,
            step_count: 100,
            value_range: 4,
            external_prob: 0.2,
            flush_prob: 0.3,
            deferred_share: 0.34,
            seed: 42,
        }
    }

    /// Heavy fuzzing for thorough testing
    pub fn heavy() -> Self {
        FuzzerConfig {
            slice_count: 16,
            key_count: 8,
            step_count: 10000,
            value_range: 16,
            external_prob: 0.4,
            flush_prob: 0.1,
            deferred_share: 0.75,
            seed: 42,
        }
    }
}

/// One fuzzing step
#[derive(Clone, Debug)]
pub enum FuzzStep {
    /// `slice.set(key, value)`
    Local { slice: usize, key: String, value: i64 },
    /// Host reducer writes `value` at the slice's key
    External { slice: usize, key: String, value: i64 },
    /// Settle all scheduled work
    Flush,
}

/// Invariant violation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Violation {
    /// `state()` differs from `last_known` overlaid with `pending`
    ResolvedMismatch { slice: String, step: usize },
    /// Settled slice differs from its path in the composite state
    Diverged { slice: String },
    /// Settled slice differs from the expected model
    ModelMismatch { slice: String, key: String },
    /// Something was written outside the registered paths
    ForeignKey { key: String },
    /// Pending changes survived settling
    PendingLeft { slice: String },
}

/// Fuzzing result
#[derive(Debug, Default)]
pub struct FuzzResult {
    pub steps: usize,
    pub local_writes: usize,
    pub external_writes: usize,
    pub flushes: usize,
    pub dispatches: u64,
    pub violations: Vec<Violation>,
}

impl FuzzResult {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Slice fuzzer
pub struct SliceFuzzer {
    config: FuzzerConfig,
    app: TestApp,
    slices: Vec<Arc<Slice>>,
    /// Expected resolved view per slice
    model: Vec<BTreeMap<String, Value>>,
    rng: StdRng,
}

impl SliceFuzzer {
    pub fn new(config: FuzzerConfig) -> TesseraResult<Self> {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let app = TestApp::with_reducer(RuntimeConfig::default(), Arc::new(external_writes))?;

        let mut slices = Vec::with_capacity(config.slice_count);
        let mut model = Vec::with_capacity(config.slice_count);
        for i in 0..config.slice_count {
            let initial: StateMap = (0..config.key_count)
                .map(|k| (key_name(k), json!(0)))
                .collect();
            let dispatch = if rng.gen::<f64>() < config.deferred_share {
                DispatchPolicy::Deferred
            } else {
                DispatchPolicy::Adaptive
            };

            let spec = SliceSpec::new(format!("slice{i}"), initial.clone()).with_dispatch(dispatch);
            slices.push(app.define(&format!("Fuzz{i}"), spec)?);
            model.push(initial.into_iter().collect());
        }

        Ok(SliceFuzzer {
            config,
            app,
            slices,
            model,
            rng,
        })
    }

    pub fn app(&self) -> &TestApp {
        &self.app
    }

    fn generate_step(&mut self) -> FuzzStep {
        if self.rng.gen::<f64>() < self.config.flush_prob {
            return FuzzStep::Flush;
        }
        let slice = self.rng.gen_range(0..self.slices.len());
        let key = key_name(self.rng.gen_range(0..self.config.key_count));
        let value = self.rng.gen_range(0..self.config.value_range);

        if self.rng.gen::<f64>() < self.config.external_prob {
            FuzzStep::External { slice, key, value }
        } else {
            FuzzStep::Local { slice, key, value }
        }
    }

    /// Apply one step, updating the model
    pub fn apply(&mut self, step: &FuzzStep, result: &mut FuzzResult) -> TesseraResult<()> {
        match step {
            FuzzStep::Local { slice, key, value } => {
                self.slices[*slice].set(key, json!(value))?;
                self.model[*slice].insert(key.clone(), json!(value));
                result.local_writes += 1;
            }
            FuzzStep::External { slice, key, value } => {
                let pending = self.slices[*slice].pending().contains_key(key);
                let path = format!("{}.{}", self.slices[*slice].path(), key);
                self.app.dispatch(&Action::new(
                    ActionType::new(EXTERNAL),
                    json!({ "path": path, "value": value }),
                ))?;
                if !pending {
                    self.model[*slice].insert(key.clone(), json!(value));
                }
                result.external_writes += 1;
            }
            FuzzStep::Flush => {
                self.app.settle();
                result.flushes += 1;
            }
        }
        Ok(())
    }

    /// Run the fuzzer
    pub fn run(&mut self) -> TesseraResult<FuzzResult> {
        let mut result = FuzzResult::default();
        let start = self.app.runtime.store().dispatch_count();

        for step_index in 0..self.config.step_count {
            let step = self.generate_step();
            self.apply(&step, &mut result)?;
            result.steps += 1;

            for slice in &self.slices {
                if !properties::resolved_is_overlay(slice) {
                    result.violations.push(Violation::ResolvedMismatch {
                        slice: slice.id().to_string(),
                        step: step_index,
                    });
                }
            }
        }

        self.app.settle();
        result.dispatches = self.app.runtime.store().dispatch_count() - start;
        self.check_invariants(&mut result);
        Ok(result)
    }

    fn check_invariants(&self, result: &mut FuzzResult) {
        let composite = self.app.state();

        for (slice, model) in self.slices.iter().zip(&self.model) {
            let id = slice.id().to_string();
            if slice.has_pending() {
                result.violations.push(Violation::PendingLeft { slice: id.clone() });
            }

            let stored = lookup(&composite, slice.path().as_str())
                .cloned()
                .unwrap_or(Value::Null);
            if stored != Value::Object(slice.state()) {
                result.violations.push(Violation::Diverged { slice: id.clone() });
            }

            let state = slice.state();
            for (key, expected) in model {
                if state.get(key) != Some(expected) {
                    result.violations.push(Violation::ModelMismatch {
                        slice: id.clone(),
                        key: key.clone(),
                    });
                }
            }
        }

        let paths: HashSet<String> = self.slices.iter().map(|s| s.path().to_string()).collect();
        if let Value::Object(top) = &composite {
            for key in top.keys() {
                if !paths.contains(key) {
                    result.violations.push(Violation::ForeignKey { key: key.clone() });
                }
            }
        }
    }
}

fn key_name(index: usize) -> String {
    format!("k{index}")
}

/// Host reducer applying external writes
fn external_writes(state: Value, action: &Action) -> TesseraResult<Value> {
    let mut state = state;
    if action.type_name() == EXTERNAL {
        if let Some(path) = action.payload["path"].as_str() {
            set(&mut state, path, action.payload["value"].clone())?;
        }
    }
    Ok(state)
}

/// Property-based test helpers
pub mod properties {
    use super::*;
    use tessera_core::{diff, values_match};

    /// Property: the resolved view is `last_known` overlaid with `pending`
    pub fn resolved_is_overlay(slice: &Slice) -> bool {
        let mut expected = slice.last_known();
        for (key, value) in slice.pending() {
            expected.insert(key, value);
        }
        expected == slice.state()
    }

    /// Property: pending never holds a value equal to the committed one
    pub fn pending_is_minimal(slice: &Slice) -> bool {
        let committed = slice.last_known();
        slice
            .pending()
            .iter()
            .all(|(key, value)| committed.get(key) != Some(value))
    }

    /// Property: a value set at a path reads back unchanged
    pub fn path_roundtrip(root: &Value, path: &str, value: &Value) -> bool {
        let mut root = root.clone();
        match set(&mut root, path, value.clone()) {
            Ok(()) => lookup(&root, path).map_or(false, |found| found == value),
            Err(_) => true,
        }
    }

    /// Property: a value never differs from itself
    pub fn diff_identity(value: &Value, depth: usize) -> bool {
        diff(value, value, depth).is_none()
    }

    /// Property: both directions agree on whether there is a difference
    pub fn existence_agrees(a: &Value, b: &Value, depth: usize) -> bool {
        values_match(a, b, depth) == values_match(b, a, depth)
    }
}
