//! The reduce step
//!
//! Called by the host store for every dispatched action. Merges the value
//! found at the slice path with the slice's pending changes, commits the
//! result and writes it back into the composite state.

use serde_json::Value;
use tessera_core::{diff, is_falsy, lookup, set, Action, StateMap, TesseraResult};

use crate::slice::{Phase, Slice};

/// Holds the slice in `Reconciling` and restores the previous phase on
/// every exit path, unwinding included
struct ReconcileGuard<'a> {
    slice: &'a Slice,
    previous: Phase,
}

impl<'a> ReconcileGuard<'a> {
    fn enter(slice: &'a Slice) -> Self {
        let mut inner = slice.inner.lock();
        let previous = inner.phase;
        inner.phase = Phase::Reconciling;
        ReconcileGuard { slice, previous }
    }
}

impl Drop for ReconcileGuard<'_> {
    fn drop(&mut self) {
        let restored = match self.previous {
            Phase::Uninitialized => Phase::Idle,
            other => other,
        };
        self.slice.inner.lock().phase = restored;
    }
}

/// A reconciliation pass that has written its composite but not yet
/// committed the slice's own view. Dropping it discards the pass.
pub(crate) struct Staged<'a> {
    slice: &'a Slice,
    commit: Option<Commit>,
    _guard: ReconcileGuard<'a>,
}

struct Commit {
    committed: StateMap,
    /// `pending` as seen when the pass started
    snapshot: StateMap,
}

impl Slice {
    /// Reconcile against `composite` and return it, changed or not.
    ///
    /// A falsy composite is treated as an empty map. Errors only when the
    /// slice path cannot be written into `composite`, in which case the
    /// slice is left as it was.
    pub fn reduce(&self, composite: Value, action: &Action) -> TesseraResult<Value> {
        let (composite, staged) = self.stage(composite, action)?;
        staged.commit();
        Ok(composite)
    }

    /// First half of [`Slice::reduce`]: merge and write into `composite`
    /// while leaving `last_known` and `pending` untouched
    pub(crate) fn stage(&self, composite: Value, action: &Action) -> TesseraResult<(Value, Staged<'_>)> {
        let mut composite = if is_falsy(&composite) {
            Value::Object(StateMap::new())
        } else {
            composite
        };

        let guard = ReconcileGuard::enter(self);
        if let Some(hook) = &self.hooks.reduce {
            hook(self, action);
        }

        let incoming = lookup(&composite, self.path().as_str())?.clone();
        let (resolved, pending, last_known) = {
            let inner = self.inner.lock();
            (inner.resolved(), inner.pending.clone(), inner.last_known.clone())
        };

        let delta = diff(&Value::Object(resolved), &incoming, self.options.depth);
        let commit = if delta.is_some() || !pending.is_empty() {
            tracing::trace!(slice = %self.id(), action = %action.action_type, ?delta, "incoming state differs");

            let mut combined = match incoming {
                Value::Object(map) => map,
                _ => StateMap::new(),
            };
            for (key, value) in &pending {
                combined.insert(key.clone(), value.clone());
            }
            let parsed = match &self.hooks.state_changing {
                Some(hook) => hook(combined),
                None => combined,
            };

            let mut committed = last_known;
            committed.extend(parsed);
            set(&mut composite, self.path().as_str(), Value::Object(committed.clone()))?;
            Some(Commit {
                committed,
                snapshot: pending,
            })
        } else {
            None
        };

        Ok((
            composite,
            Staged {
                slice: self,
                commit,
                _guard: guard,
            },
        ))
    }
}

impl Staged<'_> {
    /// Adopt the staged view, then run first-pass initialisation while the
    /// slice is still reconciling
    pub(crate) fn commit(self) {
        let slice = self.slice;
        if let Some(Commit { committed, snapshot }) = self.commit {
            {
                let mut inner = slice.inner.lock();
                inner.last_known = committed;
                // keys re-set by a hook during this pass stay pending
                inner
                    .pending
                    .retain(|key, value| snapshot.get(key) != Some(value));
            }
            tracing::debug!(slice = %slice.id(), path = %slice.path(), "state committed");
            slice.schedule_state_changed();
        }

        let first_pass = {
            let mut inner = slice.inner.lock();
            !std::mem::replace(&mut inner.initialized, true)
        };
        if first_pass {
            slice.init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockStore;
    use crate::slice::{SliceHooks, SliceSpec};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tessera_core::ActionType;
    use tessera_time::TimerKey;

    fn map(value: Value) -> StateMap {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn slice_with(hooks: SliceHooks) -> Arc<Slice> {
        let spec = SliceSpec::new("testData", map(json!({ "a": 1, "b": 2 }))).with_hooks(hooks);
        crate::mock::standalone("TestService", spec).unwrap()
    }

    fn noop() -> Action {
        Action::new(ActionType::new("Unrelated"), Value::Null)
    }

    #[test]
    fn test_falsy_composite_becomes_map() {
        let slice = slice_with(SliceHooks::new());
        let out = slice.reduce(Value::Null, &Action::init()).unwrap();
        assert_eq!(out, json!({ "testData": { "a": 1, "b": 2 } }));
        assert!(slice.is_initialized());
        assert_eq!(slice.phase(), Phase::Idle);
    }

    #[test]
    fn test_pending_wins_over_incoming() {
        let slice = slice_with(SliceHooks::new());
        slice.reduce(json!({}), &Action::init()).unwrap();
        slice.set("a", json!(7)).unwrap();

        let out = slice
            .reduce(json!({ "testData": { "a": 5, "b": 2 } }), &noop())
            .unwrap();
        assert_eq!(slice.last_known()["a"], json!(7));
        assert!(!slice.has_pending());
        assert_eq!(out["testData"]["a"], json!(7));
    }

    #[test]
    fn test_incoming_changes_adopted() {
        let slice = slice_with(SliceHooks::new());
        slice.reduce(json!({}), &Action::init()).unwrap();

        let out = slice
            .reduce(json!({ "testData": { "a": 1, "b": 9, "c": 3 } }), &noop())
            .unwrap();
        assert_eq!(slice.state(), map(json!({ "a": 1, "b": 9, "c": 3 })));
        assert_eq!(out["testData"], json!({ "a": 1, "b": 9, "c": 3 }));
    }

    #[test]
    fn test_unchanged_composite_returned_as_is() {
        let slice = slice_with(SliceHooks::new());
        let first = slice.reduce(json!({}), &Action::init()).unwrap();
        let second = slice.reduce(first.clone(), &noop()).unwrap();
        assert_eq!(first, second);
        assert!(!slice
            .scheduler()
            .is_armed(&TimerKey::Notify(slice.id().clone())));
    }

    #[test]
    fn test_siblings_untouched() {
        let slice = slice_with(SliceHooks::new());
        let out = slice
            .reduce(json!({ "other": { "x": true } }), &Action::init())
            .unwrap();
        assert_eq!(out["other"], json!({ "x": true }));
    }

    #[test]
    fn test_unaddressable_path_errors_and_resets_phase() {
        let spec = SliceSpec::new("deep.nested", StateMap::new());
        let slice = crate::mock::standalone("deep", spec).unwrap();
        slice.set("x", json!(1)).unwrap();

        let err = slice.reduce(json!({ "other": 1 }), &Action::init());
        assert!(matches!(
            err,
            Err(tessera_core::TesseraError::UnaddressableTarget(_))
        ));
        assert_eq!(slice.phase(), Phase::Idle);
        // nothing committed
        assert_eq!(slice.pending(), map(json!({ "x": 1 })));
        assert!(slice.last_known().is_empty());
    }

    #[test]
    fn test_init_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let slice = slice_with(SliceHooks::new().on_init(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        slice.reduce(json!({}), &Action::init()).unwrap();
        slice.reduce(json!({}), &noop()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_set_state_in_init_is_deferred() {
        let slice = slice_with(SliceHooks::new().on_init(|slice| {
            assert!(slice.is_reconciling());
            slice.set("a", json!(10)).unwrap();
        }));
        let store = MockStore::passthrough();
        slice.attach(store.clone());

        slice.reduce(json!({}), &Action::init()).unwrap();
        assert!(store.dispatched().is_empty());
        assert!(slice
            .scheduler()
            .is_armed(&TimerKey::Dispatch(slice.action_type().clone())));

        slice.scheduler().run_until_idle();
        assert_eq!(store.dispatched().len(), 1);
        assert_eq!(store.dispatched()[0].payload, json!({ "a": 10 }));
    }

    #[test]
    fn test_state_changing_hook_rewrites_commit() {
        let hooks = SliceHooks::new().on_state_changing(|mut changes| {
            changes.insert("seen".into(), json!(true));
            changes
        });
        let slice = slice_with(hooks);
        slice.reduce(json!({}), &Action::init()).unwrap();
        slice.set("a", json!(3)).unwrap();
        slice.reduce(json!({}), &noop()).unwrap();

        assert_eq!(slice.last_known()["seen"], json!(true));
        assert_eq!(slice.last_known()["a"], json!(3));
    }

    #[test]
    fn test_reduce_hook_changes_join_same_pass() {
        let hooks = SliceHooks::new().on_reduce(|slice, action| {
            if action.type_name() == "Unrelated" {
                slice.set("b", json!(20)).unwrap();
            }
        });
        let slice = slice_with(hooks);
        slice.reduce(json!({}), &Action::init()).unwrap();

        slice.set("a", json!(2)).unwrap();
        // on_reduce records b=20 before the pending snapshot is taken
        slice.reduce(json!({}), &noop()).unwrap();
        assert_eq!(slice.last_known()["b"], json!(20));
        assert!(!slice.has_pending());
    }

    #[test]
    fn test_notification_after_commit() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let slice = slice_with(SliceHooks::new());
        slice.reduce(json!({}), &Action::init()).unwrap();

        let s = seen.clone();
        slice.subscribe(Arc::new(move |state: &StateMap| s.lock().push(state["a"].clone())));
        slice.set("a", json!(4)).unwrap();
        slice.reduce(json!({}), &noop()).unwrap();
        assert_eq!(seen.lock().len(), 1);

        slice.scheduler().run_until_idle();
        assert_eq!(*seen.lock(), vec![json!(1), json!(4)]);
    }

    #[test]
    fn test_listeners_notified_in_subscription_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let slice = slice_with(SliceHooks::new());
        slice.reduce(json!({}), &Action::init()).unwrap();

        for name in ["A", "B", "C"] {
            let order = order.clone();
            slice.subscribe(Arc::new(move |_: &StateMap| order.lock().push(name)));
        }
        order.lock().clear();

        slice.set("a", json!(2)).unwrap();
        slice.reduce(json!({}), &noop()).unwrap();
        slice.scheduler().run_until_idle();
        assert_eq!(*order.lock(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_failed_stage_commits_nothing() {
        let slice = slice_with(SliceHooks::new());
        slice.reduce(json!({}), &Action::init()).unwrap();
        slice.set("a", json!(9)).unwrap();

        let (out, staged) = slice.stage(json!({}), &noop()).unwrap();
        assert_eq!(out["testData"]["a"], json!(9));
        assert!(slice.is_reconciling());
        drop(staged);

        assert_eq!(slice.phase(), Phase::Idle);
        assert_eq!(slice.last_known()["a"], json!(1));
        assert_eq!(slice.pending()["a"], json!(9));
    }

    #[test]
    fn test_depth_zero_uses_full_equality() {
        let spec = SliceSpec::new("cfg", map(json!({ "nested": { "deep": { "x": 1 } } })))
            .with_depth(0);
        let slice = crate::mock::standalone("cfg", spec).unwrap();
        let first = slice.reduce(json!({}), &Action::init()).unwrap();
        assert_eq!(first["cfg"]["nested"]["deep"]["x"], json!(1));

        // depth 0 still sees the nested value differ through full equality
        let changed = json!({ "cfg": { "nested": { "deep": { "x": 2 } } } });
        slice.reduce(changed, &noop()).unwrap();
        assert_eq!(slice.state()["nested"]["deep"]["x"], json!(2));
    }
}
