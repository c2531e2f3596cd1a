//! In-crate store double for unit tests

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tessera_core::{Action, SliceId, TesseraError, TesseraResult};
use tessera_time::{ManualClock, Scheduler, SchedulerConfig};

use crate::slice::{Slice, SliceContext, SliceSpec};
use crate::{Reducer, Store, StoreListener, StoreTable, SubscriptionId};

/// A slice on its own manually driven scheduler, so `run_until_idle`
/// can jump over dispatch delays
pub(crate) fn standalone(id: &str, spec: SliceSpec) -> TesseraResult<Arc<Slice>> {
    let scheduler = Scheduler::with_clock(Arc::new(ManualClock::new()), SchedulerConfig::default());
    let context = SliceContext::new(Arc::new(scheduler), Arc::new(StoreTable::new()));
    Slice::new(SliceId::new(id), spec, context)
}

/// Minimal store: records every action and runs the reducer with no lock held
pub(crate) struct MockStore {
    state: Mutex<Value>,
    reducer: RwLock<Reducer>,
    dispatched: Mutex<Vec<Action>>,
    listeners: Mutex<Vec<(SubscriptionId, StoreListener)>>,
    next_id: AtomicU64,
    reducing: AtomicBool,
}

impl MockStore {
    pub(crate) fn new(reducer: Reducer, initial: Value) -> Arc<Self> {
        Arc::new(MockStore {
            state: Mutex::new(initial),
            reducer: RwLock::new(reducer),
            dispatched: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            reducing: AtomicBool::new(false),
        })
    }

    /// A store whose reducer leaves the state untouched
    pub(crate) fn passthrough() -> Arc<Self> {
        Self::new(Arc::new(passthrough_reducer), json!({}))
    }

    pub(crate) fn dispatched(&self) -> Vec<Action> {
        self.dispatched.lock().clone()
    }
}

fn passthrough_reducer(state: Value, _: &Action) -> TesseraResult<Value> {
    Ok(state)
}

impl Store for MockStore {
    fn dispatch(&self, action: &Action) -> TesseraResult<()> {
        if self.reducing.swap(true, Ordering::SeqCst) {
            return Err(TesseraError::ReentrantDispatch(action.type_name().to_string()));
        }
        self.dispatched.lock().push(action.clone());

        let reducer = self.reducer.read().clone();
        let state = self.state.lock().clone();
        let result = reducer(state, action);
        self.reducing.store(false, Ordering::SeqCst);

        *self.state.lock() = result?;
        let listeners: Vec<StoreListener> =
            self.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener();
        }
        Ok(())
    }

    fn get_state(&self) -> Value {
        self.state.lock().clone()
    }

    fn subscribe(&self, listener: StoreListener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.lock().push((id, listener));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn replace_reducer(&self, reducer: Reducer) -> Reducer {
        std::mem::replace(&mut *self.reducer.write(), reducer)
    }
}
