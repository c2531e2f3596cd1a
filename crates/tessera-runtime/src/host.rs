//! Reference host store
//!
//! A small synchronous store in the Redux mould: one composite state, one
//! reducer, a subscriber list. Enough to run slices without any external
//! state container.

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde_json::Value;
use tessera_core::{Action, TesseraError, TesseraResult};
use tessera_state::{Middleware, Reducer, Store, StoreListener, SubscriptionId};

pub struct HostStore {
    state: Mutex<Value>,
    reducer: RwLock<Reducer>,
    listeners: Mutex<Vec<(SubscriptionId, StoreListener)>>,
    next_id: AtomicU64,
    /// Serializes dispatches across threads. The flag is set while the
    /// owning thread is inside the reducer.
    gate: ReentrantMutex<Cell<bool>>,
    dispatches: AtomicU64,
}

/// Clears the reducing flag on every exit path
struct ReducingFlag<'a>(&'a Cell<bool>);

impl Drop for ReducingFlag<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl HostStore {
    /// Create a store and dispatch the init action through `reducer`
    pub fn new(reducer: Reducer, initial: Value) -> TesseraResult<Arc<Self>> {
        HostStore::with_middleware(reducer, initial, Vec::new())
    }

    /// Like [`HostStore::new`], handing the store to each middleware before
    /// the init action
    pub fn with_middleware(
        reducer: Reducer,
        initial: Value,
        middleware: Vec<Middleware>,
    ) -> TesseraResult<Arc<Self>> {
        let store = Arc::new(HostStore {
            state: Mutex::new(initial),
            reducer: RwLock::new(reducer),
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            gate: ReentrantMutex::new(Cell::new(false)),
            dispatches: AtomicU64::new(0),
        });

        for attach in middleware {
            attach(store.clone() as Arc<dyn Store>);
        }
        store.dispatch(&Action::init())?;
        Ok(store)
    }

    /// Number of actions reduced so far, init included
    pub fn dispatch_count(&self) -> u64 {
        self.dispatches.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl Store for HostStore {
    /// Other threads wait for a running dispatch to finish. Dispatching
    /// from inside the reducer on the same thread is refused.
    fn dispatch(&self, action: &Action) -> TesseraResult<()> {
        {
            let reducing = self.gate.lock();
            if reducing.replace(true) {
                return Err(TesseraError::ReentrantDispatch(action.type_name().to_string()));
            }

            let next = {
                let _flag = ReducingFlag(&reducing);
                let reducer = self.reducer.read().clone();
                let current = self.state.lock().clone();
                reducer(current, action)?
            };
            *self.state.lock() = next;
            self.dispatches.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(action = %action.action_type, "action reduced");
        }

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
        let previous = std::mem::replace(&mut *self.reducer.write(), reducer);
        tracing::debug!("reducer replaced");
        previous
    }
}

impl fmt::Debug for HostStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostStore")
            .field("state", &*self.state.lock())
            .field("dispatches", &self.dispatch_count())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
