//! Immediate and debounced dispatch towards the host store

use std::sync::Arc;

use parking_lot::RwLock;
use tessera_core::{Action, TesseraResult};
use tessera_time::{Completion, Scheduler, TimerKey};

use crate::{Store, StoreTable};

/// Routes a slice's actions to its store.
///
/// The target is the slice's own attached store if any, otherwise the
/// default store of the shared [`StoreTable`]. With neither, dispatching is
/// a no-op.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<RwLock<Option<Arc<dyn Store>>>>,
    stores: Arc<StoreTable>,
    scheduler: Arc<Scheduler>,
}

impl Dispatcher {
    pub fn new(stores: Arc<StoreTable>, scheduler: Arc<Scheduler>) -> Self {
        Dispatcher {
            store: Arc::new(RwLock::new(None)),
            stores,
            scheduler,
        }
    }

    /// Use `store` instead of the default store
    pub fn attach(&self, store: Arc<dyn Store>) {
        *self.store.write() = Some(store);
    }

    /// The store actions would currently go to
    pub fn target(&self) -> Option<Arc<dyn Store>> {
        resolve(&self.store, &self.stores)
    }

    /// Cancel any pending deferred dispatch of this action type, then
    /// dispatch synchronously. Returns false if no store is reachable.
    pub fn dispatch_immediate(&self, action: &Action) -> TesseraResult<bool> {
        self.scheduler
            .cancel(&TimerKey::Dispatch(action.action_type.clone()));
        deliver(&self.store, &self.stores, action)
    }

    /// Debounced dispatch: replaces any pending timer for this action type
    /// with one that dispatches `action` after the configured delay.
    ///
    /// Errors raised by the deferred dispatch cannot reach the caller; they
    /// are logged and resolve the completion as failed.
    pub fn dispatch_scheduled(&self, action: Action) -> Completion {
        let key = TimerKey::Dispatch(action.action_type.clone());
        let delay = self.scheduler.config().dispatch_delay;
        let store = self.store.clone();
        let stores = self.stores.clone();

        tracing::debug!(action = %action.action_type, ?delay, "dispatch scheduled");
        self.scheduler.arm_fallible(key, delay, move || {
            deliver(&store, &stores, &action).map(|_| ())
        })
    }
}

fn resolve(
    store: &RwLock<Option<Arc<dyn Store>>>,
    stores: &StoreTable,
) -> Option<Arc<dyn Store>> {
    store.read().clone().or_else(|| stores.default_store())
}

fn deliver(
    store: &RwLock<Option<Arc<dyn Store>>>,
    stores: &StoreTable,
    action: &Action,
) -> TesseraResult<bool> {
    match resolve(store, stores) {
        Some(store) => {
            tracing::debug!(action = %action.action_type, "dispatch");
            store.dispatch(action)?;
            Ok(true)
        }
        None => {
            tracing::debug!(action = %action.action_type, "no store reachable, dispatch skipped");
            Ok(false)
        }
    }
}
