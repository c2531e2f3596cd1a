//! Registry context
//!
//! Owns every slice of an application together with the shared scheduler
//! and store table. Slices are built lazily, once per id, and kept in
//! registration order.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tessera_core::{Action, SliceId, TesseraError, TesseraResult};
use tessera_time::{Scheduler, TimerKey};

use crate::slice::{Slice, SliceContext, SliceSpec};
use crate::{Middleware, Reducer, Store, StoreTable, DEFAULT_STORE};

pub struct Registry {
    slices: Mutex<Vec<Arc<Slice>>>,
    context: SliceContext,
    this: Weak<Registry>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Registry::with_scheduler(Arc::new(Scheduler::new()))
    }

    pub fn with_scheduler(scheduler: Arc<Scheduler>) -> Arc<Self> {
        Arc::new_cyclic(|this| Registry {
            slices: Mutex::new(Vec::new()),
            context: SliceContext::new(scheduler, Arc::new(StoreTable::new())),
            this: this.clone(),
        })
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.context.scheduler
    }

    pub fn stores(&self) -> &Arc<StoreTable> {
        &self.context.stores
    }

    /// Return the slice registered under `id`, building it from `build` on
    /// first use.
    ///
    /// `build` runs with the registry locked and must not call back into
    /// the registry. A new slice whose path overlaps an existing one is
    /// rejected.
    pub fn define<F>(&self, id: &str, build: F) -> TesseraResult<Arc<Slice>>
    where
        F: FnOnce() -> SliceSpec,
    {
        let mut slices = self.slices.lock();
        if let Some(existing) = slices.iter().find(|s| s.id().as_str() == id) {
            return Ok(existing.clone());
        }

        let spec = build();
        if let Some(owner) = slices.iter().find(|s| paths_overlap(s.path().as_str(), &spec.path)) {
            return Err(TesseraError::DuplicateRegistration {
                id: id.to_string(),
                path: owner.path().to_string(),
            });
        }

        let slice = Slice::new(SliceId::new(id), spec, self.context.clone())?;
        tracing::info!(slice = id, path = %slice.path(), action = %slice.action_type(), "slice registered");
        slices.push(slice.clone());
        Ok(slice)
    }

    /// Unregister a slice. Its pending timers are cancelled.
    pub fn remove(&self, id: &str) -> Option<Arc<Slice>> {
        let slice = {
            let mut slices = self.slices.lock();
            let index = slices.iter().position(|s| s.id().as_str() == id)?;
            slices.remove(index)
        };
        let scheduler = &self.context.scheduler;
        scheduler.cancel(&TimerKey::Dispatch(slice.action_type().clone()));
        scheduler.cancel(&TimerKey::Notify(slice.id().clone()));
        tracing::info!(slice = id, "slice removed");
        Some(slice)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Slice>> {
        self.slices
            .lock()
            .iter()
            .find(|s| s.id().as_str() == id)
            .cloned()
    }

    /// Slices whose path contains any of `match_paths`, in registration
    /// order. An empty filter matches everything.
    pub fn slices(&self, match_paths: &[&str]) -> Vec<Arc<Slice>> {
        self.slices
            .lock()
            .iter()
            .filter(|s| {
                match_paths.is_empty() || match_paths.iter().any(|m| s.path().as_str().contains(m))
            })
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.lock().is_empty()
    }

    /// Reducer running every matching slice in registration order.
    /// Matching is evaluated per action, so slices defined later join in.
    ///
    /// Slices only commit once every one of them has written its path, so
    /// a failing slice leaves all of them as they were.
    pub fn reducer(&self, match_paths: &[&str]) -> Reducer {
        let registry = self.this.clone();
        let match_paths: Vec<String> = match_paths.iter().map(|m| m.to_string()).collect();

        Arc::new(move |state: Value, action: &Action| -> TesseraResult<Value> {
            let Some(registry) = registry.upgrade() else {
                return Ok(state);
            };
            let filter: Vec<&str> = match_paths.iter().map(String::as_str).collect();
            let slices = registry.slices(&filter);

            let mut state = state;
            let mut staged = Vec::with_capacity(slices.len());
            for slice in &slices {
                let (next, stage) = slice.stage(state, action)?;
                state = next;
                staged.push(stage);
            }
            for stage in staged {
                stage.commit();
            }
            Ok(state)
        })
    }

    /// Run `host` first, then the slice reducer
    pub fn wrap_reducer(&self, host: Reducer, match_paths: &[&str]) -> Reducer {
        let slices = self.reducer(match_paths);
        Arc::new(move |state: Value, action: &Action| -> TesseraResult<Value> {
            let state = host(state, action)?;
            slices(state, action)
        })
    }

    /// Record `store` as the dispatch target under `name`
    pub fn attach(&self, name: &str, store: Arc<dyn Store>) {
        self.context.stores.attach(name, store);
    }

    /// Store hook recording the store under `name` once it exists
    pub fn middleware(&self, name: &str) -> Middleware {
        let stores = self.context.stores.clone();
        let name = name.to_string();
        Box::new(move |store: Arc<dyn Store>| stores.attach(&name, store))
    }

    /// Middleware for the default store
    pub fn default_middleware(&self) -> Middleware {
        self.middleware(DEFAULT_STORE)
    }

    /// Record the new route and pass it to every initialised slice.
    /// Slices initialised later replay it.
    pub fn route_changed(&self, pathname: &str) {
        *self.context.route.write() = Some(pathname.to_string());
        for slice in self.slices(&[]) {
            if slice.is_initialized() {
                slice.handle_route(pathname);
            }
        }
    }

    pub fn route(&self) -> Option<String> {
        self.context.route.read().clone()
    }

    /// Run scheduled work that is due now. Returns the number of tasks run.
    pub fn flush(&self) -> usize {
        self.context.scheduler.run_due()
    }

    /// Run scheduled work until nothing is left
    pub fn flush_all(&self) -> usize {
        self.context.scheduler.run_until_idle()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self
            .slices
            .lock()
            .iter()
            .map(|s| s.id().to_string())
            .collect();
        f.debug_struct("Registry")
            .field("slices", &ids)
            .field("stores", &self.context.stores)
            .finish()
    }
}

/// Equal paths, or one nested under the other
fn paths_overlap(a: &str, b: &str) -> bool {
    fn nested(outer: &str, inner: &str) -> bool {
        inner
            .strip_prefix(outer)
            .map_or(false, |rest| rest.is_empty() || rest.starts_with('.'))
    }
    nested(a, b) || nested(b, a)
}
