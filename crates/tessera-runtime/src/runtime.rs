//! Runtime facade
//!
//! Wires a [`Registry`] to a [`HostStore`] and, inside a tokio runtime, a
//! [`Driver`] that flushes scheduled work.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tessera_core::{Action, TesseraResult};
use tessera_state::{Reducer, Registry, Slice, SliceSpec, Store};
use tessera_time::{Clock, Scheduler, SystemClock};

use crate::{Driver, HostStore, RuntimeConfig};

pub struct Runtime {
    config: RuntimeConfig,
    registry: Arc<Registry>,
    store: Arc<HostStore>,
    driver: Option<Driver>,
}

impl Runtime {
    /// Build the registry and a host store running `host_reducer` followed by
    /// every slice
    pub fn new(config: RuntimeConfig, host_reducer: Reducer) -> TesseraResult<Self> {
        Runtime::with_clock(config, host_reducer, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(
        config: RuntimeConfig,
        host_reducer: Reducer,
        clock: Arc<dyn Clock>,
    ) -> TesseraResult<Self> {
        let scheduler = Arc::new(Scheduler::with_clock(clock, config.scheduler.clone()));
        let registry = Registry::with_scheduler(scheduler);
        let reducer = registry.wrap_reducer(host_reducer, &[]);
        let store = HostStore::with_middleware(
            reducer,
            Value::Null,
            vec![registry.default_middleware()],
        )?;

        tracing::info!(?config.tick_interval, "runtime ready");
        Ok(Runtime {
            config,
            registry,
            store,
            driver: None,
        })
    }

    /// Host reducer that leaves the state alone
    pub fn slices_only(config: RuntimeConfig) -> TesseraResult<Self> {
        fn identity(state: Value, _: &Action) -> TesseraResult<Value> {
            Ok(state)
        }
        Runtime::new(config, Arc::new(identity))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<HostStore> {
        &self.store
    }

    pub fn state(&self) -> Value {
        self.store.get_state()
    }

    /// Define a slice and, if it is new, run an init action so it
    /// reconciles into the composite state right away.
    ///
    /// A slice whose first pass fails (say its parent path does not exist)
    /// is unregistered again, so it cannot block later dispatches.
    pub fn define<F>(&self, id: &str, build: F) -> TesseraResult<Arc<Slice>>
    where
        F: FnOnce() -> SliceSpec,
    {
        let slice = self.registry.define(id, build)?;
        if !slice.is_initialized() {
            if let Err(e) = self.store.dispatch(&Action::init()) {
                if !slice.is_initialized() {
                    tracing::warn!(slice = id, error = %e, "slice failed to initialize");
                    self.registry.remove(id);
                }
                return Err(e);
            }
        }
        Ok(slice)
    }

    pub fn dispatch(&self, action: &Action) -> TesseraResult<()> {
        self.store.dispatch(action)
    }

    /// Run due work now
    pub fn flush(&self) -> usize {
        self.registry.flush()
    }

    /// Run scheduled work until idle; with a manual clock this jumps over
    /// pending delays
    pub fn flush_all(&self) -> usize {
        self.registry.flush_all()
    }

    /// Start the background driver. Must be called within a tokio runtime.
    pub fn start(&mut self) {
        if self.driver.is_none() {
            self.driver = Some(Driver::spawn(
                self.registry.scheduler().clone(),
                self.config.tick_interval,
            ));
        }
    }

    pub fn is_driven(&self) -> bool {
        self.driver.is_some()
    }

    /// Stop the driver, if running. Returns the tasks it ran.
    pub async fn shutdown(&mut self) -> u64 {
        match self.driver.take() {
            Some(driver) => driver.shutdown().await,
            None => 0,
        }
    }

    pub fn slice(&self, id: &str) -> Option<Arc<Slice>> {
        self.registry.get(id)
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("registry", &self.registry)
            .field("store", &self.store)
            .field("driven", &self.is_driven())
            .finish()
    }
}
