//! State slices
//!
//! A slice owns one service's state: the committed `last_known` map and
//! the `pending` changes not yet propagated to the host store. Its resolved
//! view is always `last_known` overlaid with `pending`.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tessera_core::{
    Action, ActionType, DotPath, SliceId, StateMap, TesseraError, TesseraResult,
    DEFAULT_DIFF_DEPTH,
};
use tessera_time::{Scheduler, TimerKey};

use crate::{Dispatcher, Store, StoreTable};

/// Subscriber callback, receives the resolved state
pub type Listener = Arc<dyn Fn(&StateMap) + Send + Sync>;

type SliceHook = Arc<dyn Fn(&Slice) + Send + Sync>;
type ReduceHook = Arc<dyn Fn(&Slice, &Action) + Send + Sync>;
type ChangingHook = Arc<dyn Fn(StateMap) -> StateMap + Send + Sync>;
type RouteHook = Arc<dyn Fn(&Slice, &str) + Send + Sync>;

/// Optional lifecycle callbacks supplied at construction
#[derive(Clone, Default)]
pub struct SliceHooks {
    /// After the first reconciliation pass
    pub init: Option<SliceHook>,
    /// At the start of every reconciliation pass
    pub reduce: Option<ReduceHook>,
    /// Rewrites the merged incoming + pending map before it is committed
    pub state_changing: Option<ChangingHook>,
    /// Before subscribers are notified
    pub state_changed: Option<SliceHook>,
    /// When the route changes
    pub route: Option<RouteHook>,
}

impl SliceHooks {
    pub fn new() -> Self {
        SliceHooks::default()
    }

    pub fn on_init(mut self, f: impl Fn(&Slice) + Send + Sync + 'static) -> Self {
        self.init = Some(Arc::new(f));
        self
    }

    pub fn on_reduce(mut self, f: impl Fn(&Slice, &Action) + Send + Sync + 'static) -> Self {
        self.reduce = Some(Arc::new(f));
        self
    }

    pub fn on_state_changing(
        mut self,
        f: impl Fn(StateMap) -> StateMap + Send + Sync + 'static,
    ) -> Self {
        self.state_changing = Some(Arc::new(f));
        self
    }

    pub fn on_state_changed(mut self, f: impl Fn(&Slice) + Send + Sync + 'static) -> Self {
        self.state_changed = Some(Arc::new(f));
        self
    }

    pub fn on_route(mut self, f: impl Fn(&Slice, &str) + Send + Sync + 'static) -> Self {
        self.route = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for SliceHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SliceHooks")
            .field("init", &self.init.is_some())
            .field("reduce", &self.reduce.is_some())
            .field("state_changing", &self.state_changing.is_some())
            .field("state_changed", &self.state_changed.is_some())
            .field("route", &self.route.is_some())
            .finish()
    }
}

/// How `set_state` propagates changes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DispatchPolicy {
    /// Dispatch immediately, unless a reconciliation pass is running
    #[default]
    Adaptive,
    /// Always go through the debounced path
    Deferred,
}

/// Slice tuning
#[derive(Clone, Copy, Debug)]
pub struct SliceOptions {
    /// Compare depth used when checking incoming state
    pub depth: usize,
    pub dispatch: DispatchPolicy,
}

impl Default for SliceOptions {
    fn default() -> Self {
        SliceOptions {
            depth: DEFAULT_DIFF_DEPTH,
            dispatch: DispatchPolicy::Adaptive,
        }
    }
}

/// Everything needed to build a slice
#[derive(Clone, Debug)]
pub struct SliceSpec {
    pub path: String,
    pub initial: StateMap,
    pub hooks: SliceHooks,
    pub options: SliceOptions,
}

impl SliceSpec {
    pub fn new(path: impl Into<String>, initial: StateMap) -> Self {
        SliceSpec {
            path: path.into(),
            initial,
            hooks: SliceHooks::default(),
            options: SliceOptions::default(),
        }
    }

    /// Initial state taken from any serializable struct
    pub fn typed<T: Serialize>(path: impl Into<String>, initial: &T) -> TesseraResult<Self> {
        Ok(SliceSpec::new(path, to_state_map(initial)?))
    }

    pub fn with_hooks(mut self, hooks: SliceHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_options(mut self, options: SliceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.options.depth = depth;
        self
    }

    pub fn with_dispatch(mut self, dispatch: DispatchPolicy) -> Self {
        self.options.dispatch = dispatch;
        self
    }
}

/// Shared services a slice is wired to
#[derive(Clone)]
pub struct SliceContext {
    pub scheduler: Arc<Scheduler>,
    pub stores: Arc<StoreTable>,
    /// Last route seen by the owning registry
    pub route: Arc<RwLock<Option<String>>>,
}

impl SliceContext {
    pub fn new(scheduler: Arc<Scheduler>, stores: Arc<StoreTable>) -> Self {
        SliceContext {
            scheduler,
            stores,
            route: Arc::new(RwLock::new(None)),
        }
    }
}

impl Default for SliceContext {
    fn default() -> Self {
        SliceContext::new(Arc::new(Scheduler::new()), Arc::new(StoreTable::new()))
    }
}

/// Reconciliation phase
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Never reconciled
    Uninitialized,
    /// A reconciliation pass is running
    Reconciling,
    Idle,
}

pub(crate) struct SliceInner {
    pub(crate) last_known: StateMap,
    pub(crate) pending: StateMap,
    pub(crate) phase: Phase,
    pub(crate) initialized: bool,
    listeners: Vec<Listener>,
    route: Option<String>,
}

impl SliceInner {
    pub(crate) fn resolved(&self) -> StateMap {
        let mut state = self.last_known.clone();
        for (key, value) in &self.pending {
            state.insert(key.clone(), value.clone());
        }
        state
    }
}

/// One service's state slice
pub struct Slice {
    id: SliceId,
    path: DotPath,
    action_type: ActionType,
    initial: Arc<StateMap>,
    pub(crate) options: SliceOptions,
    pub(crate) hooks: SliceHooks,
    pub(crate) inner: Mutex<SliceInner>,
    dispatcher: Dispatcher,
    scheduler: Arc<Scheduler>,
    known_route: Arc<RwLock<Option<String>>>,
    this: Weak<Slice>,
}

impl Slice {
    /// Build a slice. Fails if the path is not a valid dot path.
    pub fn new(id: SliceId, spec: SliceSpec, context: SliceContext) -> TesseraResult<Arc<Self>> {
        let path = DotPath::parse(&spec.path)?;
        let action_type = ActionType::for_slice(&id);
        let dispatcher = Dispatcher::new(context.stores, context.scheduler.clone());
        let initial = Arc::new(spec.initial);

        Ok(Arc::new_cyclic(|this| Slice {
            id,
            path,
            action_type,
            inner: Mutex::new(SliceInner {
                last_known: (*initial).clone(),
                pending: StateMap::new(),
                phase: Phase::Uninitialized,
                initialized: false,
                listeners: Vec::new(),
                route: None,
            }),
            initial,
            options: spec.options,
            hooks: spec.hooks,
            dispatcher,
            scheduler: context.scheduler,
            known_route: context.route,
            this: this.clone(),
        }))
    }

    /// A slice with its own scheduler and no store
    pub fn standalone(id: impl Into<String>, spec: SliceSpec) -> TesseraResult<Arc<Self>> {
        Slice::new(SliceId::new(id), spec, SliceContext::default())
    }

    pub fn id(&self) -> &SliceId {
        &self.id
    }

    pub fn path(&self) -> &DotPath {
        &self.path
    }

    pub fn action_type(&self) -> &ActionType {
        &self.action_type
    }

    pub fn options(&self) -> &SliceOptions {
        &self.options
    }

    /// The frozen initial state
    pub fn initial(&self) -> Arc<StateMap> {
        self.initial.clone()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Dispatch to `store` rather than the registry default
    pub fn attach(&self, store: Arc<dyn Store>) {
        self.dispatcher.attach(store);
    }

    /// The store this slice currently dispatches to
    pub fn store(&self) -> TesseraResult<Arc<dyn Store>> {
        self.dispatcher
            .target()
            .ok_or_else(|| TesseraError::NoStoreAttached(self.id.to_string()))
    }

    /// Resolved view: `last_known` overlaid with `pending`, rebuilt per call
    pub fn state(&self) -> StateMap {
        self.inner.lock().resolved()
    }

    /// A single field of the resolved view
    pub fn get(&self, key: &str) -> Option<Value> {
        let inner = self.inner.lock();
        inner
            .pending
            .get(key)
            .or_else(|| inner.last_known.get(key))
            .cloned()
    }

    /// Resolved view deserialized into `T`
    pub fn snapshot<T: DeserializeOwned>(&self) -> TesseraResult<T> {
        Ok(serde_json::from_value(Value::Object(self.state()))?)
    }

    pub fn last_known(&self) -> StateMap {
        self.inner.lock().last_known.clone()
    }

    pub fn pending(&self) -> StateMap {
        self.inner.lock().pending.clone()
    }

    pub fn has_pending(&self) -> bool {
        !self.inner.lock().pending.is_empty()
    }

    pub fn phase(&self) -> Phase {
        self.inner.lock().phase
    }

    pub fn is_reconciling(&self) -> bool {
        self.phase() == Phase::Reconciling
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lock().initialized
    }

    pub fn route(&self) -> Option<String> {
        self.inner.lock().route.clone()
    }

    /// Record changes and propagate them towards the store.
    ///
    /// A field whose value already equals the committed value is dropped
    /// (and clears any pending change for it). Returns whether anything
    /// was recorded. Never touches `last_known`.
    pub fn set_state(&self, changes: StateMap) -> TesseraResult<bool> {
        let (action, deferred) = {
            let mut inner = self.inner.lock();
            let mut changed = false;

            for (key, value) in changes {
                if inner.pending.get(&key) == Some(&value) {
                    continue;
                }
                inner.pending.remove(&key);
                if inner.last_known.get(&key) == Some(&value) {
                    continue;
                }
                inner.pending.insert(key, value);
                changed = true;
            }

            if !changed {
                return Ok(false);
            }

            let deferred = inner.phase == Phase::Reconciling
                || self.options.dispatch == DispatchPolicy::Deferred;
            (
                Action::with_changes(self.action_type.clone(), inner.pending.clone()),
                deferred,
            )
        };

        if deferred {
            self.dispatcher.dispatch_scheduled(action);
        } else {
            self.dispatcher.dispatch_immediate(&action)?;
        }
        self.schedule_state_changed();

        Ok(true)
    }

    /// Set a single field
    pub fn set(&self, key: &str, value: Value) -> TesseraResult<bool> {
        let mut changes = StateMap::new();
        changes.insert(key.to_string(), value);
        self.set_state(changes)
    }

    /// Set changes from any struct serializing to a map
    pub fn set_typed<T: Serialize>(&self, changes: &T) -> TesseraResult<bool> {
        self.set_state(to_state_map(changes)?)
    }

    /// Add a listener; it is called once right away with the current state.
    /// Subscribing the same listener twice is a no-op.
    pub fn subscribe(&self, listener: Listener) -> Subscription {
        let fresh = {
            let mut inner = self.inner.lock();
            if inner.listeners.iter().any(|l| same_listener(l, &listener)) {
                false
            } else {
                inner.listeners.push(listener.clone());
                true
            }
        };
        if fresh {
            listener(&self.state());
        }

        Subscription {
            slice: self.this.clone(),
            listener,
        }
    }

    /// Remove a listener; true if it was subscribed
    pub fn unsubscribe(&self, listener: &Listener) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|l| !same_listener(l, listener));
        inner.listeners.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// Normalise a pathname, record it and fire the route hook
    pub fn handle_route(&self, pathname: &str) {
        let route = normalize_route(pathname);
        self.inner.lock().route = Some(route.clone());
        if let Some(hook) = &self.hooks.route {
            hook(self, &route);
        }
    }

    /// Arm (or re-arm) the deferred subscriber notification.
    /// Nothing is armed before the first reconciliation pass.
    pub(crate) fn schedule_state_changed(&self) {
        let key = TimerKey::Notify(self.id.clone());
        if !self.is_initialized() {
            self.scheduler.cancel(&key);
            return;
        }

        let this = self.this.clone();
        self.scheduler
            .arm(key, self.scheduler.config().notify_delay, move || {
                if let Some(slice) = this.upgrade() {
                    slice.notify_subscribers();
                }
            });
    }

    fn notify_subscribers(&self) {
        if let Some(hook) = &self.hooks.state_changed {
            hook(self);
        }

        let (state, listeners) = {
            let inner = self.inner.lock();
            (inner.resolved(), inner.listeners.clone())
        };
        tracing::trace!(slice = %self.id, listeners = listeners.len(), "notifying subscribers");
        for listener in listeners {
            listener(&state);
        }
    }

    /// One-time initialisation after the first reconciliation pass
    pub(crate) fn init(&self) {
        tracing::debug!(slice = %self.id, path = %self.path, "slice initialized");
        if let Some(hook) = &self.hooks.init {
            hook(self);
        }
        let route = self.known_route.read().clone();
        if let Some(route) = route {
            self.handle_route(&route);
        }
    }
}

impl fmt::Debug for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Slice")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("phase", &inner.phase)
            .field("last_known", &inner.last_known)
            .field("pending", &inner.pending)
            .finish()
    }
}

/// Returned by [`Slice::subscribe`]; unsubscribing is explicit
pub struct Subscription {
    slice: Weak<Slice>,
    listener: Listener,
}

impl Subscription {
    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    pub fn unsubscribe(self) -> bool {
        match self.slice.upgrade() {
            Some(slice) => slice.unsubscribe(&self.listener),
            None => false,
        }
    }
}

fn same_listener(a: &Listener, b: &Listener) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const u8, Arc::as_ptr(b) as *const u8)
}

fn to_state_map<T: Serialize>(value: &T) -> TesseraResult<StateMap> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Err(<serde_json::Error as serde::ser::Error>::custom(
            "slice state must serialize to a map",
        )
        .into()),
    }
}

/// Backslashes become slashes, then one leading `#` and every leading `/`
/// are stripped
pub fn normalize_route(pathname: &str) -> String {
    let route = pathname.replace('\\', "/");
    let route = route.strip_prefix('#').unwrap_or(&route);
    route.trim_start_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockStore;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn map(value: Value) -> StateMap {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn counter() -> Arc<Slice> {
        crate::mock::standalone("counter", SliceSpec::new("testData", map(json!({ "a": 1, "b": 2 }))))
            .unwrap()
    }

    #[test]
    fn test_invalid_path_rejected() {
        let err = crate::mock::standalone("bad", SliceSpec::new("not a path", StateMap::new()));
        assert!(matches!(err, Err(tessera_core::TesseraError::InvalidPath(_))));
    }

    #[test]
    fn test_initial_state() {
        let slice = counter();
        assert_eq!(slice.state(), map(json!({ "a": 1, "b": 2 })));
        assert_eq!(*slice.initial(), slice.last_known());
        assert_eq!(slice.phase(), Phase::Uninitialized);
        assert_eq!(slice.action_type().as_str(), "ServiceCounter");
    }

    #[test]
    fn test_set_state_without_store_stays_pending() {
        let slice = counter();
        assert!(slice.set("a", json!(2)).unwrap());

        assert_eq!(slice.get("a"), Some(json!(2)));
        assert_eq!(slice.pending(), map(json!({ "a": 2 })));
        assert_eq!(slice.last_known()["a"], json!(1));
        // initial stays frozen
        assert_eq!(slice.initial()["a"], json!(1));
    }

    #[test]
    fn test_store_requires_attachment() {
        let slice = counter();
        assert!(matches!(
            slice.store(),
            Err(tessera_core::TesseraError::NoStoreAttached(_))
        ));
        slice.attach(MockStore::passthrough());
        assert!(slice.store().is_ok());
    }

    #[test]
    fn test_unchanged_value_is_noop() {
        let slice = counter();
        let store = MockStore::passthrough();
        slice.attach(store.clone());

        assert!(!slice.set("a", json!(1)).unwrap());
        assert!(!slice.has_pending());
        assert!(store.dispatched().is_empty());
        assert_eq!(slice.scheduler().pending(), 0);
    }

    #[test]
    fn test_same_pending_value_is_noop() {
        let slice = counter();
        assert!(slice.set("a", json!(5)).unwrap());
        assert!(!slice.set("a", json!(5)).unwrap());
        assert_eq!(slice.pending(), map(json!({ "a": 5 })));
    }

    #[test]
    fn test_revert_to_committed_drops_pending() {
        let slice = counter();
        slice.set("a", json!(5)).unwrap();
        assert!(!slice.set("a", json!(1)).unwrap());
        assert!(!slice.has_pending());
        assert_eq!(slice.get("a"), Some(json!(1)));
    }

    #[test]
    fn test_immediate_dispatch_carries_changes() {
        let slice = counter();
        let store = MockStore::passthrough();
        slice.attach(store.clone());

        slice.set_state(map(json!({ "a": 2, "b": 2 }))).unwrap();
        let dispatched = store.dispatched();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].type_name(), "ServiceCounter");
        assert_eq!(dispatched[0].payload, json!({ "a": 2 }));
    }

    #[test]
    fn test_deferred_policy_coalesces() {
        let spec = SliceSpec::new("testData", map(json!({ "a": 0 })))
            .with_dispatch(DispatchPolicy::Deferred);
        let slice = crate::mock::standalone("counter", spec).unwrap();
        let store = MockStore::passthrough();
        slice.attach(store.clone());

        slice.set("a", json!(1)).unwrap();
        slice.set("a", json!(2)).unwrap();
        assert!(store.dispatched().is_empty());

        slice.scheduler().run_until_idle();
        let dispatched = store.dispatched();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].payload, json!({ "a": 2 }));
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let slice = counter();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let listener: Listener = Arc::new(move |_: &StateMap| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        slice.subscribe(listener.clone());
        slice.subscribe(listener.clone());
        assert_eq!(slice.subscriber_count(), 1);
        // delivered once on first subscription only
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(slice.unsubscribe(&listener));
        assert!(!slice.unsubscribe(&listener));
        assert_eq!(slice.subscriber_count(), 0);
    }

    #[test]
    fn test_subscription_handle_unsubscribes() {
        let slice = counter();
        let subscription = slice.subscribe(Arc::new(|_: &StateMap| {}));
        assert_eq!(slice.subscriber_count(), 1);
        assert!(subscription.unsubscribe());
        assert_eq!(slice.subscriber_count(), 0);
    }

    #[test]
    fn test_no_notification_before_init() {
        let slice = counter();
        slice.set("a", json!(3)).unwrap();
        assert!(!slice.scheduler().is_armed(&TimerKey::Notify(slice.id().clone())));
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        visits: u32,
    }

    #[test]
    fn test_typed_roundtrip() {
        let initial = Profile {
            name: "ada".into(),
            visits: 0,
        };
        let slice = crate::mock::standalone("profile", SliceSpec::typed("profile", &initial).unwrap())
            .unwrap();

        slice
            .set_typed(&Profile {
                name: "ada".into(),
                visits: 3,
            })
            .unwrap();
        assert_eq!(slice.pending(), map(json!({ "visits": 3 })));

        let profile: Profile = slice.snapshot().unwrap();
        assert_eq!(profile.visits, 3);
    }

    #[test]
    fn test_set_typed_rejects_non_map() {
        let slice = crate::mock::standalone("profile", SliceSpec::new("profile", StateMap::new()))
            .unwrap();

        let err = slice.set_typed(&5u32).unwrap_err();
        assert!(matches!(err, TesseraError::Serialization(_)));
        assert!(!slice.has_pending());

        assert!(matches!(
            SliceSpec::typed("profile", &vec![1, 2]),
            Err(TesseraError::Serialization(_))
        ));
    }

    #[test]
    fn test_handle_route() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let hooks = SliceHooks::new().on_route(move |_, route| s.lock().push(route.to_string()));
        let slice = crate::mock::standalone(
            "router",
            SliceSpec::new("router", StateMap::new()).with_hooks(hooks),
        )
        .unwrap();

        slice.handle_route("#//users\\42");
        assert_eq!(slice.route().as_deref(), Some("users/42"));
        assert_eq!(*seen.lock(), vec!["users/42".to_string()]);
    }

    #[test]
    fn test_normalize_route() {
        assert_eq!(normalize_route("/a/b"), "a/b");
        assert_eq!(normalize_route("#/a"), "a");
        assert_eq!(normalize_route("\\\\x\\y"), "x/y");
        assert_eq!(normalize_route(""), "");
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_normalized_route_is_relative(route in "[#/\\\\a-z]{0,12}") {
                let once = normalize_route(&route);
                prop_assert!(!once.starts_with('/'));
                prop_assert!(!once.contains('\\'));
            }
        }
    }
}
