//! Controllers
//!
//! A controller groups async operations with the namespace slice they write.
//! Operations are registered explicitly on a [`ControllerBuilder`]; for each
//! one the controller derives
//!
//! - a dispatch action type (the converted operation name)
//! - a completion action type (`<name>@@reducer`)
//! - a completion reducer in its [`ReducerMap`]
//! - an operation [`Watcher`]
//!
//! # Example
//!
//! ```
//! use statewire_core::{ErrorValue, Value};
//! use statewire_runtime::{Controller, StateSpec};
//!
//! let controller = Controller::builder("AppController")
//!     .operation("fetchApps", |_payload| async move {
//!         Ok::<_, ErrorValue>(Value::object([("currentApps", Value::empty_array())]))
//!     })
//!     .state(StateSpec::new().constant("currentApps", Value::empty_array()))
//!     .build()
//!     .map_err(|e| e.to_string())?;
//!
//! assert_eq!(controller.namespace(), "appcontroller");
//! assert!(controller.reducer().handles("fetchApps@@reducer"));
//! # Ok::<(), String>(())
//! ```

mod bound;
mod completion;
pub(crate) mod deferred;
mod state;

pub use bound::{BoundOperation, BoundOperations, ViewProps};
pub use deferred::{DeferredPolicy, Pending};
pub use state::{StateSpec, ValueFn, LAST_ERROR, LAST_THROWN_ERROR};

use crate::error::ControllerError;
use crate::registry::Registry;
use crate::store::Dispatcher;
use crate::watcher::{invoke, Watcher};
use completion::completion_reducer;
use deferred::DeferredTable;
use futures::future::{BoxFuture, FutureExt};
use state::{DeclaredState, StateContainer};
use statewire_core::{ActionDescriptor, ErrorValue, ReducerMap, RootState, Slice, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// An operation body: payload in, result or error out.
pub type OperationFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, ErrorValue>> + Send + Sync>;

/// Names never registered as operations
pub const RESERVED_NAMES: [&str; 5] = ["constructor", "stateNamespace", "toString", "component", "connect"];

/// Names of the controller's own API; operations may use them but shadow nothing
const CONTROLLER_API_NAMES: [&str; 16] = [
    "state",
    "reducer",
    "initialState",
    "props",
    "boundOperations",
    "addWatcher",
    "directConnect",
    "watchers",
    "actionCreators",
    "componentName",
    "namespace",
    "callDirect",
    "dispatch",
    "call",
    "mapStateToProps",
    "mapDispatchToProps",
];

static NEXT_CONTROLLER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone)]
struct Operation {
    dispatch: ActionDescriptor,
    completion: ActionDescriptor,
    handler: OperationFn,
}

/// Builder for [`Controller`]
#[must_use = "call build() to get a Controller"]
pub struct ControllerBuilder {
    component: String,
    namespace: Option<String>,
    operations: Vec<(String, OperationFn)>,
    specs: Vec<StateSpec>,
    watchers: Vec<Watcher>,
    policy: Option<DeferredPolicy>,
}

impl ControllerBuilder {
    fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            namespace: None,
            operations: Vec::new(),
            specs: Vec::new(),
            watchers: Vec::new(),
            policy: None,
        }
    }

    /// Share the slice `namespace` instead of the lower-cased component name.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Register an async operation.
    ///
    /// Reserved names and names starting with `__` are skipped. Registering a
    /// name twice replaces the earlier body.
    pub fn operation<F, Fut>(self, name: &str, body: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ErrorValue>> + Send + 'static,
    {
        let handler: OperationFn = Arc::new(move |payload| body(payload).boxed());
        self.register(name, handler)
    }

    /// Register a synchronous operation.
    pub fn operation_sync<F>(self, name: &str, body: F) -> Self
    where
        F: Fn(Value) -> Result<Value, ErrorValue> + Send + Sync + 'static,
    {
        let handler: OperationFn = Arc::new(move |payload| futures::future::ready(body(payload)).boxed());
        self.register(name, handler)
    }

    fn register(mut self, name: &str, handler: OperationFn) -> Self {
        if name.starts_with("__") || RESERVED_NAMES.contains(&name) {
            tracing::debug!(component = %self.component, operation = name, "Skipping reserved name");
            return self;
        }
        if CONTROLLER_API_NAMES.contains(&name) {
            tracing::warn!(
                component = %self.component,
                operation = name,
                "Operation name matches a controller method; call it through dispatch or call"
            );
        }
        match self.operations.iter_mut().find(|(existing, _)| existing == name) {
            Some(entry) => entry.1 = handler,
            None => self.operations.push((name.to_string(), handler)),
        }
        self
    }

    /// Add state declarations. Later declarations override earlier keys.
    pub fn state(mut self, spec: StateSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Run `callback` for every dispatch of `kind`.
    pub fn watch<F>(mut self, kind: impl Into<String>, callback: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.watchers.push(Watcher::standalone(kind, callback));
        self
    }

    /// Fix the deferred policy instead of taking the store's default.
    pub fn deferred_policy(mut self, policy: DeferredPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Build the controller.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::UndefinedComponent`] if the component name is empty.
    pub fn build(self) -> Result<Controller, ControllerError> {
        let component = self.component.trim().to_string();
        if component.is_empty() {
            return Err(ControllerError::UndefinedComponent);
        }
        let explicit_namespace = self.namespace.is_some();
        let namespace = self
            .namespace
            .unwrap_or_else(|| component.to_lowercase());

        let declared = DeclaredState::from_specs(self.specs);
        let deferreds = Arc::new(DeferredTable::new(self.policy));
        let container = Arc::new(StateContainer::new(declared.initial.clone()));
        let mut reducer = ReducerMap::new(declared.initial.clone());
        let mut operations = BTreeMap::new();
        let mut watchers = Vec::with_capacity(self.operations.len() + self.watchers.len());

        for (name, handler) in self.operations {
            let dispatch = ActionDescriptor::from_name(&name);
            let completion = ActionDescriptor::completion_of(&name);
            reducer.insert(
                completion.kind(),
                completion_reducer(&dispatch, Arc::clone(&deferreds), Arc::clone(&container)),
            );
            watchers.push(Watcher::operation(
                dispatch.clone(),
                completion.clone(),
                Arc::clone(&handler),
            ));
            operations.insert(
                name,
                Operation {
                    dispatch,
                    completion,
                    handler,
                },
            );
        }
        watchers.extend(self.watchers);

        tracing::debug!(
            component = %component,
            namespace = %namespace,
            operations = operations.len(),
            "Controller built"
        );

        Ok(Controller {
            inner: Arc::new(ControllerInner {
                id: NEXT_CONTROLLER_ID.fetch_add(1, Ordering::Relaxed),
                component,
                namespace,
                explicit_namespace,
                operations,
                reducer,
                declared,
                deferreds,
                container,
                watchers: Mutex::new(watchers),
                dispatcher: RwLock::new(None),
            }),
        })
    }
}

/// A controller: operations, their reducers and watchers, and the slice they write
///
/// Cheap to clone; clones are the same controller.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    id: u64,
    component: String,
    namespace: String,
    explicit_namespace: bool,
    operations: BTreeMap<String, Operation>,
    reducer: ReducerMap,
    declared: DeclaredState,
    deferreds: Arc<DeferredTable>,
    container: Arc<StateContainer>,
    watchers: Mutex<Vec<Watcher>>,
    dispatcher: RwLock<Option<Dispatcher>>,
}

impl Controller {
    /// Start building a controller for `component`.
    pub fn builder(component: impl Into<String>) -> ControllerBuilder {
        ControllerBuilder::new(component)
    }

    /// Component name as given
    #[must_use]
    pub fn component_name(&self) -> &str {
        &self.inner.component
    }

    /// Namespace of the slice this controller writes
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    /// Whether the namespace was set explicitly (and may be shared)
    #[must_use]
    pub fn has_explicit_namespace(&self) -> bool {
        self.inner.explicit_namespace
    }

    /// Whether both handles are the same controller
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    /// Completion reducers with the initial slice
    #[must_use]
    pub fn reducer(&self) -> &ReducerMap {
        &self.inner.reducer
    }

    /// Initial slice computed from the state declarations
    #[must_use]
    pub fn initial_state(&self) -> &Slice {
        self.inner.reducer.initial()
    }

    /// Declared operation names
    pub fn operation_names(&self) -> impl Iterator<Item = &str> {
        self.inner.operations.keys().map(String::as_str)
    }

    /// Live namespace slice
    #[must_use]
    pub fn state(&self) -> Slice {
        self.inner.container.read()
    }

    /// Derived props: every declared key evaluated against this controller's
    /// slice of `root` (an empty slice if the namespace is absent).
    #[must_use]
    pub fn props(&self, root: &RootState) -> Slice {
        let empty = Slice::new();
        let slice = root.get(&self.inner.namespace).unwrap_or(&empty);
        self.inner.declared.props(slice)
    }

    /// Every watcher: one per operation, then the standalone ones.
    #[must_use]
    pub fn watchers(&self) -> Vec<Watcher> {
        self.inner
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run `callback` for every dispatch of `kind`.
    ///
    /// Watchers are collected when a store manager is created; adding one to
    /// a connected controller has no effect on the running store.
    pub fn add_watcher<F>(&self, kind: impl Into<String>, callback: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let watcher = Watcher::standalone(kind, callback);
        if self.is_bound() {
            tracing::warn!(
                component = %self.inner.component,
                kind = watcher.kind(),
                "Watcher added after the controller was connected; it will not run"
            );
        }
        self.inner
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(watcher);
    }

    /// Action creators for every operation's dispatch and completion types, by type
    #[must_use]
    pub fn action_creators(&self) -> BTreeMap<String, ActionDescriptor> {
        self.inner
            .operations
            .values()
            .flat_map(|op| [op.dispatch.clone(), op.completion.clone()])
            .map(|descriptor| (descriptor.kind().to_string(), descriptor))
            .collect()
    }

    /// Mount into `registry` under `name` (default: the component name),
    /// together with this controller's watchers.
    pub fn direct_connect(&self, registry: &mut Registry, name: Option<&str>) {
        registry.add_watchers(self);
        registry.add_reducer(name.unwrap_or(&self.inner.component), self);
    }

    /// Whether the controller is connected to a live store
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.dispatcher().is_some_and(|d| d.is_live())
    }

    fn dispatcher(&self) -> Option<Dispatcher> {
        self.inner
            .dispatcher
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn operation(&self, name: &str) -> Result<&Operation, ControllerError> {
        self.inner
            .operations
            .get(name)
            .ok_or_else(|| ControllerError::UnknownOperation {
                controller: self.inner.component.clone(),
                operation: name.to_string(),
            })
    }

    /// Run the operation body directly, bypassing the store.
    ///
    /// The result is the body's own value; no state is written.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::UnknownOperation`] for undeclared names.
    pub fn call_direct(&self, name: &str, payload: impl Into<Value>) -> Result<Pending, ControllerError> {
        let handler = Arc::clone(&self.operation(name)?.handler);
        let payload = payload.into();
        Ok(Pending::direct(name, async move { invoke(&handler, payload).await }))
    }

    /// Dispatch the operation through the store.
    ///
    /// The result is the namespace slice after the operation's outcome was
    /// merged, or the error it failed with.
    ///
    /// # Errors
    ///
    /// - [`ControllerError::UnknownOperation`] for undeclared names
    /// - [`ControllerError::NotConnected`] if no store manager mounted this controller
    /// - [`ControllerError::Dispatch`] if the store is gone
    pub fn dispatch(&self, name: &str, payload: impl Into<Value>) -> Result<Pending, ControllerError> {
        let operation = self.operation(name)?;
        let dispatcher = self.dispatcher().ok_or_else(|| ControllerError::NotConnected {
            controller: self.inner.component.clone(),
        })?;

        let kind = operation.dispatch.kind();
        let (id, rx) = self.inner.deferreds.allocate(kind, name);
        if let Err(err) = dispatcher.dispatch(operation.dispatch.action(payload).with_dispatch_id(Some(id))) {
            self.inner.deferreds.cancel(kind, id);
            return Err(err.into());
        }
        Ok(Pending::deferred(name, rx))
    }

    /// Dispatch when connected to a store, call directly otherwise.
    ///
    /// # Errors
    ///
    /// See [`Controller::dispatch`] and [`Controller::call_direct`].
    pub fn call(&self, name: &str, payload: impl Into<Value>) -> Result<Pending, ControllerError> {
        if self.is_bound() {
            self.dispatch(name, payload)
        } else {
            self.call_direct(name, payload)
        }
    }

    /// Every operation bound to the store.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::NotConnected`] if the controller is not connected.
    pub fn bound_operations(&self) -> Result<BoundOperations, ControllerError> {
        if !self.is_bound() {
            return Err(ControllerError::NotConnected {
                controller: self.inner.component.clone(),
            });
        }
        Ok(BoundOperations::new(
            self.inner
                .operations
                .keys()
                .map(|name| (name.clone(), BoundOperation::new(self.clone(), name.clone())))
                .collect(),
        ))
    }

    pub(crate) fn bind(&self, dispatcher: Dispatcher, default_policy: DeferredPolicy) {
        self.inner.deferreds.apply_default(default_policy);
        *self
            .inner
            .dispatcher
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(dispatcher);
    }

    pub(crate) fn rebind_state(&self, shared: Arc<RwLock<Slice>>) {
        self.inner.container.rebind(shared);
    }

    pub(crate) fn reset_state(&self, slice: Slice) {
        self.inner.container.write(slice);
    }
}

impl fmt::Display for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"Controller <{}>\"", self.inner.component.to_lowercase())
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("component", &self.inner.component)
            .field("namespace", &self.inner.namespace)
            .field("operations", &self.inner.operations.keys().collect::<Vec<_>>())
            .field("bound", &self.is_bound())
            .finish()
    }
}
