//! Store manager
//!
//! [`StoreManager::new`] turns a route table and a [`Registry`] into one
//! running store:
//!
//! 1. validate the routes and collect their controllers, first one per namespace
//! 2. fold in the registry's controllers
//! 3. merge the reducers of controllers sharing a namespace and point them at
//!    one shared slice
//! 4. combine every namespace into the root reducer and create the store
//! 5. connect every controller and start the watcher supervisor

use crate::config::StoreConfig;
use crate::controller::{BoundOperations, Controller, ViewProps};
use crate::error::{ManagerError, StoreError};
use crate::registry::Registry;
use crate::store::Store;
use crate::watcher::{Supervisor, Watcher};
use statewire_core::{ActionDescriptor, CombinedReducer, ReducerMap, RootState, Slice, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{watch, Mutex};

/// What a route mounts
#[derive(Clone, Debug)]
pub enum Mount {
    /// A controller, mounted under its namespace
    Controller(Controller),
    /// A plain view component, by name
    View(String),
}

/// One entry of the route table
#[derive(Clone, Debug)]
pub struct Route {
    /// Route path
    pub path: Option<String>,
    /// Mounted component
    pub component: Option<Mount>,
}

impl Route {
    /// Route mounting `controller` at `path`.
    pub fn controller(path: impl Into<String>, controller: Controller) -> Self {
        Self {
            path: Some(path.into()),
            component: Some(Mount::Controller(controller)),
        }
    }

    /// Route mounting the view `name` at `path`.
    pub fn view(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            component: Some(Mount::View(name.into())),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        let mut first = true;
        if let Some(path) = &self.path {
            write!(f, "\"path\":\"{path}\"")?;
            first = false;
        }
        if let Some(component) = &self.component {
            if !first {
                f.write_str(",")?;
            }
            match component {
                Mount::Controller(controller) => write!(f, "\"component\":{controller}")?,
                Mount::View(name) => write!(f, "\"component\":\"{name}\"")?,
            }
        }
        f.write_str("}")
    }
}

/// One store built from every mounted controller
pub struct StoreManager {
    store: Store<CombinedReducer>,
    supervisor: Mutex<Supervisor>,
    controllers: BTreeMap<String, Controller>,
    namespaces: BTreeMap<String, Vec<Controller>>,
    action_creators: BTreeMap<String, ActionDescriptor>,
    config: StoreConfig,
}

impl StoreManager {
    /// Build the store for `routes` plus everything mounted in `registry`.
    ///
    /// `initial_state` replaces the declared initial slice of every namespace
    /// it names.
    ///
    /// # Errors
    ///
    /// - [`ManagerError::MissingPath`] for a route without a path
    /// - [`ManagerError::MissingComponent`] for a route without a component
    /// - [`ManagerError::UnnamedComponent`] for a view mounted without a name
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[tracing::instrument(skip_all, name = "store_manager_new")]
    pub fn new(
        routes: Vec<Route>,
        registry: Registry,
        initial_state: Option<RootState>,
        config: StoreConfig,
    ) -> Result<Self, ManagerError> {
        let controllers = route_controllers(&routes)?;
        let parts = registry.into_parts();

        let mut namespaces = parts.namespaces;
        for (namespace, controller) in &controllers {
            let group = namespaces.entry(namespace.clone()).or_default();
            if group.iter().any(|mounted| mounted.ptr_eq(controller)) {
                continue;
            }
            // Merged with the registry's controllers either way
            if !group.is_empty() && !controller.has_explicit_namespace() {
                tracing::warn!(
                    namespace = %namespace,
                    "Duplicate declaration for component with name \"{namespace}\"."
                );
            }
            group.push(controller.clone());
        }

        let mut action_creators = BTreeMap::new();
        for controller in namespaces.values().flatten() {
            action_creators.extend(controller.action_creators());
        }
        action_creators.extend(parts.dispatchers);

        let root = CombinedReducer::new(
            namespaces
                .iter()
                .map(|(namespace, group)| (namespace.clone(), namespace_reducer(namespace, group))),
        );
        let mut state = root.initial_state();
        if let Some(preloaded) = initial_state {
            state.extend(preloaded);
        }
        sync_containers(&namespaces, &state);

        let store = Store::with_config(state, root, &config);
        for controller in namespaces.values().flatten() {
            controller.bind(store.dispatcher(), config.deferred_policy);
        }

        let mut watchers: Vec<Watcher> = parts.watchers;
        let mut watched: BTreeSet<u64> = parts.watched;
        for controller in controllers.values() {
            if watched.insert(controller.id()) {
                watchers.extend(controller.watchers());
            }
        }
        let supervisor = Supervisor::start(&store, watchers);

        tracing::info!(
            namespaces = namespaces.len(),
            watchers = supervisor.len(),
            "Store manager ready"
        );

        Ok(Self {
            store,
            supervisor: Mutex::new(supervisor),
            controllers,
            namespaces,
            action_creators,
            config,
        })
    }

    /// The underlying store
    #[must_use]
    pub const fn store(&self) -> &Store<CombinedReducer> {
        &self.store
    }

    /// Route controllers, by namespace
    #[must_use]
    pub const fn controllers(&self) -> &BTreeMap<String, Controller> {
        &self.controllers
    }

    /// The route controller mounted under `namespace`
    #[must_use]
    pub fn controller(&self, namespace: &str) -> Option<&Controller> {
        self.controllers.get(namespace)
    }

    /// Every namespace in the root state
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespaces.keys().map(String::as_str)
    }

    /// Every action creator, by action type
    #[must_use]
    pub const fn action_creators(&self) -> &BTreeMap<String, ActionDescriptor> {
        &self.action_creators
    }

    /// Dispatch an action through the creator registered for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::UnknownAction`] if no creator exists.
    pub fn dispatch_action(&self, kind: &str, payload: impl Into<Value>) -> Result<(), ManagerError> {
        let creator = self
            .action_creators
            .get(kind)
            .ok_or_else(|| ManagerError::UnknownAction(kind.to_string()))?;
        self.store.dispatch(creator.action(payload));
        Ok(())
    }

    /// Props for the view mounted with `controller`.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Controller`] if the controller is not connected.
    pub fn render_props(&self, controller: &Controller) -> Result<ViewProps, ManagerError> {
        let operations: BoundOperations = controller.bound_operations()?;
        let values = self.store.state(|state| controller.props(state));
        Ok(ViewProps { values, operations })
    }

    /// Change counter views re-render from
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.store.subscribe()
    }

    /// Current root state
    #[must_use]
    pub fn snapshot(&self) -> RootState {
        self.store.snapshot()
    }

    /// Current root state as JSON, for inspection tools
    #[must_use]
    pub fn snapshot_json(&self) -> serde_json::Value {
        self.store
            .state(|state: &RootState| serde_json::to_value(state))
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "Failed to serialize root state");
                serde_json::Value::Null
            })
    }

    /// Dispatch the halt signal; watchers drain and stop.
    pub fn close(&self) {
        self.store.close();
    }

    /// Close the store and wait for every watcher to stop.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownTimeout`] if watchers are still running
    /// after `timeout` (default: the configured shutdown timeout).
    pub async fn shutdown(&self, timeout: Option<Duration>) -> Result<(), StoreError> {
        tracing::info!("Initiating graceful shutdown");
        self.close();
        self.supervisor
            .lock()
            .await
            .join(timeout.unwrap_or(self.config.shutdown_timeout))
            .await
    }
}

impl fmt::Debug for StoreManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreManager")
            .field("namespaces", &self.namespaces.keys().collect::<Vec<_>>())
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

fn route_controllers(routes: &[Route]) -> Result<BTreeMap<String, Controller>, ManagerError> {
    let mut controllers = BTreeMap::new();
    for route in routes {
        let path = match route.path.as_deref() {
            Some(path) if !path.is_empty() => path,
            _ => {
                return Err(ManagerError::MissingPath {
                    entry: route.to_string(),
                })
            },
        };
        match &route.component {
            None => {
                return Err(ManagerError::MissingComponent {
                    path: path.to_string(),
                })
            },
            Some(Mount::View(name)) if name.trim().is_empty() => {
                return Err(ManagerError::UnnamedComponent {
                    path: path.to_string(),
                })
            },
            Some(Mount::View(_)) => {},
            Some(Mount::Controller(controller)) => {
                controllers
                    .entry(controller.namespace().to_string())
                    .or_insert_with(|| controller.clone());
            },
        }
    }
    Ok(controllers)
}

fn namespace_reducer(namespace: &str, group: &[Controller]) -> ReducerMap {
    match group {
        [single] => single.reducer().clone(),
        _ => {
            tracing::debug!(namespace, controllers = group.len(), "Merging controllers into one namespace");
            group.iter().fold(ReducerMap::default(), |mut merged, controller| {
                for kind in shadowed_kinds(&merged, controller.reducer()) {
                    tracing::warn!(
                        namespace,
                        kind,
                        controller = controller.component_name(),
                        "Completion reducer replaced by a later controller; earlier callers of this operation will not settle"
                    );
                }
                merged.merge(controller.reducer());
                merged
            })
        },
    }
}

/// Action types `incoming` handles that `merged` already does.
fn shadowed_kinds<'a>(merged: &ReducerMap, incoming: &'a ReducerMap) -> Vec<&'a str> {
    incoming.kinds().filter(|kind| merged.handles(kind)).collect()
}

/// Point every controller's live slice at the store's initial slice,
/// sharing one cell between controllers of the same namespace.
fn sync_containers(namespaces: &BTreeMap<String, Vec<Controller>>, state: &RootState) {
    for (namespace, group) in namespaces {
        let slice = state.get(namespace).cloned().unwrap_or_else(Slice::new);
        match group.as_slice() {
            [single] => single.reset_state(slice),
            _ => {
                let shared = Arc::new(RwLock::new(slice));
                for controller in group {
                    controller.rebind_state(Arc::clone(&shared));
                }
            },
        }
    }
}
