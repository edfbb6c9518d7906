//! Controllers mounted ahead of a store manager
//!
//! A [`Registry`] collects controllers mounted outside the route table,
//! along with their watchers and extra action creators. It is consumed by
//! [`StoreManager::new`](crate::StoreManager::new), so nothing carries over
//! from one manager to the next.

use crate::controller::Controller;
use crate::watcher::Watcher;
use statewire_core::ActionDescriptor;
use std::collections::{BTreeMap, BTreeSet};

/// Mounted controllers, watchers and action creators
#[derive(Debug, Default)]
pub struct Registry {
    namespaces: BTreeMap<String, Vec<Controller>>,
    watchers: Vec<Watcher>,
    watched: BTreeSet<u64>,
    dispatchers: BTreeMap<String, ActionDescriptor>,
}

/// What a store manager takes out of a [`Registry`]
pub(crate) struct RegistryParts {
    pub(crate) namespaces: BTreeMap<String, Vec<Controller>>,
    pub(crate) watchers: Vec<Watcher>,
    pub(crate) watched: BTreeSet<u64>,
    pub(crate) dispatchers: BTreeMap<String, ActionDescriptor>,
}

impl Registry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount `controller` under `name`.
    ///
    /// Controllers with an explicit namespace are grouped under it, so several
    /// can share one slice. Otherwise the lower-cased `name` is the namespace
    /// and a later controller replaces an earlier one, with a warning.
    pub fn add_reducer(&mut self, name: &str, controller: &Controller) {
        if controller.has_explicit_namespace() {
            let group = self
                .namespaces
                .entry(controller.namespace().to_string())
                .or_default();
            if !group.iter().any(|mounted| mounted.ptr_eq(controller)) {
                group.push(controller.clone());
            }
            return;
        }

        let name = name.to_lowercase();
        if let Some(existing) = self.namespaces.get(&name) {
            if !existing.iter().any(|mounted| mounted.ptr_eq(controller)) {
                tracing::warn!(namespace = %name, "Duplicate declaration for component with name \"{name}\".");
            }
        }
        self.namespaces.insert(name, vec![controller.clone()]);
    }

    /// Register every watcher of `controller`, once per controller.
    pub fn add_watchers(&mut self, controller: &Controller) {
        if self.watched.insert(controller.id()) {
            self.watchers.extend(controller.watchers());
        }
    }

    /// Register a watcher that belongs to no controller.
    pub fn add_watcher(&mut self, watcher: Watcher) {
        self.watchers.push(watcher);
    }

    /// Publish an action creator under `kind`; the latest one wins.
    pub fn register_dispatcher(&mut self, kind: impl Into<String>, descriptor: ActionDescriptor) {
        self.dispatchers.insert(kind.into(), descriptor);
    }

    /// Mounted namespaces
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespaces.keys().map(String::as_str)
    }

    /// Whether nothing has been registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty() && self.watchers.is_empty() && self.dispatchers.is_empty()
    }

    pub(crate) fn into_parts(self) -> RegistryParts {
        RegistryParts {
            namespaces: self.namespaces,
            watchers: self.watchers,
            watched: self.watched,
            dispatchers: self.dispatchers,
        }
    }
}
