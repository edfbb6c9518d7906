//! Reducers and reducer composition
//!
//! - [`Reducer`]: the single-writer contract, `(state, action) → state`
//! - [`ReducerMap`]: one namespace, action type → slice reducer function
//! - [`CombinedReducer`]: every namespace, each action routed to every slice
//!
//! # Example
//!
//! ```
//! use statewire_core::{Action, Reducer, ReducerMap, CombinedReducer, Slice, Value};
//! use std::sync::Arc;
//!
//! let mut counter = ReducerMap::new(Slice::from([("count".to_string(), Value::from(0))]));
//! counter.insert("increment", Arc::new(|state: &Slice, _action: &Action| {
//!     let mut next = state.clone();
//!     next.insert("count".into(), Value::from(1));
//!     next
//! }));
//!
//! let root = CombinedReducer::new([("counter".to_string(), counter)]);
//! let mut state = root.initial_state();
//! root.reduce(&mut state, &Action::new("increment", Value::Null));
//! assert_eq!(state["counter"]["count"], Value::from(1));
//! ```

use crate::action::Action;
use crate::value::{RootState, Slice};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// The Reducer trait - the only code path allowed to write state
///
/// Reducers run synchronously while the store holds its write lock, so they
/// must not block or dispatch.
pub trait Reducer: Send + Sync {
    /// The state type this reducer operates on
    type State;

    /// The action type this reducer processes
    type Action;

    /// Apply `action` to `state` in place.
    fn reduce(&self, state: &mut Self::State, action: &Self::Action);
}

/// Reducer function for one action type within a namespace.
pub type SliceReducerFn = Arc<dyn Fn(&Slice, &Action) -> Slice + Send + Sync>;

/// Per-namespace reducer: action type → [`SliceReducerFn`], with an initial slice.
///
/// Actions whose type has no entry leave the slice untouched.
#[derive(Clone, Default)]
pub struct ReducerMap {
    handlers: BTreeMap<String, SliceReducerFn>,
    initial: Slice,
}

impl ReducerMap {
    /// Create an empty map seeded with `initial`.
    #[must_use]
    pub const fn new(initial: Slice) -> Self {
        Self {
            handlers: BTreeMap::new(),
            initial,
        }
    }

    /// Register (or replace) the handler for `kind`.
    pub fn insert(&mut self, kind: impl Into<String>, handler: SliceReducerFn) {
        self.handlers.insert(kind.into(), handler);
    }

    /// Whether a handler is registered for `kind`
    #[must_use]
    pub fn handles(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Registered action types
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// The initial slice
    #[must_use]
    pub const fn initial(&self) -> &Slice {
        &self.initial
    }

    /// Replace the initial slice.
    pub fn set_initial(&mut self, initial: Slice) {
        self.initial = initial;
    }

    /// Fold `other` into `self`: its handlers replace ours for the same type,
    /// and its initial entries overwrite ours key by key.
    pub fn merge(&mut self, other: &Self) {
        for (kind, handler) in &other.handlers {
            self.handlers.insert(kind.clone(), Arc::clone(handler));
        }
        for (key, value) in &other.initial {
            self.initial.insert(key.clone(), value.clone());
        }
    }
}

impl fmt::Debug for ReducerMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReducerMap")
            .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
            .field("initial", &self.initial)
            .finish()
    }
}

impl Reducer for ReducerMap {
    type State = Slice;
    type Action = Action;

    fn reduce(&self, state: &mut Slice, action: &Action) {
        if let Some(handler) = self.handlers.get(&action.kind) {
            *state = handler(state, action);
        }
    }
}

/// Root reducer routing every action to every namespace's [`ReducerMap`].
#[derive(Clone, Debug, Default)]
pub struct CombinedReducer {
    namespaces: BTreeMap<String, ReducerMap>,
}

impl CombinedReducer {
    /// Combine namespace reducers.
    pub fn new<I>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = (String, ReducerMap)>,
    {
        Self {
            namespaces: namespaces.into_iter().collect(),
        }
    }

    /// Root state made of every namespace's initial slice.
    #[must_use]
    pub fn initial_state(&self) -> RootState {
        self.namespaces
            .iter()
            .map(|(name, map)| (name.clone(), map.initial().clone()))
            .collect()
    }

    /// Namespace names
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespaces.keys().map(String::as_str)
    }

    /// The reducer of one namespace
    #[must_use]
    pub fn namespace(&self, name: &str) -> Option<&ReducerMap> {
        self.namespaces.get(name)
    }
}

impl Reducer for CombinedReducer {
    type State = RootState;
    type Action = Action;

    fn reduce(&self, state: &mut RootState, action: &Action) {
        for (name, reducer) in &self.namespaces {
            if !reducer.handles(&action.kind) {
                continue;
            }
            let slice = state
                .entry(name.clone())
                .or_insert_with(|| reducer.initial().clone());
            reducer.reduce(slice, action);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn setter(key: &'static str) -> SliceReducerFn {
        Arc::new(move |state: &Slice, action: &Action| {
            let mut next = state.clone();
            next.insert(key.to_string(), action.payload.clone());
            next
        })
    }

    #[test]
    fn unknown_kinds_leave_slice_untouched() {
        let map = ReducerMap::new(Slice::from([("a".to_string(), Value::from(1))]));
        let mut slice = map.initial().clone();
        map.reduce(&mut slice, &Action::new("other", Value::from(2)));
        assert_eq!(slice["a"], Value::from(1));
    }

    #[test]
    fn merge_is_later_wins() {
        let mut first = ReducerMap::new(Slice::from([
            ("a".to_string(), Value::from(1)),
            ("b".to_string(), Value::from(1)),
        ]));
        first.insert("set", setter("first"));

        let mut second = ReducerMap::new(Slice::from([("b".to_string(), Value::from(2))]));
        second.insert("set", setter("second"));
        second.insert("only", setter("only"));

        first.merge(&second);
        assert_eq!(first.initial()["a"], Value::from(1));
        assert_eq!(first.initial()["b"], Value::from(2));

        let mut slice = first.initial().clone();
        first.reduce(&mut slice, &Action::new("set", Value::from(9)));
        assert_eq!(slice.get("second"), Some(&Value::from(9)));
        assert_eq!(slice.get("first"), None);
        assert!(first.handles("only"));
    }

    #[test]
    fn combined_routes_to_every_namespace_handling_the_kind() {
        let mut left = ReducerMap::default();
        left.insert("ping", setter("left"));
        let mut right = ReducerMap::default();
        right.insert("ping", setter("right"));
        let quiet = ReducerMap::new(Slice::from([("q".to_string(), Value::Null)]));

        let root = CombinedReducer::new([
            ("left".to_string(), left),
            ("right".to_string(), right),
            ("quiet".to_string(), quiet),
        ]);
        let mut state = root.initial_state();
        assert_eq!(state.len(), 3);

        root.reduce(&mut state, &Action::new("ping", Value::from(true)));
        assert_eq!(state["left"]["left"], Value::from(true));
        assert_eq!(state["right"]["right"], Value::from(true));
        assert_eq!(state["quiet"].len(), 1);
    }
}
