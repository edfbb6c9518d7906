//! State declaration and the live namespace slice

use crate::error::ControllerError;
use statewire_core::{Slice, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Key of the automatically declared error entry
pub const LAST_THROWN_ERROR: &str = "lastThrownError";
/// Key whose error value gets tagged with the operation that returned it
pub const LAST_ERROR: &str = "lastError";

/// Computes one declared value from the namespace slice.
pub type ValueFn = Arc<dyn Fn(&Slice) -> Value + Send + Sync>;

#[derive(Clone)]
enum StateEntry {
    Derived(ValueFn),
    Constant(Value),
}

/// Ordered declaration of a controller's state keys
///
/// Each key is either derived from the namespace slice or a constant. The
/// initial value of a key is computed against the entries declared before it.
///
/// ```
/// use statewire_core::Value;
/// use statewire_runtime::StateSpec;
///
/// let spec = StateSpec::new()
///     .constant("currentApps", Value::empty_array())
///     .derive("appCount", |s| match s.get("currentApps") {
///         Some(Value::Array(apps)) => Value::from(apps.len() as i64),
///         _ => Value::from(0),
///     });
/// assert_eq!(spec.keys().collect::<Vec<_>>(), ["currentApps", "appCount"]);
/// ```
#[derive(Clone, Default)]
pub struct StateSpec {
    entries: Vec<(String, StateEntry)>,
}

impl StateSpec {
    /// Empty declaration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `key` as computed from the namespace slice.
    #[must_use]
    pub fn derive<F>(mut self, key: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Slice) -> Value + Send + Sync + 'static,
    {
        self.entries.push((key.into(), StateEntry::Derived(Arc::new(f))));
        self
    }

    /// Declare `key` as a constant.
    #[must_use]
    pub fn constant(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.push((key.into(), StateEntry::Constant(value.into())));
        self
    }

    /// Declaration where every entry of `value` becomes a constant.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::InvalidArgument`] if `value` is not an object.
    pub fn from_value(value: Value) -> Result<Self, ControllerError> {
        let entries = value
            .into_object()?
            .into_iter()
            .map(|(key, value)| (key, StateEntry::Constant(value)))
            .collect();
        Ok(Self { entries })
    }

    /// Declared keys, in declaration order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    fn declares(&self, key: &str) -> bool {
        self.entries.iter().any(|(declared, _)| declared == key)
    }
}

impl fmt::Debug for StateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateSpec")
            .field("keys", &self.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Selectors and initial slice produced from a controller's declarations
#[derive(Clone, Default)]
pub(crate) struct DeclaredState {
    pub(crate) selectors: BTreeMap<String, ValueFn>,
    pub(crate) initial: Slice,
}

impl DeclaredState {
    /// Fold every declaration in order, adding the automatic
    /// `lastThrownError` entry unless one was declared.
    pub(crate) fn from_specs(specs: Vec<StateSpec>) -> Self {
        let mut declared = Self::default();
        let has_thrown_error = specs.iter().any(|spec| spec.declares(LAST_THROWN_ERROR));

        for spec in specs {
            for (key, entry) in spec.entries {
                declared.declare(key, entry);
            }
        }
        if !has_thrown_error {
            declared.declare(
                LAST_THROWN_ERROR.to_string(),
                StateEntry::Derived(Arc::new(|slice: &Slice| {
                    slice
                        .get(LAST_THROWN_ERROR)
                        .filter(|value| value.is_truthy())
                        .cloned()
                        .unwrap_or_default()
                })),
            );
        }
        declared
    }

    fn declare(&mut self, key: String, entry: StateEntry) {
        let value_fn: ValueFn = match entry {
            StateEntry::Derived(f) => f,
            StateEntry::Constant(Value::Object(map)) if map.is_empty() => {
                tracing::trace!(key, "Skipping empty mapping in state declaration");
                return;
            },
            StateEntry::Constant(value) => Arc::new(move |_: &Slice| value.clone()),
        };
        let initial = value_fn(&self.initial);
        self.initial.insert(key.clone(), initial);
        self.selectors.insert(key, value_fn);
    }

    /// Props for a view: every selector evaluated against `slice`.
    pub(crate) fn props(&self, slice: &Slice) -> Slice {
        self.selectors
            .iter()
            .map(|(key, select)| (key.clone(), select(slice)))
            .collect()
    }
}

/// The live namespace slice as seen by a controller
///
/// Written by the controller's completion reducers. Controllers sharing a
/// namespace are rebound to one shared cell.
pub(crate) struct StateContainer {
    cell: RwLock<Arc<RwLock<Slice>>>,
}

impl StateContainer {
    pub(crate) fn new(initial: Slice) -> Self {
        Self {
            cell: RwLock::new(Arc::new(RwLock::new(initial))),
        }
    }

    fn current(&self) -> Arc<RwLock<Slice>> {
        Arc::clone(&self.cell.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn read(&self) -> Slice {
        self.current()
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn get(&self, key: &str) -> Option<Value> {
        self.current()
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub(crate) fn write(&self, slice: Slice) {
        *self.current().write().unwrap_or_else(PoisonError::into_inner) = slice;
    }

    /// Point this container at `shared`.
    pub(crate) fn rebind(&self, shared: Arc<RwLock<Slice>>) {
        *self.cell.write().unwrap_or_else(PoisonError::into_inner) = shared;
    }
}
