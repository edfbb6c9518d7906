//! Operations bound to a running store, as handed to views

use super::deferred::Pending;
use super::Controller;
use crate::error::ControllerError;
use statewire_core::{Slice, Value};
use std::collections::BTreeMap;
use std::fmt;

/// One operation of a connected controller
#[derive(Clone)]
pub struct BoundOperation {
    controller: Controller,
    name: String,
}

impl BoundOperation {
    pub(crate) const fn new(controller: Controller, name: String) -> Self {
        Self { controller, name }
    }

    /// Operation name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dispatch the operation.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::NotConnected`] once the store is gone.
    pub fn call(&self, payload: impl Into<Value>) -> Result<Pending, ControllerError> {
        self.controller.dispatch(&self.name, payload)
    }
}

impl fmt::Debug for BoundOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundOperation")
            .field("controller", &self.controller.component_name())
            .field("name", &self.name)
            .finish()
    }
}

/// Every operation of a connected controller, by name
#[derive(Clone, Debug, Default)]
pub struct BoundOperations {
    operations: BTreeMap<String, BoundOperation>,
}

impl BoundOperations {
    pub(crate) const fn new(operations: BTreeMap<String, BoundOperation>) -> Self {
        Self { operations }
    }

    /// Look up an operation.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&BoundOperation> {
        self.operations.get(name)
    }

    /// Dispatch operation `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::UnknownOperation`] for undeclared names, or
    /// any error from [`BoundOperation::call`].
    pub fn call(&self, name: &str, payload: impl Into<Value>) -> Result<Pending, ControllerError> {
        match self.operations.get(name) {
            Some(operation) => operation.call(payload),
            None => Err(ControllerError::UnknownOperation {
                controller: self
                    .operations
                    .values()
                    .next()
                    .map(|op| op.controller.component_name().to_string())
                    .unwrap_or_default(),
                operation: name.to_string(),
            }),
        }
    }

    /// Operation names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }

    /// Number of operations
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether there are no operations
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// What a mounted view receives: derived values plus bound operations
#[derive(Clone, Debug)]
pub struct ViewProps {
    /// Declared state keys evaluated against the namespace slice
    pub values: Slice,
    /// The controller's operations
    pub operations: BoundOperations,
}
