//! # Statewire Runtime
//!
//! Runtime that binds controllers to one shared, namespaced state store.
//!
//! ## Core Components
//!
//! - **Controller**: declares operations and state; every operation gets a
//!   dispatch action, a completion action, a completion reducer and a watcher
//! - **Store**: single-writer store; reducers are the only writers
//! - **Supervisor**: runs every watcher as its own task
//! - **Registry**: controllers mounted before a manager exists
//! - **`StoreManager`**: merges controllers into namespaces, builds the root
//!   reducer and store, starts the supervisor
//!
//! ## Data Flow
//!
//! ```text
//! controller.dispatch("fetchApps", payload)
//!     │
//!     ▼
//! Store ──► watcher("fetchApps") ──► operation body (async)
//!                                         │
//!     ┌───────────────────────────────────┘
//!     ▼
//! Store ◄── "fetchApps@@reducer" { __data, __type, __actionName }
//!     │
//!     ├─► completion reducer merges the namespace slice
//!     └─► the caller's `Pending` resolves (or rejects)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use statewire_core::Value;
//! use statewire_runtime::{Controller, Registry, Route, StateSpec, StoreConfig, StoreManager};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let controller = Controller::builder("AppContainer")
//!     .namespace("components")
//!     .operation_sync("otherAction", |_payload| {
//!         Ok(Value::object([("testProp", Value::from("something"))]))
//!     })
//!     .state(StateSpec::new().derive("testProp", |s| {
//!         s.get("testProp").cloned().unwrap_or_default()
//!     }))
//!     .build()?;
//!
//! let manager = StoreManager::new(
//!     vec![Route::controller("/", controller.clone())],
//!     Registry::default(),
//!     None,
//!     StoreConfig::default(),
//! )?;
//!
//! let merged = controller.dispatch("otherAction", Value::Null)?.await?;
//! assert_eq!(merged.get("testProp"), Some(&Value::from("something")));
//! manager.shutdown(None).await?;
//! # Ok(())
//! # }
//! ```

/// Store configuration
pub mod config;

/// Controllers: operation registration, state declaration, deferred results
pub mod controller;

/// Store manager: aggregation of controllers into one store
pub mod manager;

/// Prometheus metrics for observability
pub mod metrics;

/// Registry of controllers mounted ahead of a store manager
pub mod registry;

/// The single-writer store primitive
pub mod store;

/// Watcher processes and their supervisor
pub mod watcher;

/// Error types for the runtime
pub mod error {
    use statewire_core::{ErrorValue, ValueError};
    use thiserror::Error;

    /// Errors raised by the store and its supervisor
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// The store behind a dispatcher has been dropped
        #[error("Store has been released")]
        Released,

        /// Shutdown timed out waiting for watchers to wind down
        #[error("Shutdown timed out with {0} watchers still running")]
        ShutdownTimeout(usize),
    }

    /// Errors raised while building or using a controller
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum ControllerError {
        /// The controller was given no component name
        #[error("View component is not defined.")]
        UndefinedComponent,

        /// A state declaration was not a mapping
        #[error(transparent)]
        InvalidArgument(#[from] ValueError),

        /// No operation with this name is declared
        #[error("Controller <{controller}> has no operation named \"{operation}\"")]
        UnknownOperation {
            /// Controller component name
            controller: String,
            /// Requested operation
            operation: String,
        },

        /// The controller is not mounted in a running store
        #[error("Controller <{controller}> is not connected to a store")]
        NotConnected {
            /// Controller component name
            controller: String,
        },

        /// The store rejected the dispatch
        #[error("Dispatch failed: {0}")]
        Dispatch(#[from] StoreError),
    }

    /// How a pending operation failed
    #[derive(Error, Debug, Clone, PartialEq)]
    pub enum OperationError {
        /// The operation body failed; this is the error stored in `lastThrownError`
        #[error("{0}")]
        Failed(ErrorValue),

        /// A newer dispatch of the same operation took over the result slot
        #[error("Operation \"{operation}\" was superseded by a newer dispatch")]
        Superseded {
            /// Operation name
            operation: String,
        },

        /// The result slot was dropped before the operation settled
        #[error("Operation \"{operation}\" was abandoned before it settled")]
        Abandoned {
            /// Operation name
            operation: String,
        },
    }

    impl OperationError {
        /// The operation's own error, when it failed by itself
        #[must_use]
        pub const fn as_failure(&self) -> Option<&ErrorValue> {
            match self {
                Self::Failed(err) => Some(err),
                _ => None,
            }
        }
    }

    /// Errors raised while assembling a store manager
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum ManagerError {
        /// A route entry has no path
        #[error("Route entry is missing the path property. Received: {entry}")]
        MissingPath {
            /// Rendering of the offending entry
            entry: String,
        },

        /// A route entry has no component
        #[error("Route \"{path}\" needs a component property which is either a view component or a Controller instance.")]
        MissingComponent {
            /// Path of the offending entry
            path: String,
        },

        /// A mounted view component has no name
        #[error("Route \"{path}\": components must have a name property defined.")]
        UnnamedComponent {
            /// Path of the offending entry
            path: String,
        },

        /// No action creator with this name exists
        #[error("No action creator named \"{0}\"")]
        UnknownAction(String),

        /// A controller operation failed
        #[error(transparent)]
        Controller(#[from] ControllerError),

        /// The store failed
        #[error(transparent)]
        Store(#[from] StoreError),
    }
}

pub use config::{ConfigError, StoreConfig};
pub use controller::{
    BoundOperation, BoundOperations, Controller, ControllerBuilder, DeferredPolicy, Pending,
    StateSpec, ViewProps,
};
pub use error::{ControllerError, ManagerError, OperationError, StoreError};
pub use manager::{Mount, Route, StoreManager};
pub use registry::Registry;
pub use store::{Dispatcher, Store, END_ACTION};
pub use watcher::{Supervisor, Watcher};
