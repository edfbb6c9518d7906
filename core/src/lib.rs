//! # Statewire Core
//!
//! Core types for binding controllers to one shared, namespaced state store.
//!
//! This crate holds the pure, synchronous half of the system:
//!
//! - **Name conversion**: `FETCH_APPS` → `fetchApps` wire tags ([`name`])
//! - **Values**: dynamic slice values, including errors carried as data ([`value`])
//! - **Actions**: `{type, payload}` records, operation descriptors and the
//!   completion payload convention ([`action`])
//! - **Reducers**: the single-writer contract plus per-namespace and root
//!   composition ([`reducer`])
//!
//! The runtime crate builds controllers, watchers and the store on top of these.
//!
//! ## Example
//!
//! ```
//! use statewire_core::{ActionDescriptor, Completion, Value};
//!
//! let fetch = ActionDescriptor::from_name("fetchApps");
//! let done = ActionDescriptor::completion_of("fetchApps");
//! assert_eq!(done.kind(), "fetchApps@@reducer");
//!
//! let completion = done.action(Completion::new(&fetch, Value::Null).into_payload());
//! assert!(Completion::from_payload(&completion.payload).is_some());
//! ```

pub mod action;
pub mod name;
pub mod reducer;
pub mod value;

pub use action::{Action, ActionDescriptor, Completion, DescriptorSource};
pub use name::{convert_action_name, should_convert, ConvertOptions};
pub use reducer::{CombinedReducer, Reducer, ReducerMap, SliceReducerFn};
pub use value::{ErrorRecord, ErrorValue, RootState, Slice, Value, ValueError};
