//! Action records and operation descriptors
//!
//! An [`Action`] is the plain `{type, payload}` record consumed by reducers.
//! An [`ActionDescriptor`] is the immutable identity of one operation: it
//! derives the wire type once, when it is created, and stamps out actions of
//! that type.
//!
//! Operations settle through a second, internal action whose payload follows
//! the completion convention (see [`Completion`]).

use crate::name::{convert_action_name, ConvertOptions};
use crate::value::{Slice, Value};
use serde::Serialize;

/// Suffix appended to an operation name to form its completion action.
pub const COMPLETION_SUFFIX: &str = "@@reducer";

/// Prefix used when a descriptor is derived from a raw handler.
pub const FETCH_ACTION_PREFIX: &str = "FETCH_";

/// Completion payload key holding the settled data or error
pub const DATA_KEY: &str = "__data";
/// Completion payload key reserved for the dispatch result handle
pub const DISPATCH_RESULT_KEY: &str = "__dispatchResult";
/// Completion payload key holding the raw operation name
pub const TYPE_KEY: &str = "__type";
/// Completion payload key holding the wire type of the operation
pub const ACTION_NAME_KEY: &str = "__actionName";

/// A dispatched action record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Action {
    /// Wire-level action type
    #[serde(rename = "type")]
    pub kind: String,
    /// Arbitrary payload
    pub payload: Value,
    /// Correlates an operation dispatch with its completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch_id: Option<u64>,
}

impl Action {
    /// Create an action with no correlation id.
    pub fn new(kind: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            kind: kind.into(),
            payload: payload.into(),
            dispatch_id: None,
        }
    }

    /// Attach (or clear) the correlation id.
    #[must_use]
    pub const fn with_dispatch_id(mut self, dispatch_id: Option<u64>) -> Self {
        self.dispatch_id = dispatch_id;
        self
    }
}

/// Where an [`ActionDescriptor`] takes its identity from.
#[derive(Debug, Clone, Copy)]
pub enum DescriptorSource<'a> {
    /// A plain action name, converted as-is
    Name(&'a str),
    /// A raw handler registered under `key`, owned by `owner`
    Handler {
        /// Logical key of the handler
        key: &'a str,
        /// Name of the owning controller, if any
        owner: Option<&'a str>,
    },
}

/// Immutable identity of one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDescriptor {
    key: String,
    name: String,
    kind: String,
    owner: Option<String>,
}

impl ActionDescriptor {
    /// Create a descriptor.
    ///
    /// - `Name(name)`: `kind` is `name` converted with default options, key is empty
    /// - `Handler { key, .. }`: `kind` is `"FETCH_" + key` converted without
    ///   lower-casing segment remainders
    #[must_use]
    pub fn create(source: DescriptorSource<'_>) -> Self {
        match source {
            DescriptorSource::Name(name) => Self {
                key: String::new(),
                name: name.to_string(),
                kind: convert_action_name(name, ConvertOptions::default()),
                owner: None,
            },
            DescriptorSource::Handler { key, owner } => {
                let kind = convert_action_name(
                    &format!("{FETCH_ACTION_PREFIX}{key}"),
                    ConvertOptions::preserve_rest(),
                );
                Self {
                    key: key.to_string(),
                    name: kind.clone(),
                    kind,
                    owner: owner.map(ToString::to_string),
                }
            },
        }
    }

    /// Shortcut for [`DescriptorSource::Name`]
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self::create(DescriptorSource::Name(name))
    }

    /// Shortcut for [`DescriptorSource::Handler`]
    #[must_use]
    pub fn from_handler(key: &str, owner: Option<&str>) -> Self {
        Self::create(DescriptorSource::Handler { key, owner })
    }

    /// Descriptor of the completion action paired with operation `name`.
    #[must_use]
    pub fn completion_of(name: &str) -> Self {
        Self::from_name(&format!("{name}{COMPLETION_SUFFIX}"))
    }

    /// Logical key (empty for name-derived descriptors)
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Raw name the descriptor was created from
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wire-level action type
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Owning controller, for handler-derived descriptors
    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Create an action of this type.
    pub fn action(&self, payload: impl Into<Value>) -> Action {
        Action::new(self.kind.clone(), payload)
    }
}

/// Payload of a completion action.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Settled data, or the error the operation failed with
    pub data: Value,
    /// Raw operation name (`__type`)
    pub initiator: String,
    /// Wire type of the operation (`__actionName`)
    pub action_name: String,
}

impl Completion {
    /// Completion for `operation` carrying `data`.
    pub fn new(operation: &ActionDescriptor, data: impl Into<Value>) -> Self {
        Self {
            data: data.into(),
            initiator: operation.name().to_string(),
            action_name: operation.kind().to_string(),
        }
    }

    /// Recognise the completion convention in an action payload.
    ///
    /// Requires a string `__type` and a `__data` entry; anything else is an
    /// externally authored payload and yields `None`.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let map = payload.as_object()?;
        let initiator = map.get(TYPE_KEY)?.as_str()?.to_string();
        let data = map.get(DATA_KEY)?.clone();
        let action_name = map
            .get(ACTION_NAME_KEY)
            .and_then(Value::as_str)
            .unwrap_or(initiator.as_str())
            .to_string();

        Some(Self {
            data,
            initiator,
            action_name,
        })
    }

    /// Encode into the payload convention.
    #[must_use]
    pub fn into_payload(self) -> Value {
        let mut map = Slice::new();
        map.insert(DATA_KEY.to_string(), self.data);
        map.insert(DISPATCH_RESULT_KEY.to_string(), Value::Null);
        map.insert(TYPE_KEY.to_string(), Value::String(self.initiator));
        map.insert(ACTION_NAME_KEY.to_string(), Value::String(self.action_name));
        Value::Object(map)
    }
}
