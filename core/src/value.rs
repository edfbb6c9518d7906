//! Dynamic values held in namespace slices
//!
//! A namespace slice maps declared state keys to [`Value`]s. Values are JSON
//! shaped, with one addition: [`Value::Error`] carries an [`ErrorValue`] so an
//! operation failure can live in the store (`lastThrownError`, `lastError`)
//! next to ordinary data.

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// State of one namespace: declared key → current value.
pub type Slice = BTreeMap<String, Value>;

/// Whole store state: namespace → slice.
pub type RootState = BTreeMap<String, Slice>;

/// Errors raised when a [`Value`] has the wrong shape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// An object was required
    #[error("Passed value must be an object: {found} given.")]
    NotAnObject {
        /// Shape that was found instead
        found: &'static str,
    },
}

/// A dynamically typed state value.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent / null
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// Number
    Number(serde_json::Number),
    /// String
    String(String),
    /// Array
    Array(Vec<Value>),
    /// Object (same shape as a slice)
    Object(Slice),
    /// An error carried as data
    Error(ErrorValue),
}

impl Value {
    /// Build an object value from key/value pairs.
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Build an empty array value.
    #[must_use]
    pub const fn empty_array() -> Self {
        Self::Array(Vec::new())
    }

    /// Name of the variant, used in error messages
    #[must_use]
    pub const fn shape(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Error(_) => "error",
        }
    }

    /// Whether this is [`Value::Null`]
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether this is [`Value::Error`]
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Truthiness: `null`, `false`, `0` and `""` are falsy, everything else truthy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
            Self::String(s) => !s.is_empty(),
            Self::Array(_) | Self::Object(_) | Self::Error(_) => true,
        }
    }

    /// Borrow the error, if this is one.
    #[must_use]
    pub const fn as_error(&self) -> Option<&ErrorValue> {
        match self {
            Self::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Borrow the object, if this is one.
    #[must_use]
    pub const fn as_object(&self) -> Option<&Slice> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Borrow the string, if this is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Look up a key on an object value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Convert into an object.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::NotAnObject`] for every other shape.
    pub fn into_object(self) -> Result<Slice, ValueError> {
        match self {
            Self::Object(map) => Ok(map),
            other => Err(ValueError::NotAnObject {
                found: other.shape(),
            }),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from).collect())
            },
            serde_json::Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            },
        }
    }
}

impl From<ErrorValue> for Value {
    fn from(err: ErrorValue) -> Self {
        Self::Error(err)
    }
}

impl From<Slice> for Value {
    fn from(map: Slice) -> Self {
        Self::Object(map)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(items)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

/// The data behind an [`ErrorValue`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    /// Human readable message
    pub message: String,
    /// Extra own fields (`statusCode`, ...)
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
    /// Raw name of the operation that produced the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiator: Option<String>,
}

/// A shared error instance.
///
/// Clones share the same instance; [`ErrorValue::same`] tells instances apart,
/// while `==` compares contents.
#[derive(Debug, Clone)]
pub struct ErrorValue(Arc<ErrorRecord>);

impl ErrorValue {
    /// Create an error with a message and no extra fields.
    pub fn new(message: impl Into<String>) -> Self {
        Self(Arc::new(ErrorRecord {
            message: message.into(),
            fields: serde_json::Map::new(),
            initiator: None,
        }))
    }

    /// Capture any std error by its display message.
    #[must_use]
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        Self::new(err.to_string())
    }

    /// Attach an extra field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Arc::make_mut(&mut self.0)
            .fields
            .insert(key.into(), value.into());
        self
    }

    /// The error message
    #[must_use]
    pub fn message(&self) -> &str {
        &self.0.message
    }

    /// Raw name of the operation that produced this error, once tagged
    #[must_use]
    pub fn initiator(&self) -> Option<&str> {
        self.0.initiator.as_deref()
    }

    /// Look up an extra field.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.fields.get(key)
    }

    /// The full record
    #[must_use]
    pub fn record(&self) -> &ErrorRecord {
        &self.0
    }

    /// Whether both handles point at the same instance.
    #[must_use]
    pub fn same(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// A fresh instance with the same message and fields, tagged with `initiator`.
    #[must_use]
    pub fn tagged(&self, initiator: Option<&str>) -> Self {
        Self(Arc::new(ErrorRecord {
            message: self.0.message.clone(),
            fields: self.0.fields.clone(),
            initiator: initiator.map(ToString::to_string),
        }))
    }
}

impl PartialEq for ErrorValue {
    fn eq(&self, other: &Self) -> bool {
        Self::same(self, other) || self.0 == other.0
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.message)
    }
}

impl std::error::Error for ErrorValue {}

impl Serialize for ErrorValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.as_ref().serialize(serializer)
    }
}
