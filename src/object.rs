//! Runtime view of managed objects and their field values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::key::Key;

/// Identity of an in-flight managed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(Uuid);

impl ObjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to a managed object of a given class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub id: ObjectId,
    pub class: String,
}

impl ObjectRef {
    pub fn new(class: &str) -> Self {
        Self {
            id: ObjectId::new(),
            class: class.to_string(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.class, self.id)
    }
}

/// Value held by a field of a managed object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    DateTime(DateTime<Utc>),
    Key(Key),
    /// Change-tracking wrapper installed by the framework around collections.
    Tracked(Box<FieldValue>),
    List(Vec<FieldValue>),
    Object(ObjectRef),
    /// Field values of an embedded object, by embedded field position.
    Embedded(Vec<FieldValue>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn tracked(inner: FieldValue) -> Self {
        Self::Tracked(Box::new(inner))
    }

    /// Strips any change-tracking wrappers.
    pub fn unwrapped(&self) -> &FieldValue {
        let mut value = self;
        while let Self::Tracked(inner) = value {
            value = inner;
        }
        value
    }

    pub fn into_unwrapped(self) -> FieldValue {
        let mut value = self;
        while let Self::Tracked(inner) = value {
            value = *inner;
        }
        value
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self.unwrapped() {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Related objects held by a relation field, single or multi-valued.
    /// Null elements are skipped.
    pub fn related_objects(&self) -> Vec<&ObjectRef> {
        match self.unwrapped() {
            Self::Object(obj) => vec![obj],
            Self::List(items) => items.iter().filter_map(|item| item.as_object()).collect(),
            _ => Vec::new(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::DateTime(_) => "datetime",
            Self::Key(_) => "key",
            Self::Tracked(inner) => inner.type_name(),
            Self::List(_) => "list",
            Self::Object(_) => "object",
            Self::Embedded(_) => "embedded",
        }
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Key> for FieldValue {
    fn from(k: Key) -> Self {
        Self::Key(k)
    }
}

impl From<ObjectRef> for FieldValue {
    fn from(obj: ObjectRef) -> Self {
        Self::Object(obj)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}
