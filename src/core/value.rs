use std::fmt;
use chrono::{DateTime, Utc};
use crate::key::Key;

/// Storage-native property value of an entity record.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    /// Text stored outside the index (too long, or explicitly large).
    LongText(String),
    Blob(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Key(Key),
    List(Vec<Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Boolean(_) => "BOOLEAN",
            Self::Integer(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Text(_) => "TEXT",
            Self::LongText(_) => "LONG_TEXT",
            Self::Blob(_) => "BLOB",
            Self::Timestamp(_) => "TIMESTAMP",
            Self::Key(_) => "KEY",
            Self::List(_) => "LIST",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_key(&self) -> Option<&Key> {
        match self {
            Self::Key(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::LongText(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Values the datastore never indexes regardless of field metadata.
    pub fn is_always_unindexed(&self) -> bool {
        matches!(self, Self::LongText(_) | Self::Blob(_))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            // NaN compares equal to itself so change detection stays stable
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits() || a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::LongText(a), Self::LongText(b)) => a == b,
            (Self::Blob(a), Self::Blob(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::Key(a), Self::Key(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(fl) => write!(f, "{}", fl),
            Self::Text(s) => write!(f, "{}", s),
            Self::LongText(s) => write!(f, "<text: {} bytes>", s.len()),
            Self::Blob(b) => write!(f, "<blob: {} bytes>", b.len()),
            Self::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            Self::Key(k) => write!(f, "{}", k),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Key> for Value {
    fn from(k: Key) -> Self {
        Self::Key(k)
    }
}

impl From<Vec<Key>> for Value {
    fn from(keys: Vec<Key>) -> Self {
        Self::List(keys.into_iter().map(Self::Key).collect())
    }
}
