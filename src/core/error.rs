use std::fmt;
use thiserror::Error;

/// Which piece of metadata forbade a null value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullRule {
    /// Field-level null-value policy set to "exception".
    Field,
    /// Column explicitly declared not-nullable.
    Column,
}

impl fmt::Display for NullRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field => write!(f, "it is mandatory in the field metadata"),
            Self::Column => write!(f, "the column is specified as not-nullable"),
        }
    }
}

#[derive(Error, Debug)]
pub enum MapperError {
    #[error("Conflicting key assignment: {0}")]
    ConflictingKeyAssignment(String),

    #[error("Attempt was made to modify the primary key of an object of type {class} identified by key {current}. Primary keys are immutable (new value: {attempted})")]
    ImmutableKey {
        class: String,
        current: String,
        attempted: String,
    },

    #[error("Attempt was made to modify the parent of an object of type {class} identified by key {current}. Parents are immutable (new value: {attempted})")]
    ImmutableAncestry {
        class: String,
        current: String,
        attempted: String,
    },

    #[error("Field '{field}' is null, but {rule}")]
    MandatoryFieldNull { field: String, rule: NullRule },

    #[error("Malformed key token: {0}")]
    MalformedKey(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid primary key for {class}: {reason}")]
    InvalidPrimaryKey { class: String, reason: String },

    #[error("Unsupported type for field '{field}': {reason}")]
    UnsupportedFieldType { field: String, reason: String },

    #[error("Attempt was made to set the key of an entity with kind {expected} to a key with kind {actual}")]
    KindMismatch { expected: String, actual: String },

    #[error("Owned child with key {child} cannot be assigned to parent {parent}: owned children cannot change parent")]
    OwnedChildReparenting { child: String, parent: String },

    #[error("Received a child of type {actual} for a field of type {declared}; polymorphism in relationships is only supported for the new-table and superclass-table inheritance strategies")]
    UnsupportedPolymorphism { actual: String, declared: String },

    #[error("No metadata registered for class '{0}'")]
    UnknownClass(String),

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Object not yet flushed: {0}")]
    NotYetFlushed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MapperError {
    /// Transient condition tolerated by the relation resolution stages.
    pub fn is_not_yet_flushed(&self) -> bool {
        matches!(self, Self::NotYetFlushed(_))
    }
}

pub type Result<T> = std::result::Result<T, MapperError>;

impl From<rmp_serde::encode::Error> for MapperError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for MapperError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}
