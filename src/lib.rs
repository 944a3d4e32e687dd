// ============================================================================
// EntityMapper Library
// ============================================================================
//
// Maps the fields of managed objects onto storage-native entity records
// addressed by hierarchical keys.
//
// ============================================================================

pub mod builder;
pub mod config;
pub mod context;
pub mod convert;
pub mod core;
pub mod key;
pub mod mapper;
pub mod metadata;
pub mod object;
pub mod record;
pub mod registry;

// Re-export main types for convenience
pub use builder::{EntityRecordBuilder, Operation, RelationDescriptor};
pub use config::{MapperConfig, StorageVersion};
pub use context::PersistenceContext;
pub use convert::{DefaultPropertyNamer, FieldSerializer, MessagePackSerializer, PropertyNamer};
pub use core::{MapperError, NullRule, Result, Value};
pub use key::{IdOrName, Key, KeyId, create_key, derive_parent, key_to_string, string_to_key};
pub use mapper::Mapper;
pub use metadata::{
    ClassMetadata, ClassMetadataProvider, EmbeddedMetadata, FieldMetadata, FieldType,
    InheritanceStrategy, MetadataRegistry, RelationMetadata,
};
pub use object::{FieldValue, ObjectId, ObjectRef};
pub use record::{EntityRecord, Property};
pub use registry::KeyRegistry;
