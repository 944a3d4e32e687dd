// ============================================================================
// Field Value Conversion
// ============================================================================
//
// Turns runtime field values into storage values. Relation handling and key
// assignment live in the builder; this module only knows about single values
// and the type rules attached to key roles.
//
// ============================================================================

use std::sync::Arc;

use crate::config::DEFAULT_LARGE_TEXT_THRESHOLD;
use crate::core::{MapperError, NullRule, Result, Value};
use crate::metadata::{FieldMetadata, FieldRole, FieldType, NullValue};
use crate::object::FieldValue;

/// Produces the opaque bytes stored for fields marked serialized.
pub trait FieldSerializer: Send + Sync {
    fn serialize(&self, value: &FieldValue, field: &FieldMetadata) -> Result<Vec<u8>>;
}

/// MessagePack encoding of the field value.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessagePackSerializer;

impl FieldSerializer for MessagePackSerializer {
    fn serialize(&self, value: &FieldValue, _field: &FieldMetadata) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }
}

/// Maps a field to the name of its storage property.
pub trait PropertyNamer: Send + Sync {
    fn property_name(&self, field: &FieldMetadata) -> String;
}

/// Column name when declared, otherwise the field name.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPropertyNamer;

impl PropertyNamer for DefaultPropertyNamer {
    fn property_name(&self, field: &FieldMetadata) -> String {
        field
            .column
            .as_ref()
            .and_then(|c| c.name.clone())
            .unwrap_or_else(|| field.name.clone())
    }
}

/// How a key-role field encodes its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFieldKind {
    /// Numeric id of the entity itself.
    Long,
    Key,
    /// Encoded key token.
    EncodedString,
    /// Unencoded name of the entity itself.
    NameString,
}

pub struct FieldValueConverter {
    large_text_threshold: usize,
    serializer: Arc<dyn FieldSerializer>,
}

impl FieldValueConverter {
    pub fn new(large_text_threshold: usize) -> Self {
        Self {
            large_text_threshold,
            serializer: Arc::new(MessagePackSerializer),
        }
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn FieldSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn large_text_threshold(&self) -> usize {
        self.large_text_threshold
    }

    /// Storage form of a regular (non-relation, non-embedded) field value.
    pub fn to_storage(&self, field: &FieldMetadata, value: &FieldValue) -> Result<Value> {
        self.convert(field, value, true)
    }

    fn convert(&self, field: &FieldMetadata, value: &FieldValue, top_level: bool) -> Result<Value> {
        let converted = match value.unwrapped() {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Boolean(*b),
            FieldValue::Int(i) => Value::Integer(*i),
            FieldValue::Float(f) => Value::Float(*f),
            FieldValue::Text(s) => {
                if top_level && (field.large_text || s.len() > self.large_text_threshold) {
                    Value::LongText(s.clone())
                } else {
                    Value::Text(s.clone())
                }
            }
            FieldValue::Bytes(b) => Value::Blob(b.clone()),
            FieldValue::DateTime(ts) => Value::Timestamp(*ts),
            FieldValue::Key(k) => Value::Key(k.clone()),
            FieldValue::List(items) => Value::List(
                items
                    .iter()
                    .map(|item| self.convert(field, item, false))
                    .collect::<Result<Vec<_>>>()?,
            ),
            other @ (FieldValue::Object(_) | FieldValue::Embedded(_)) => {
                return Err(MapperError::UnsupportedFieldType {
                    field: field.name.clone(),
                    reason: format!("a {} value cannot be stored in a basic field", other.type_name()),
                });
            }
            FieldValue::Tracked(inner) => return self.convert(field, inner, top_level),
        };
        Ok(converted)
    }

    /// Blob for a serialized field; null stays null.
    pub fn serialize(&self, field: &FieldMetadata, value: &FieldValue) -> Result<Value> {
        match value.unwrapped() {
            FieldValue::Null => Ok(Value::Null),
            inner => Ok(Value::Blob(self.serializer.serialize(inner, field)?)),
        }
    }

    /// Checks that a key-role field's declared type fits its role.
    pub fn key_field_kind(&self, field: &FieldMetadata) -> Result<KeyFieldKind> {
        let kind = match (field.role(), &field.field_type) {
            (FieldRole::PrimaryKey, FieldType::Long) => KeyFieldKind::Long,
            (FieldRole::PrimaryKey, FieldType::Key) => KeyFieldKind::Key,
            (FieldRole::PrimaryKey, FieldType::String) if field.encoded_key => {
                KeyFieldKind::EncodedString
            }
            (FieldRole::PrimaryKey, FieldType::String) => KeyFieldKind::NameString,
            (FieldRole::ParentKey, FieldType::Key) => KeyFieldKind::Key,
            (FieldRole::ParentKey, FieldType::String) => KeyFieldKind::EncodedString,
            (FieldRole::PrimaryKeyName, FieldType::String) => KeyFieldKind::NameString,
            (FieldRole::PrimaryKeyId, FieldType::Long) => KeyFieldKind::Long,
            (role, declared) => {
                return Err(MapperError::UnsupportedFieldType {
                    field: field.name.clone(),
                    reason: format!("a {:?} field cannot be of type {}", role, declared),
                });
            }
        };
        Ok(kind)
    }
}

impl Default for FieldValueConverter {
    fn default() -> Self {
        Self::new(DEFAULT_LARGE_TEXT_THRESHOLD)
    }
}

/// Rejects null for fields whose metadata forbids it.
pub fn check_not_null(class: &str, field: &FieldMetadata, value: &FieldValue) -> Result<()> {
    if !value.unwrapped().is_null() {
        return Ok(());
    }
    if field.null_value == NullValue::Exception {
        return Err(MapperError::MandatoryFieldNull {
            field: field.full_name(class),
            rule: NullRule::Field,
        });
    }
    if field.column.as_ref().and_then(|c| c.allows_null) == Some(false) {
        return Err(MapperError::MandatoryFieldNull {
            field: field.full_name(class),
            rule: NullRule::Column,
        });
    }
    Ok(())
}
