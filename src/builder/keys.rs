use std::sync::Arc;
use tracing::{Level, event};

use super::{AncestrySource, EntityRecordBuilder, Operation};
use crate::convert::KeyFieldKind;
use crate::core::{MapperError, Result};
use crate::key::{Key, string_to_key};
use crate::metadata::FieldMetadata;
use crate::object::FieldValue;

fn decode_key(field: &FieldMetadata, value: FieldValue) -> Result<Option<Key>> {
    match value.into_unwrapped() {
        FieldValue::Null => Ok(None),
        FieldValue::Key(key) => Ok(Some(key)),
        FieldValue::Text(token) => string_to_key(&token).map(Some),
        other => Err(unexpected_value(field, &other)),
    }
}

fn unexpected_value(field: &FieldMetadata, value: &FieldValue) -> MapperError {
    MapperError::UnsupportedFieldType {
        field: field.name.clone(),
        reason: format!("key field of type {} holds a {} value", field.field_type, value.type_name()),
    }
}

impl<'m> EntityRecordBuilder<'m> {
    // ========================================================================
    // Key-role fields
    // ========================================================================

    pub(super) fn store_primary_key(&mut self, field: &Arc<FieldMetadata>, value: FieldValue) -> Result<()> {
        match self.mapper.converter().key_field_kind(field)? {
            KeyFieldKind::Long => {
                let key = self.derived_key(field, value)?;
                self.store_key(key, false)
            }
            KeyFieldKind::Key | KeyFieldKind::EncodedString => {
                let key = decode_key(field, value)?;
                self.store_key(key, true)
            }
            KeyFieldKind::NameString => {
                if value.unwrapped().is_null() {
                    return Err(MapperError::InvalidPrimaryKey {
                        class: self.class.name().to_string(),
                        reason: format!(
                            "unencoded String primary key {} cannot be null; use a Long field to have an id assigned",
                            field.name
                        ),
                    });
                }
                let key = self.derived_key(field, value)?;
                self.store_key(key, false)
            }
        }
    }

    pub(super) fn store_pk_name(&mut self, field: &Arc<FieldMetadata>, value: FieldValue) -> Result<()> {
        self.mapper.converter().key_field_kind(field)?;
        let key = self.derived_key(field, value)?;
        self.store_key(key, false)
    }

    pub(super) fn store_pk_id(&mut self, field: &Arc<FieldMetadata>, value: FieldValue) -> Result<()> {
        self.mapper.converter().key_field_kind(field)?;
        let key = self.derived_key(field, value)?;
        self.store_key(key, false)
    }

    pub(super) fn store_parent_field(&mut self, field: &Arc<FieldMetadata>, value: FieldValue) -> Result<()> {
        self.mapper.converter().key_field_kind(field)?;
        let parent = decode_key(field, value)?;
        self.store_parent_key(parent)
    }

    /// Key of the record's kind under its current parent, from an id or name.
    fn derived_key(&self, field: &FieldMetadata, value: FieldValue) -> Result<Option<Key>> {
        let parent = self.record.parent();
        match value.into_unwrapped() {
            FieldValue::Null => Ok(None),
            FieldValue::Int(id) => Key::new(parent.as_ref(), self.record.kind(), id).map(Some),
            FieldValue::Text(name) => Key::new(parent.as_ref(), self.record.kind(), name).map(Some),
            other => Err(unexpected_value(field, &other)),
        }
    }

    fn conflicting(&self, key: &Key) -> MapperError {
        MapperError::ConflictingKeyAssignment(format!(
            "{} received both a primary key with ancestry ({}) and a parent key; set exactly one",
            self.class.name(),
            key
        ))
    }

    fn immutable_ancestry(&self, attempted: Option<&Key>) -> MapperError {
        MapperError::ImmutableAncestry {
            class: self.class.name().to_string(),
            current: self.record.key().to_string(),
            attempted: attempted.map_or_else(|| "null".to_string(), |k| k.to_string()),
        }
    }

    // ========================================================================
    // Key-assignment protocol
    // ========================================================================

    /// Applies a primary key. `explicit` is false when the key was derived
    /// from an id or name under the record's current parent.
    pub(super) fn store_key(&mut self, key: Option<Key>, explicit: bool) -> Result<()> {
        let Some(key) = key else {
            if self.record.key().is_complete() && !self.key_already_set {
                return Err(MapperError::ImmutableKey {
                    class: self.class.name().to_string(),
                    current: self.record.key().to_string(),
                    attempted: "null".to_string(),
                });
            }
            return Ok(());
        };

        if key.kind() != self.record.kind() {
            return Err(MapperError::KindMismatch {
                expected: self.record.kind().to_string(),
                actual: key.kind().to_string(),
            });
        }

        if self.record.key().is_complete() {
            if *self.record.key() == key {
                return Ok(());
            }
            return Err(MapperError::ImmutableKey {
                class: self.class.name().to_string(),
                current: self.record.key().to_string(),
                attempted: key.to_string(),
            });
        }

        let current_parent = self.record.parent();
        if current_parent.is_some() {
            if explicit {
                return Err(self.conflicting(&key));
            }
            if key.parent() != current_parent {
                return Err(self.immutable_ancestry(key.parent().as_ref()));
            }
        }

        if key.has_parent() && current_parent.is_none() {
            self.attach_ancestry(key, AncestrySource::PrimaryKey)?;
        } else {
            self.replace_record(key)?;
        }
        self.key_already_set = true;
        self.explicit_key = explicit;
        Ok(())
    }

    /// Applies a parent key from the parent-key field.
    ///
    /// A key already derived from an id or name is moved under the parent
    /// instead of being rejected, so id and parent fields may arrive in
    /// either order. Only an explicit key conflicts with a parent field.
    pub(super) fn store_parent_key(&mut self, parent: Option<Key>) -> Result<()> {
        let current = self.record.parent();

        let Some(parent) = parent else {
            // A null parent is fine unless the record already has one it
            // did not get from this builder.
            if current.is_some() && self.ancestry == AncestrySource::None {
                return Err(self.immutable_ancestry(None));
            }
            return Ok(());
        };

        if let Some(current) = current {
            if self.ancestry == AncestrySource::PrimaryKey {
                return Err(self.conflicting(self.record.key()));
            }
            if current == parent {
                return Ok(());
            }
            return Err(self.immutable_ancestry(Some(&parent)));
        }

        if self.operation == Operation::Update {
            return Err(self.immutable_ancestry(Some(&parent)));
        }

        let key = if self.key_already_set {
            if self.explicit_key {
                return Err(self.conflicting(self.record.key()));
            }
            self.record.key().with_parent(&parent)?
        } else {
            Key::incomplete(self.record.kind(), Some(&parent))?
        };
        self.attach_ancestry(key, AncestrySource::ParentField)
    }

    /// One-time rebuild of the record around a key that carries a parent.
    pub(super) fn attach_ancestry(&mut self, key: Key, source: AncestrySource) -> Result<()> {
        if self.ancestry_rebuilt {
            return Err(MapperError::Internal(format!(
                "record {} was already rebuilt with ancestry, refusing to rebuild around {}",
                self.record.key(),
                key
            )));
        }
        if self.operation == Operation::Update {
            return Err(self.immutable_ancestry(key.parent().as_ref()));
        }

        event!(
            Level::DEBUG,
            kind = %self.record.kind(),
            key = %key,
            source = ?source,
            "rebuilding record with ancestry"
        );
        self.replace_record(key)?;
        self.ancestry_rebuilt = true;
        self.ancestry = source;
        self.parent_already_set = true;
        Ok(())
    }

    /// Completes the record key once the datastore has assigned an id.
    pub fn key_assigned(&mut self, key: Key) -> Result<()> {
        if *self.record.key() == key {
            return Ok(());
        }
        if self.record.key().is_complete() {
            return Err(MapperError::ImmutableKey {
                class: self.class.name().to_string(),
                current: self.record.key().to_string(),
                attempted: key.to_string(),
            });
        }
        if !key.is_complete() {
            return Err(MapperError::InvalidKey(format!("assigned key {} is incomplete", key)));
        }
        if key.parent() != self.record.parent() {
            return Err(self.immutable_ancestry(key.parent().as_ref()));
        }
        event!(Level::DEBUG, key = %key, "key assigned");
        self.replace_record(key)
    }
}
