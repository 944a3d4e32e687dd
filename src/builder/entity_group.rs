use tracing::{Level, event, info_span};

use super::{AncestrySource, EntityRecordBuilder, Operation};
use crate::convert::KeyFieldKind;
use crate::core::Result;
use crate::key::{Key, key_to_string};
use crate::object::FieldValue;
use crate::registry::KeyRegistry;

impl<'m> EntityRecordBuilder<'m> {
    /// Makes sure the record sits in its owner's entity group.
    ///
    /// Returns the parent in the form the class's parent-key field holds, so
    /// the caller can write it back to the object. A record that already has
    /// a parent never consults the registry.
    pub fn establish_entity_group(&mut self, registry: &mut KeyRegistry) -> Result<Option<FieldValue>> {
        let span = info_span!(
            "mapper.establish_entity_group",
            kind = %self.record.kind(),
            object = %self.object
        );
        let _guard = span.enter();

        if let Some(parent) = self.record.parent() {
            return self.parent_field_value(parent);
        }
        if self.operation != Operation::Insert {
            return Ok(None);
        }
        if registry.is_unowned(&self.object.id) {
            event!(Level::DEBUG, "object is unowned, staying a root");
            return Ok(None);
        }
        let Some(parent) = registry.take_parent_key(&self.object.id) else {
            return Ok(None);
        };

        let key = if self.record.key().is_complete() {
            self.record.key().with_parent(&parent)?
        } else {
            Key::incomplete(self.record.kind(), Some(&parent))?
        };
        self.attach_ancestry(key, AncestrySource::Registry)?;
        self.parent_field_value(parent)
    }

    fn parent_field_value(&self, parent: Key) -> Result<Option<FieldValue>> {
        let Some(field) = self.class.parent_pk_field() else {
            return Ok(None);
        };
        let value = match self.mapper.converter().key_field_kind(field)? {
            KeyFieldKind::EncodedString => FieldValue::Text(key_to_string(&parent)),
            _ => FieldValue::Key(parent),
        };
        Ok(Some(value))
    }
}
