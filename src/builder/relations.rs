use std::sync::Arc;
use tracing::{Level, event, info_span};

use super::{EntityRecordBuilder, Operation};
use crate::context::PersistenceContext;
use crate::convert::check_not_null;
use crate::core::{MapperError, Result, Value};
use crate::key::Key;
use crate::metadata::{FieldMetadata, RelationMetadata};
use crate::object::{FieldValue, ObjectRef};
use crate::registry::KeyRegistry;

/// A relation field whose resolution waits until the owner has a key.
#[derive(Debug, Clone)]
pub struct RelationDescriptor {
    pub(crate) field: Arc<FieldMetadata>,
    /// Position in the owning class; `None` inside an embedded object.
    pub(crate) position: Option<usize>,
    pub(crate) property: String,
    pub(crate) value: FieldValue,
}

impl RelationDescriptor {
    pub fn field(&self) -> &FieldMetadata {
        &self.field
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    fn relation(&self) -> Result<&RelationMetadata> {
        self.field.relation.as_ref().ok_or_else(|| {
            MapperError::Internal(format!("deferred field {} has no relation metadata", self.field.name))
        })
    }
}

/// A child that is not durable yet does not stop the owner's save.
fn tolerate_not_yet_flushed(stage: &str, field: &FieldMetadata, result: Result<()>) -> Result<()> {
    match result {
        Err(err) if err.is_not_yet_flushed() => {
            event!(Level::TRACE, stage, field = %field.name, error = %err, "child not yet flushed");
            Ok(())
        }
        other => other,
    }
}

impl<'m> EntityRecordBuilder<'m> {
    pub fn has_deferred_relations(&self) -> bool {
        !self.deferred.is_empty()
    }

    /// Second pass over the relation fields, once the record has its key.
    ///
    /// Returns whether any child-key property of the record changed.
    pub fn resolve_relations(
        &mut self,
        registry: &mut KeyRegistry,
        ctx: &mut dyn PersistenceContext,
    ) -> Result<bool> {
        if self.deferred.is_empty() {
            return Ok(false);
        }
        if !self.record.key().is_complete() {
            return Err(MapperError::Internal(format!(
                "relations of {} resolved before its key {} was assigned",
                self.object,
                self.record.key()
            )));
        }
        let deferred = std::mem::take(&mut self.deferred);

        let span = info_span!(
            "mapper.resolve_relations",
            kind = %self.record.kind(),
            key = %self.record.key(),
            relations = deferred.len()
        );
        let _guard = span.enter();

        self.register_related_objects(registry, ctx)?;

        // Stage 1: mappings that write their own reference into the record.
        for descriptor in &deferred {
            let relation = descriptor.relation()?;
            if !relation.mapping.capabilities.eager_foreign_key || relation.mapping.parent_key_provider {
                continue;
            }
            let result = self.write_eager_foreign_key(descriptor, relation, ctx);
            tolerate_not_yet_flushed("eager_foreign_key", &descriptor.field, result)?;
        }

        // Stage 2: lifecycle callbacks.
        for descriptor in &deferred {
            let relation = descriptor.relation()?;
            if !relation.mapping.capabilities.lifecycle_callbacks {
                continue;
            }
            let result = match self.operation {
                Operation::Insert => ctx.post_insert(&self.object, &descriptor.field),
                Operation::Update => ctx.post_update(&self.object, &descriptor.field),
            };
            tolerate_not_yet_flushed("lifecycle_callback", &descriptor.field, result)?;
        }

        // Stage 3: child keys.
        let mut modified = false;
        for descriptor in &deferred {
            let relation = descriptor.relation()?;
            if self.skips_owned_child_keys(relation) {
                continue;
            }
            let stored = self.propagate_child_keys(descriptor, relation, registry, ctx)?;
            if self.record.property(&descriptor.property) != Some(&stored) {
                self.write_property(&descriptor.property, descriptor.field.indexed, stored);
                modified = true;
            }
        }

        event!(Level::DEBUG, modified, "relations resolved");
        Ok(modified)
    }

    /// Records the owner's key against every owned child and marks every
    /// unowned one, across all relation fields of the class.
    fn register_related_objects(
        &self,
        registry: &mut KeyRegistry,
        ctx: &dyn PersistenceContext,
    ) -> Result<()> {
        let key = self.record.key();
        for &position in self.class.relation_positions() {
            let field = self.class.field(position)?;
            let Some(relation) = &field.relation else {
                continue;
            };
            let value = ctx.provide_field(&self.object, position)?;
            let related = value.related_objects();

            if !relation.is_owned() {
                for object in related {
                    registry.register_unowned(object.id);
                }
                continue;
            }
            // The related object is this record's parent, not a child.
            if relation.mapping.parent_key_provider {
                continue;
            }
            for child in related {
                self.check_polymorphism(relation, child)?;
                registry.register_parent_key(child.id, key.clone());
            }
        }
        Ok(())
    }

    fn check_polymorphism(&self, relation: &RelationMetadata, child: &ObjectRef) -> Result<()> {
        if child.class == relation.element_class {
            return Ok(());
        }
        let actual = self.mapper.class_metadata(&child.class)?;
        if !actual.inheritance().supports_polymorphic_relations() {
            return Err(MapperError::UnsupportedPolymorphism {
                actual: child.class.clone(),
                declared: relation.element_class.clone(),
            });
        }
        Ok(())
    }

    fn write_eager_foreign_key(
        &mut self,
        descriptor: &RelationDescriptor,
        relation: &RelationMetadata,
        ctx: &mut dyn PersistenceContext,
    ) -> Result<()> {
        self.check_parentage(relation, &descriptor.value, ctx)?;
        ctx.write_eager_foreign_key(&mut self.record, &self.object, &descriptor.field, &descriptor.value)
    }

    /// Owned children that already have keys must sit under this record.
    fn check_parentage(
        &self,
        relation: &RelationMetadata,
        value: &FieldValue,
        ctx: &dyn PersistenceContext,
    ) -> Result<()> {
        if !relation.is_owned() {
            return Ok(());
        }
        for child in value.related_objects() {
            if let Some(key) = ctx.key_of(child) {
                self.check_owned_child(relation, &key)?;
            }
        }
        Ok(())
    }

    fn propagate_child_keys(
        &self,
        descriptor: &RelationDescriptor,
        relation: &RelationMetadata,
        registry: &mut KeyRegistry,
        ctx: &mut dyn PersistenceContext,
    ) -> Result<Value> {
        let field = &descriptor.field;
        match descriptor.value.unwrapped() {
            FieldValue::Null => {
                check_not_null(self.class.name(), field, &FieldValue::Null)?;
                Ok(Value::Null)
            }
            FieldValue::Object(child) if relation.is_single_valued() => {
                if ctx.is_deleted(child) {
                    return Ok(Value::Null);
                }
                let (handle, key) = self.resolve_child_key(relation, child, registry, ctx)?;
                if handle != *child {
                    if let Some(position) = descriptor.position {
                        ctx.replace_field(&self.object, position, FieldValue::Object(handle))?;
                    }
                }
                Ok(Value::Key(key))
            }
            FieldValue::List(items) if !relation.is_single_valued() => {
                let mut keys = Vec::with_capacity(items.len());
                for child in items.iter().filter_map(FieldValue::as_object) {
                    if ctx.is_deleted(child) {
                        continue;
                    }
                    let (_, key) = self.resolve_child_key(relation, child, registry, ctx)?;
                    keys.push(key);
                }
                Ok(Value::from(keys))
            }
            other => Err(MapperError::UnsupportedFieldType {
                field: field.name.clone(),
                reason: format!("relation field holds a {} value", other.type_name()),
            }),
        }
    }

    /// Complete key of a related object, persisting or flushing it first when
    /// it has none yet.
    fn resolve_child_key(
        &self,
        relation: &RelationMetadata,
        child: &ObjectRef,
        registry: &mut KeyRegistry,
        ctx: &mut dyn PersistenceContext,
    ) -> Result<(ObjectRef, Key)> {
        let handle = match ctx.key_of(child) {
            Some(key) => {
                self.check_owned_child(relation, &key)?;
                return Ok((child.clone(), key));
            }
            None => self.make_persistent(child, registry, ctx)?,
        };

        let key = match ctx.key_of(&handle) {
            Some(key) => key,
            None => {
                ctx.flush(&handle, registry)?;
                ctx.key_of(&handle).ok_or_else(|| {
                    MapperError::NotYetFlushed(format!("{} has no key after flush", handle))
                })?
            }
        };
        self.check_owned_child(relation, &key)?;
        Ok((handle, key))
    }

    fn make_persistent(
        &self,
        child: &ObjectRef,
        registry: &mut KeyRegistry,
        ctx: &mut dyn PersistenceContext,
    ) -> Result<ObjectRef> {
        if ctx.is_managed(child) && !ctx.is_detached(child) {
            return Ok(child.clone());
        }
        event!(Level::DEBUG, child = %child, "persisting related object");
        ctx.persist(child, registry)
    }
}
