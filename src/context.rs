use crate::core::Result;
use crate::key::Key;
use crate::metadata::FieldMetadata;
use crate::object::{FieldValue, ObjectRef};
use crate::record::EntityRecord;
use crate::registry::KeyRegistry;

/// The persistence framework around the mapper.
///
/// Calls happen synchronously on the saving thread. Anything that may save
/// another object receives the unit of work's [`KeyRegistry`] so ancestry
/// registered by the caller is visible to the nested save.
pub trait PersistenceContext {
    /// Current value of a field of a managed object.
    fn provide_field(&self, object: &ObjectRef, position: usize) -> Result<FieldValue>;

    /// Replaces a field value, e.g. after a related object was attached.
    fn replace_field(&mut self, object: &ObjectRef, position: usize, value: FieldValue) -> Result<()>;

    /// Complete datastore key of the object, if it has one yet.
    fn key_of(&self, object: &ObjectRef) -> Option<Key>;

    fn is_deleted(&self, object: &ObjectRef) -> bool;

    fn is_detached(&self, object: &ObjectRef) -> bool;

    /// Whether the object is already managed by this unit of work.
    fn is_managed(&self, object: &ObjectRef) -> bool;

    /// Makes a transient or detached object persistent, returning the managed handle.
    fn persist(&mut self, object: &ObjectRef, registry: &mut KeyRegistry) -> Result<ObjectRef>;

    /// Writes a managed object to the datastore so that it gets a key.
    fn flush(&mut self, object: &ObjectRef, registry: &mut KeyRegistry) -> Result<()>;

    /// Storage mapping hook for relations with an eager foreign-key capability.
    fn write_eager_foreign_key(
        &mut self,
        _record: &mut EntityRecord,
        _owner: &ObjectRef,
        _field: &FieldMetadata,
        _value: &FieldValue,
    ) -> Result<()> {
        Ok(())
    }

    fn post_insert(&mut self, _owner: &ObjectRef, _field: &FieldMetadata) -> Result<()> {
        Ok(())
    }

    fn post_update(&mut self, _owner: &ObjectRef, _field: &FieldMetadata) -> Result<()> {
        Ok(())
    }
}
