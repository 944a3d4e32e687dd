#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use entitymapper::{
    ClassMetadata, EntityRecord, FieldMetadata, FieldType, FieldValue, Key, KeyRegistry, Mapper,
    MapperConfig, MapperError, MetadataRegistry, ObjectId, ObjectRef, PersistenceContext,
    RelationMetadata, Result, key_to_string,
};

// ============================================================================
// Example classes
// ============================================================================

pub const LIBRARY_NAME: usize = 0;
pub const LIBRARY_BOOKS: usize = 1;
pub const LIBRARY_PATRON: usize = 2;

pub const BOOK_ID: usize = 0;
pub const BOOK_PARENT: usize = 1;
pub const BOOK_TITLE: usize = 2;
pub const BOOK_LIBRARY: usize = 3;

pub const SHELF_ID: usize = 0;
pub const SHELF_BOOKS: usize = 1;

/// Library(name: String pk, books: owned collection of Book, patron: unowned Author)
pub fn library_class() -> ClassMetadata {
    ClassMetadata::builder("Library")
        .field(FieldMetadata::new("name", FieldType::String).primary_key())
        .field(
            FieldMetadata::new("books", FieldType::List)
                .relation(RelationMetadata::collection("Book")),
        )
        .field(
            FieldMetadata::new("patron", FieldType::Object("Author".into()))
                .relation(RelationMetadata::single("Author").unowned()),
        )
        .build()
        .unwrap()
}

/// Book(id: Long pk, parent: parent Key, title: mandatory String, library: many-to-one back pointer)
pub fn book_class() -> ClassMetadata {
    ClassMetadata::builder("Book")
        .field(FieldMetadata::new("id", FieldType::Long).primary_key())
        .field(FieldMetadata::new("parent", FieldType::Key).parent_pk())
        .field(FieldMetadata::new("title", FieldType::String).mandatory())
        .field(
            FieldMetadata::new("library", FieldType::Object("Library".into()))
                .relation(RelationMetadata::many_to_one_bi("Library")),
        )
        .build()
        .unwrap()
}

/// Shelf(id: Long pk, books: owned collection of Book)
pub fn shelf_class() -> ClassMetadata {
    ClassMetadata::builder("Shelf")
        .field(FieldMetadata::new("id", FieldType::Long).primary_key())
        .field(
            FieldMetadata::new("books", FieldType::List)
                .relation(RelationMetadata::collection("Book")),
        )
        .build()
        .unwrap()
}

/// Author(id: Long pk, name: String)
pub fn author_class() -> ClassMetadata {
    ClassMetadata::builder("Author")
        .field(FieldMetadata::new("id", FieldType::Long).primary_key())
        .field(FieldMetadata::new("name", FieldType::String))
        .build()
        .unwrap()
}

/// HasKeyAncestorKeyPk(key: Key pk, ancestor: parent Key)
pub fn has_key_ancestor_class() -> ClassMetadata {
    ClassMetadata::builder("HasKeyAncestorKeyPk")
        .field(FieldMetadata::new("key", FieldType::Key).primary_key())
        .field(FieldMetadata::new("ancestor", FieldType::Key).parent_pk())
        .build()
        .unwrap()
}

pub fn metadata() -> MetadataRegistry {
    MetadataRegistry::new()
        .with_class(library_class())
        .with_class(book_class())
        .with_class(author_class())
        .with_class(shelf_class())
        .with_class(has_key_ancestor_class())
}

pub fn library_key(name: &str) -> Key {
    Key::new(None, "Library", name).unwrap()
}

// ============================================================================
// In-memory session
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    Transient,
    Managed,
    Detached,
    Deleted,
}

struct Slot {
    state: ObjectState,
    fields: Vec<FieldValue>,
    key: Option<Key>,
}

/// Framework stand-in: holds objects and committed records, and runs full
/// saves (populate, entity group, commit, relations) through the mapper.
pub struct TestSession {
    mapper: Arc<Mapper>,
    slots: HashMap<ObjectId, Slot>,
    records: HashMap<ObjectId, EntityRecord>,
    next_id: i64,
    pub hook_calls: Vec<String>,
    /// Makes the eager foreign-key hook report an unflushed child.
    pub eager_fk_not_flushed: bool,
    /// Makes the post-insert hook report an unflushed child.
    pub post_insert_not_flushed: bool,
    /// Flush returns without committing anything.
    pub flush_is_noop: bool,
}

impl TestSession {
    pub fn new() -> Self {
        Self::with_config(MapperConfig::default())
    }

    pub fn with_config(config: MapperConfig) -> Self {
        let mapper = Mapper::new(config, Arc::new(metadata())).unwrap();
        Self {
            mapper: Arc::new(mapper),
            slots: HashMap::new(),
            records: HashMap::new(),
            next_id: 1,
            hook_calls: Vec::new(),
            eager_fk_not_flushed: false,
            post_insert_not_flushed: false,
            flush_is_noop: false,
        }
    }

    pub fn mapper(&self) -> Arc<Mapper> {
        Arc::clone(&self.mapper)
    }

    /// New transient object; missing trailing fields are null.
    pub fn add(&mut self, class: &str, mut fields: Vec<FieldValue>) -> ObjectRef {
        let count = self.mapper.class_metadata(class).unwrap().field_count();
        fields.resize(count, FieldValue::Null);
        let object = ObjectRef::new(class);
        self.slots.insert(
            object.id,
            Slot {
                state: ObjectState::Transient,
                fields,
                key: None,
            },
        );
        object
    }

    pub fn set(&mut self, object: &ObjectRef, position: usize, value: FieldValue) {
        self.slots.get_mut(&object.id).unwrap().fields[position] = value;
    }

    pub fn field(&self, object: &ObjectRef, position: usize) -> FieldValue {
        self.slots[&object.id].fields[position].clone()
    }

    pub fn set_state(&mut self, object: &ObjectRef, state: ObjectState) {
        self.slots.get_mut(&object.id).unwrap().state = state;
    }

    pub fn state(&self, object: &ObjectRef) -> ObjectState {
        self.slots[&object.id].state
    }

    pub fn record(&self, object: &ObjectRef) -> Option<&EntityRecord> {
        self.records.get(&object.id)
    }

    /// Saves one object in its own unit of work.
    pub fn save(&mut self, object: &ObjectRef) -> Result<bool> {
        let mut registry = KeyRegistry::new();
        let result = self.save_with(object, &mut registry);
        registry.clear();
        result
    }

    /// Saves one object inside the caller's unit of work.
    pub fn save_with(&mut self, object: &ObjectRef, registry: &mut KeyRegistry) -> Result<bool> {
        let mapper = Arc::clone(&self.mapper);
        let class = mapper.class_metadata(&object.class)?;
        self.set_state(object, ObjectState::Managed);

        let mut builder = match self.records.get(&object.id).cloned() {
            Some(record) => mapper.update(object, record)?,
            None => mapper.insert(object)?,
        };
        builder.populate_fields(&class.all_positions(), &*self)?;

        if let Some(parent) = builder.establish_entity_group(registry)? {
            if let Some(field) = class.parent_pk_field() {
                self.set(object, field.position(), parent);
            }
        }

        // Commit: the datastore assigns an id to an incomplete key.
        if !builder.key().is_complete() {
            let assigned = builder.key().complete_with_id(self.next_id)?;
            self.next_id += 1;
            builder.key_assigned(assigned)?;
        }
        let key = builder.key().clone();
        self.write_back_key(object, &class, &key);
        if let Some(slot) = self.slots.get_mut(&object.id) {
            slot.key = Some(key);
        }

        let modified = builder.resolve_relations(registry, self)?;
        self.records.insert(object.id, builder.into_record());
        Ok(modified)
    }

    fn write_back_key(&mut self, object: &ObjectRef, class: &ClassMetadata, key: &Key) {
        let Some(field) = class.primary_key_field() else {
            return;
        };
        let value = match field.field_type {
            FieldType::Long => key.id().map(FieldValue::Int),
            FieldType::Key => Some(FieldValue::Key(key.clone())),
            FieldType::String if field.encoded_key => Some(FieldValue::Text(key_to_string(key))),
            _ => None,
        };
        if let Some(value) = value {
            self.set(object, field.position(), value);
        }
    }

    fn slot(&self, object: &ObjectRef) -> Result<&Slot> {
        self.slots
            .get(&object.id)
            .ok_or_else(|| MapperError::Internal(format!("unknown object {}", object)))
    }
}

impl PersistenceContext for TestSession {
    fn provide_field(&self, object: &ObjectRef, position: usize) -> Result<FieldValue> {
        self.slot(object)?
            .fields
            .get(position)
            .cloned()
            .ok_or_else(|| MapperError::Internal(format!("{} has no field {}", object, position)))
    }

    fn replace_field(&mut self, object: &ObjectRef, position: usize, value: FieldValue) -> Result<()> {
        self.slot(object)?;
        self.set(object, position, value);
        Ok(())
    }

    fn key_of(&self, object: &ObjectRef) -> Option<Key> {
        self.slots.get(&object.id).and_then(|slot| slot.key.clone())
    }

    fn is_deleted(&self, object: &ObjectRef) -> bool {
        self.slots
            .get(&object.id)
            .is_some_and(|slot| slot.state == ObjectState::Deleted)
    }

    fn is_detached(&self, object: &ObjectRef) -> bool {
        self.slots
            .get(&object.id)
            .is_some_and(|slot| slot.state == ObjectState::Detached)
    }

    fn is_managed(&self, object: &ObjectRef) -> bool {
        self.slots
            .get(&object.id)
            .is_some_and(|slot| slot.state == ObjectState::Managed)
    }

    fn persist(&mut self, object: &ObjectRef, registry: &mut KeyRegistry) -> Result<ObjectRef> {
        self.hook_calls.push(format!("persist:{}", object.class));
        self.save_with(object, registry)?;
        Ok(object.clone())
    }

    fn flush(&mut self, object: &ObjectRef, registry: &mut KeyRegistry) -> Result<()> {
        self.hook_calls.push(format!("flush:{}", object.class));
        if self.flush_is_noop {
            return Ok(());
        }
        if self.key_of(object).is_none() {
            self.save_with(object, registry)?;
        }
        Ok(())
    }

    fn write_eager_foreign_key(
        &mut self,
        _record: &mut EntityRecord,
        _owner: &ObjectRef,
        field: &FieldMetadata,
        _value: &FieldValue,
    ) -> Result<()> {
        self.hook_calls.push(format!("eager_fk:{}", field.name));
        if self.eager_fk_not_flushed {
            return Err(MapperError::NotYetFlushed(field.name.clone()));
        }
        Ok(())
    }

    fn post_insert(&mut self, _owner: &ObjectRef, field: &FieldMetadata) -> Result<()> {
        self.hook_calls.push(format!("post_insert:{}", field.name));
        if self.post_insert_not_flushed {
            return Err(MapperError::NotYetFlushed(field.name.clone()));
        }
        Ok(())
    }

    fn post_update(&mut self, _owner: &ObjectRef, field: &FieldMetadata) -> Result<()> {
        self.hook_calls.push(format!("post_update:{}", field.name));
        Ok(())
    }
}
