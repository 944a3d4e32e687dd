// ============================================================================
// Entity Record Builder
// ============================================================================
//
// Builds one entity record from the fields of one managed object, in two
// passes:
//
//   1. populate_field / populate_fields: every requested field is stored in
//      the record according to its role; relation fields are deferred.
//   2. resolve_relations: parent keys are registered for owned children,
//      children are persisted as needed and their keys written back.
//
// Between the passes the caller commits the record so its key is complete.
//
// ============================================================================

mod entity_group;
mod keys;
mod relations;

pub use relations::RelationDescriptor;

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{Level, event, info_span};

use crate::context::PersistenceContext;
use crate::convert::check_not_null;
use crate::core::{MapperError, Result, Value};
use crate::key::Key;
use crate::mapper::Mapper;
use crate::metadata::{ClassMetadata, EmbeddedMetadata, FieldMetadata, FieldRole, RelationMetadata};
use crate::object::{FieldValue, ObjectRef};
use crate::record::EntityRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Update,
}

/// Channel through which the record's parent was attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AncestrySource {
    None,
    ParentField,
    PrimaryKey,
    Registry,
}

/// Metadata view for the fields currently being populated.
struct FieldScope {
    class: Arc<ClassMetadata>,
    property_overrides: HashMap<String, String>,
}

pub struct EntityRecordBuilder<'m> {
    mapper: &'m Mapper,
    object: ObjectRef,
    class: Arc<ClassMetadata>,
    operation: Operation,
    record: EntityRecord,
    parent_already_set: bool,
    key_already_set: bool,
    /// The key came from the application as a whole key, not from an id/name.
    explicit_key: bool,
    ancestry: AncestrySource,
    ancestry_rebuilt: bool,
    deferred: Vec<RelationDescriptor>,
    embedded_scopes: Vec<FieldScope>,
}

impl<'m> EntityRecordBuilder<'m> {
    pub(crate) fn new(
        mapper: &'m Mapper,
        object: ObjectRef,
        class: Arc<ClassMetadata>,
        record: EntityRecord,
        operation: Operation,
    ) -> Self {
        Self {
            mapper,
            object,
            class,
            operation,
            record,
            parent_already_set: false,
            key_already_set: false,
            explicit_key: false,
            ancestry: AncestrySource::None,
            ancestry_rebuilt: false,
            deferred: Vec::new(),
            embedded_scopes: Vec::new(),
        }
    }

    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    pub fn class(&self) -> &Arc<ClassMetadata> {
        &self.class
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn record(&self) -> &EntityRecord {
        &self.record
    }

    pub fn key(&self) -> &Key {
        self.record.key()
    }

    pub fn parent_already_set(&self) -> bool {
        self.parent_already_set
    }

    pub fn key_already_set(&self) -> bool {
        self.key_already_set
    }

    pub fn deferred_relations(&self) -> &[RelationDescriptor] {
        &self.deferred
    }

    /// Hands the finished record to the commit collaborator.
    pub fn into_record(self) -> EntityRecord {
        self.record
    }

    /// Reads each field through the context and populates it.
    pub fn populate_fields(&mut self, positions: &[usize], ctx: &dyn PersistenceContext) -> Result<()> {
        let span = info_span!(
            "mapper.populate",
            kind = %self.record.kind(),
            object = %self.object,
            fields = positions.len()
        );
        let _guard = span.enter();

        for &position in positions {
            let value = ctx.provide_field(&self.object, position)?;
            self.populate_field(position, value, ctx)?;
        }
        Ok(())
    }

    /// Stores one field value in the record according to the field's role.
    pub fn populate_field(
        &mut self,
        position: usize,
        value: FieldValue,
        ctx: &dyn PersistenceContext,
    ) -> Result<()> {
        let field = Arc::clone(self.current_class().field(position)?);
        event!(Level::TRACE, field = %field.name, value = value.type_name(), "populate field");

        if !self.embedded_scopes.is_empty() {
            return self.store_field_in_record(position, &field, value, ctx);
        }

        match field.role() {
            FieldRole::PrimaryKey => self.store_primary_key(&field, value),
            FieldRole::ParentKey => self.store_parent_field(&field, value),
            FieldRole::PrimaryKeyName => self.store_pk_name(&field, value),
            FieldRole::PrimaryKeyId => self.store_pk_id(&field, value),
            FieldRole::Regular | FieldRole::Relation => {
                self.store_field_in_record(position, &field, value, ctx)
            }
        }
    }

    fn current_class(&self) -> &Arc<ClassMetadata> {
        self.embedded_scopes
            .last()
            .map(|scope| &scope.class)
            .unwrap_or(&self.class)
    }

    fn current_class_name(&self) -> String {
        self.current_class().name().to_string()
    }

    fn property_name(&self, field: &FieldMetadata) -> String {
        if let Some(name) = self
            .embedded_scopes
            .last()
            .and_then(|scope| scope.property_overrides.get(&field.name))
        {
            return name.clone();
        }
        self.mapper.property_name(field)
    }

    fn write_property(&mut self, property: &str, indexed: bool, value: Value) {
        if indexed {
            self.record.set_property(property, value);
        } else {
            self.record.set_unindexed_property(property, value);
        }
    }

    fn is_writable(&self, field: &FieldMetadata) -> bool {
        match self.operation {
            Operation::Insert => field.insertable,
            Operation::Update => field.updateable,
        }
    }

    fn store_field_in_record(
        &mut self,
        position: usize,
        field: &Arc<FieldMetadata>,
        value: FieldValue,
        ctx: &dyn PersistenceContext,
    ) -> Result<()> {
        if !self.is_writable(field) {
            return Ok(());
        }

        if let Some(embedded) = &field.embedded {
            return self.store_embedded(field, embedded, value, ctx);
        }

        let class_name = self.current_class_name();
        if field.serialized {
            check_not_null(&class_name, field, &value)?;
            let stored = self.mapper.converter().serialize(field, &value)?;
            let property = self.property_name(field);
            self.write_property(&property, false, stored);
            return Ok(());
        }

        match &field.relation {
            None => {
                check_not_null(&class_name, field, &value)?;
                let stored = self.mapper.converter().to_storage(field, &value)?;
                let property = self.property_name(field);
                self.write_property(&property, field.indexed, stored);
                Ok(())
            }
            Some(relation) => self.store_relation(position, field, relation, value, ctx),
        }
    }

    fn store_embedded(
        &mut self,
        field: &FieldMetadata,
        embedded: &EmbeddedMetadata,
        value: FieldValue,
        ctx: &dyn PersistenceContext,
    ) -> Result<()> {
        let values = match value.into_unwrapped() {
            FieldValue::Embedded(values) => values,
            FieldValue::Null => Vec::new(),
            other => {
                return Err(MapperError::UnsupportedFieldType {
                    field: field.name.clone(),
                    reason: format!("embedded field holds a {} value", other.type_name()),
                });
            }
        };

        let count = embedded.class.field_count();
        if values.len() > count {
            return Err(MapperError::UnsupportedFieldType {
                field: field.name.clone(),
                reason: format!(
                    "embedded {} has {} fields but {} values were given",
                    embedded.class.name(),
                    count,
                    values.len()
                ),
            });
        }

        self.embedded_scopes.push(FieldScope {
            class: Arc::clone(&embedded.class),
            property_overrides: embedded.property_overrides.clone(),
        });
        let result = self.populate_embedded(values, ctx);
        self.embedded_scopes.pop();
        result
    }

    fn populate_embedded(&mut self, mut values: Vec<FieldValue>, ctx: &dyn PersistenceContext) -> Result<()> {
        let count = self.current_class().field_count();
        values.resize(count, FieldValue::Null);
        for (position, value) in values.into_iter().enumerate() {
            self.populate_field(position, value, ctx)?;
        }
        Ok(())
    }

    /// Swaps in a record rebuilt around `key`, keeping every property.
    fn replace_record(&mut self, key: Key) -> Result<()> {
        if key.kind() != self.record.kind() {
            return Err(MapperError::KindMismatch {
                expected: self.record.kind().to_string(),
                actual: key.kind().to_string(),
            });
        }
        let placeholder = EntityRecord::with_key(key.clone());
        let record = std::mem::replace(&mut self.record, placeholder);
        self.record = record.rebuild(key)?;
        Ok(())
    }

    /// Owned relations whose child keys never land in this record.
    fn skips_owned_child_keys(&self, relation: &RelationMetadata) -> bool {
        relation.is_owned()
            && (!self.mapper.config().writes_owned_child_keys() || relation.is_non_owning_side())
    }

    fn is_child_key(&self, key: &Key) -> bool {
        key.parent().as_ref() == Some(self.record.key())
    }

    fn check_owned_child(&self, relation: &RelationMetadata, key: &Key) -> Result<()> {
        if relation.is_owned() && !self.is_child_key(key) {
            return Err(MapperError::OwnedChildReparenting {
                child: key.to_string(),
                parent: self.record.key().to_string(),
            });
        }
        Ok(())
    }

    fn store_relation(
        &mut self,
        position: usize,
        field: &Arc<FieldMetadata>,
        relation: &RelationMetadata,
        value: FieldValue,
        ctx: &dyn PersistenceContext,
    ) -> Result<()> {
        let property = self.property_name(field);
        self.deferred.push(RelationDescriptor {
            field: Arc::clone(field),
            position: self.embedded_scopes.is_empty().then_some(position),
            property: property.clone(),
            value: value.clone(),
        });
        event!(Level::DEBUG, field = %field.name, "relation deferred");

        if self.skips_owned_child_keys(relation) || self.operation != Operation::Insert {
            return Ok(());
        }
        // Array elements are only keyed once the owner is committed.
        if relation.is_array() {
            return Ok(());
        }

        let value = value.into_unwrapped();
        let stored = match &value {
            FieldValue::Null => {
                check_not_null(&self.current_class_name(), field, &value)?;
                Value::Null
            }
            FieldValue::Object(child) if relation.is_single_valued() => {
                match self.existing_child_key(relation, child, ctx)? {
                    Some(key) => Value::Key(key),
                    None => Value::Null,
                }
            }
            FieldValue::List(items) if !relation.is_single_valued() => {
                let mut keys = Vec::with_capacity(items.len());
                for child in items.iter().filter_map(|item| item.as_object()) {
                    if let Some(key) = self.existing_child_key(relation, child, ctx)? {
                        keys.push(key);
                    }
                }
                Value::from(keys)
            }
            other => {
                return Err(MapperError::UnsupportedFieldType {
                    field: field.name.clone(),
                    reason: format!("relation field holds a {} value", other.type_name()),
                });
            }
        };
        self.write_property(&property, field.indexed, stored);
        Ok(())
    }

    /// Key of a child that is already persistent; no persisting happens here.
    fn existing_child_key(
        &self,
        relation: &RelationMetadata,
        child: &ObjectRef,
        ctx: &dyn PersistenceContext,
    ) -> Result<Option<Key>> {
        let Some(key) = ctx.key_of(child) else {
            return Ok(None);
        };
        self.check_owned_child(relation, &key)?;
        Ok(Some(key))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;

    use crate::config::MapperConfig;
    use crate::core::NullRule;
    use crate::metadata::{FieldType, MetadataRegistry};
    use crate::object::ObjectId;
    use crate::registry::KeyRegistry;

    /// Context whose objects are all managed; keys and field values are
    /// whatever the test put in.
    #[derive(Default)]
    pub(crate) struct StubContext {
        pub fields: HashMap<(ObjectId, usize), FieldValue>,
        pub keys: HashMap<ObjectId, Key>,
        pub deleted: HashSet<ObjectId>,
    }

    impl PersistenceContext for StubContext {
        fn provide_field(&self, object: &ObjectRef, position: usize) -> Result<FieldValue> {
            Ok(self
                .fields
                .get(&(object.id, position))
                .cloned()
                .unwrap_or(FieldValue::Null))
        }

        fn replace_field(&mut self, object: &ObjectRef, position: usize, value: FieldValue) -> Result<()> {
            self.fields.insert((object.id, position), value);
            Ok(())
        }

        fn key_of(&self, object: &ObjectRef) -> Option<Key> {
            self.keys.get(&object.id).cloned()
        }

        fn is_deleted(&self, object: &ObjectRef) -> bool {
            self.deleted.contains(&object.id)
        }

        fn is_detached(&self, _object: &ObjectRef) -> bool {
            false
        }

        fn is_managed(&self, _object: &ObjectRef) -> bool {
            true
        }

        fn persist(&mut self, object: &ObjectRef, _registry: &mut KeyRegistry) -> Result<ObjectRef> {
            Ok(object.clone())
        }

        fn flush(&mut self, _object: &ObjectRef, _registry: &mut KeyRegistry) -> Result<()> {
            Ok(())
        }
    }

    /// Book(id: Long pk, library: parent Key, title: String)
    pub(crate) fn book_class() -> ClassMetadata {
        ClassMetadata::builder("Book")
            .field(FieldMetadata::new("id", FieldType::Long).primary_key())
            .field(FieldMetadata::new("library", FieldType::Key).parent_pk())
            .field(FieldMetadata::new("title", FieldType::String))
            .build()
            .unwrap()
    }

    /// Library(name: String pk, books: owned collection of Book)
    pub(crate) fn library_class() -> ClassMetadata {
        ClassMetadata::builder("Library")
            .field(FieldMetadata::new("name", FieldType::String).primary_key())
            .field(
                FieldMetadata::new("books", FieldType::List)
                    .relation(RelationMetadata::collection("Book")),
            )
            .build()
            .unwrap()
    }

    pub(crate) fn mapper_with_config(config: MapperConfig, classes: Vec<ClassMetadata>) -> Mapper {
        let mut registry = MetadataRegistry::new();
        for class in classes {
            registry.register(class);
        }
        Mapper::new(config, Arc::new(registry)).unwrap()
    }

    pub(crate) fn mapper_with(classes: Vec<ClassMetadata>) -> Mapper {
        mapper_with_config(MapperConfig::default(), classes)
    }

    #[test]
    fn test_regular_fields_use_property_names() {
        let class = ClassMetadata::builder("Book")
            .field(FieldMetadata::new("id", FieldType::Long).primary_key())
            .field(FieldMetadata::new("title", FieldType::String).column("book_title"))
            .field(FieldMetadata::new("isbn", FieldType::String).unindexed())
            .build()
            .unwrap();
        let mapper = mapper_with(vec![class]);
        let ctx = StubContext::default();
        let mut builder = mapper.insert(&ObjectRef::new("Book")).unwrap();

        builder.populate_field(1, "Dune".into(), &ctx).unwrap();
        builder.populate_field(2, "978-0441".into(), &ctx).unwrap();

        let record = builder.record();
        assert_eq!(record.property("book_title"), Some(&Value::Text("Dune".into())));
        assert!(!record.is_unindexed("book_title"));
        assert!(record.is_unindexed("isbn"));
    }

    #[test]
    fn test_mandatory_null_fails_before_write() {
        let class = ClassMetadata::builder("Book")
            .field(FieldMetadata::new("id", FieldType::Long).primary_key())
            .field(FieldMetadata::new("title", FieldType::String).not_null())
            .build()
            .unwrap();
        let mapper = mapper_with(vec![class]);
        let ctx = StubContext::default();
        let mut builder = mapper.insert(&ObjectRef::new("Book")).unwrap();

        let err = builder.populate_field(1, FieldValue::Null, &ctx).unwrap_err();
        assert!(matches!(
            err,
            MapperError::MandatoryFieldNull { rule: NullRule::Column, .. }
        ));
        assert!(builder.record().is_empty());
    }

    #[test]
    fn test_insertable_and_updateable() {
        let class = ClassMetadata::builder("Book")
            .field(FieldMetadata::new("id", FieldType::Long).primary_key())
            .field(FieldMetadata::new("created", FieldType::String).not_updateable())
            .field(FieldMetadata::new("revision", FieldType::Long).not_insertable())
            .build()
            .unwrap();
        let mapper = mapper_with(vec![class]);
        let ctx = StubContext::default();
        let book = ObjectRef::new("Book");

        let mut insert = mapper.insert(&book).unwrap();
        insert.populate_field(1, "today".into(), &ctx).unwrap();
        insert.populate_field(2, FieldValue::Int(1), &ctx).unwrap();
        assert!(insert.record().has_property("created"));
        assert!(!insert.record().has_property("revision"));

        let stored = EntityRecord::with_key(Key::new(None, "Book", 4).unwrap());
        let mut update = mapper.update(&book, stored).unwrap();
        update.populate_field(1, "tomorrow".into(), &ctx).unwrap();
        update.populate_field(2, FieldValue::Int(2), &ctx).unwrap();
        assert!(!update.record().has_property("created"));
        assert_eq!(update.record().property("revision"), Some(&Value::Integer(2)));
    }

    #[test]
    fn test_embedded_fields_are_flattened() {
        let address = Arc::new(
            ClassMetadata::builder("Address")
                .embeddable()
                .field(FieldMetadata::new("street", FieldType::String))
                .field(FieldMetadata::new("city", FieldType::String).mandatory())
                .build()
                .unwrap(),
        );
        let class = ClassMetadata::builder("Library")
            .field(FieldMetadata::new("name", FieldType::String).primary_key())
            .field(
                FieldMetadata::new("address", FieldType::Object("Address".into()))
                    .embedded(EmbeddedMetadata::new(address).property("street", "address_street")),
            )
            .build()
            .unwrap();
        let mapper = mapper_with(vec![class]);
        let ctx = StubContext::default();
        let mut builder = mapper.insert(&ObjectRef::new("Library")).unwrap();

        let value = FieldValue::Embedded(vec!["Main St".into(), "Springfield".into()]);
        builder.populate_field(1, value, &ctx).unwrap();
        let record = builder.record();
        assert_eq!(record.property("address_street"), Some(&Value::Text("Main St".into())));
        assert_eq!(record.property("city"), Some(&Value::Text("Springfield".into())));

        let mut builder = mapper.insert(&ObjectRef::new("Library")).unwrap();
        let extra = FieldValue::Embedded(vec!["Main St".into(), "Springfield".into(), "USA".into()]);
        let err = builder.populate_field(1, extra, &ctx).unwrap_err();
        assert!(matches!(err, MapperError::UnsupportedFieldType { .. }));
        assert!(builder.record().is_empty());

        // A null embedded object still applies the embedded null rules.
        let mut builder = mapper.insert(&ObjectRef::new("Library")).unwrap();
        let err = builder.populate_field(1, FieldValue::Null, &ctx).unwrap_err();
        match err {
            MapperError::MandatoryFieldNull { field, rule } => {
                assert_eq!(field, "Address.city");
                assert_eq!(rule, NullRule::Field);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_serialized_field_is_unindexed_blob() {
        let class = ClassMetadata::builder("Book")
            .field(FieldMetadata::new("id", FieldType::Long).primary_key())
            .field(FieldMetadata::new("tags", FieldType::List).serialized())
            .build()
            .unwrap();
        let mapper = mapper_with(vec![class]);
        let ctx = StubContext::default();
        let mut builder = mapper.insert(&ObjectRef::new("Book")).unwrap();

        builder
            .populate_field(1, FieldValue::List(vec!["sf".into()]), &ctx)
            .unwrap();
        assert!(matches!(builder.record().property("tags"), Some(Value::Blob(_))));
        assert!(builder.record().is_unindexed("tags"));
    }

    #[test]
    fn test_many_to_one_bi_writes_nothing() {
        let class = ClassMetadata::builder("Book")
            .field(FieldMetadata::new("id", FieldType::Long).primary_key())
            .field(
                FieldMetadata::new("library", FieldType::Object("Library".into()))
                    .relation(RelationMetadata::many_to_one_bi("Library")),
            )
            .build()
            .unwrap();
        let mapper = mapper_with(vec![class, library_class()]);
        let mut ctx = StubContext::default();
        let library = ObjectRef::new("Library");
        ctx.keys.insert(library.id, Key::new(None, "Library", "central").unwrap());

        let mut builder = mapper.insert(&ObjectRef::new("Book")).unwrap();
        builder
            .populate_field(1, FieldValue::Object(library), &ctx)
            .unwrap();
        assert!(builder.has_deferred_relations());
        assert!(!builder.record().has_property("library"));

        builder.key_assigned(Key::new(None, "Book", 7).unwrap()).unwrap();
        let mut registry = KeyRegistry::new();
        assert!(!builder.resolve_relations(&mut registry, &mut ctx).unwrap());
        assert!(!builder.record().has_property("library"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_array_relation_is_not_keyed_eagerly() {
        let class = ClassMetadata::builder("Shelf")
            .field(FieldMetadata::new("name", FieldType::String).primary_key())
            .field(
                FieldMetadata::new("books", FieldType::List)
                    .relation(RelationMetadata::array("Book")),
            )
            .build()
            .unwrap();
        let mapper = mapper_with(vec![class, book_class()]);
        let mut ctx = StubContext::default();
        let shelf_key = Key::new(None, "Shelf", "s1").unwrap();
        let book = ObjectRef::new("Book");
        let book_key = Key::new(Some(&shelf_key), "Book", 1).unwrap();
        ctx.keys.insert(book.id, book_key.clone());
        let books = FieldValue::List(vec![FieldValue::Object(book)]);

        let mut builder = mapper.insert(&ObjectRef::new("Shelf")).unwrap();
        builder.populate_field(0, "s1".into(), &ctx).unwrap();
        builder.populate_field(1, books, &ctx).unwrap();
        assert!(builder.has_deferred_relations());
        assert!(!builder.record().has_property("books"));

        // The committed owner gets the array's keys.
        assert!(builder.resolve_relations(&mut KeyRegistry::new(), &mut ctx).unwrap());
        assert_eq!(
            builder.record().property("books"),
            Some(&Value::List(vec![Value::Key(book_key)]))
        );
    }

    #[test]
    fn test_collection_relation_is_keyed_eagerly() {
        let mapper = mapper_with(vec![library_class(), book_class()]);
        let mut ctx = StubContext::default();
        let library_key = Key::new(None, "Library", "central").unwrap();
        let book = ObjectRef::new("Book");
        let book_key = Key::new(Some(&library_key), "Book", 1).unwrap();
        ctx.keys.insert(book.id, book_key.clone());

        let mut builder = mapper.insert(&ObjectRef::new("Library")).unwrap();
        builder.populate_field(0, "central".into(), &ctx).unwrap();
        builder
            .populate_field(1, FieldValue::List(vec![FieldValue::Object(book)]), &ctx)
            .unwrap();
        assert_eq!(
            builder.record().property("books"),
            Some(&Value::List(vec![Value::Key(book_key)]))
        );
    }
}
