use std::sync::Arc;

use crate::builder::{EntityRecordBuilder, Operation};
use crate::config::MapperConfig;
use crate::convert::{DefaultPropertyNamer, FieldSerializer, FieldValueConverter, PropertyNamer};
use crate::core::{MapperError, Result};
use crate::metadata::{ClassMetadata, ClassMetadataProvider, FieldMetadata};
use crate::object::ObjectRef;
use crate::record::EntityRecord;

/// Entry point: configuration plus the collaborators every save needs.
///
/// ```
/// use std::sync::Arc;
/// use entitymapper::{ClassMetadata, FieldMetadata, FieldType, Mapper, MapperConfig, MetadataRegistry, ObjectRef};
///
/// let registry = MetadataRegistry::new().with_class(
///     ClassMetadata::builder("Book")
///         .field(FieldMetadata::new("id", FieldType::Long).primary_key())
///         .build()
///         .unwrap(),
/// );
/// let mapper = Mapper::new(MapperConfig::default(), Arc::new(registry)).unwrap();
/// let builder = mapper.insert(&ObjectRef::new("Book")).unwrap();
/// assert_eq!(builder.record().kind(), "Book");
/// ```
pub struct Mapper {
    config: MapperConfig,
    converter: FieldValueConverter,
    namer: Arc<dyn PropertyNamer>,
    metadata: Arc<dyn ClassMetadataProvider>,
}

impl Mapper {
    pub fn new(config: MapperConfig, metadata: Arc<dyn ClassMetadataProvider>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            converter: FieldValueConverter::new(config.large_text_threshold),
            config,
            namer: Arc::new(DefaultPropertyNamer),
            metadata,
        })
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn FieldSerializer>) -> Self {
        self.converter = self.converter.with_serializer(serializer);
        self
    }

    pub fn with_property_namer(mut self, namer: Arc<dyn PropertyNamer>) -> Self {
        self.namer = namer;
        self
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    pub fn converter(&self) -> &FieldValueConverter {
        &self.converter
    }

    pub fn property_name(&self, field: &FieldMetadata) -> String {
        self.namer.property_name(field)
    }

    pub fn class_metadata(&self, class: &str) -> Result<Arc<ClassMetadata>> {
        self.metadata
            .class_metadata(class)
            .ok_or_else(|| MapperError::UnknownClass(class.to_string()))
    }

    /// Builder for a new record of the object's kind.
    pub fn insert(&self, object: &ObjectRef) -> Result<EntityRecordBuilder<'_>> {
        let class = self.class_metadata(&object.class)?;
        let record = EntityRecord::new(class.kind())?;
        Ok(EntityRecordBuilder::new(self, object.clone(), class, record, Operation::Insert))
    }

    /// Builder that updates an existing record.
    pub fn update(&self, object: &ObjectRef, record: EntityRecord) -> Result<EntityRecordBuilder<'_>> {
        let class = self.class_metadata(&object.class)?;
        if record.kind() != class.kind() {
            return Err(MapperError::KindMismatch {
                expected: class.kind().to_string(),
                actual: record.kind().to_string(),
            });
        }
        Ok(EntityRecordBuilder::new(self, object.clone(), class, record, Operation::Update))
    }
}
