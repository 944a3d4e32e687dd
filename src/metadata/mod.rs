// ============================================================================
// Class Metadata
// ============================================================================
//
// Immutable description of a persistable class: its kind, its fields and the
// role each field plays when an entity record is built. Roles are resolved
// once in `ClassMetadataBuilder::build` and cached on the field.
//
// ============================================================================

pub mod field;

pub use field::{
    Cardinality, ColumnMetadata, Container, EmbeddedMetadata, FieldMetadata, FieldRole, FieldType,
    MappingCapabilities, MappingDescriptor, NullValue, Ownership, RelationDirection,
    RelationMetadata,
};

use crate::core::{MapperError, Result};
use crate::key::validate_kind;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InheritanceStrategy {
    #[default]
    NewTable,
    SuperclassTable,
    SubclassTable,
    CompleteTable,
}

impl InheritanceStrategy {
    /// Strategies under which a relation may hold a subclass of its declared type.
    pub fn supports_polymorphic_relations(&self) -> bool {
        matches!(self, Self::NewTable | Self::SuperclassTable)
    }
}

#[derive(Debug, Clone)]
pub struct ClassMetadata {
    name: String,
    kind: String,
    inheritance: InheritanceStrategy,
    embeddable: bool,
    fields: Vec<Arc<FieldMetadata>>,
    primary_key: Option<usize>,
    parent_pk: Option<usize>,
    relation_positions: Vec<usize>,
}

impl ClassMetadata {
    pub fn builder(name: &str) -> ClassMetadataBuilder {
        ClassMetadataBuilder {
            name: name.to_string(),
            kind: None,
            inheritance: InheritanceStrategy::default(),
            embeddable: false,
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn inheritance(&self) -> InheritanceStrategy {
        self.inheritance
    }

    pub fn is_embeddable(&self) -> bool {
        self.embeddable
    }

    pub fn fields(&self) -> &[Arc<FieldMetadata>] {
        &self.fields
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field(&self, position: usize) -> Result<&Arc<FieldMetadata>> {
        self.fields.get(position).ok_or_else(|| {
            MapperError::InvalidMetadata(format!(
                "class {} has no field at position {}",
                self.name, position
            ))
        })
    }

    pub fn find_field(&self, name: &str) -> Option<&Arc<FieldMetadata>> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn primary_key_field(&self) -> Option<&Arc<FieldMetadata>> {
        self.primary_key.map(|pos| &self.fields[pos])
    }

    pub fn parent_pk_field(&self) -> Option<&Arc<FieldMetadata>> {
        self.parent_pk.map(|pos| &self.fields[pos])
    }

    /// Positions of every relation field, in declaration order.
    pub fn relation_positions(&self) -> &[usize] {
        &self.relation_positions
    }

    pub fn all_positions(&self) -> Vec<usize> {
        (0..self.fields.len()).collect()
    }
}

pub struct ClassMetadataBuilder {
    name: String,
    kind: Option<String>,
    inheritance: InheritanceStrategy,
    embeddable: bool,
    fields: Vec<FieldMetadata>,
}

impl ClassMetadataBuilder {
    /// Datastore kind; defaults to the class name.
    pub fn kind(mut self, kind: &str) -> Self {
        self.kind = Some(kind.to_string());
        self
    }

    pub fn inheritance(mut self, inheritance: InheritanceStrategy) -> Self {
        self.inheritance = inheritance;
        self
    }

    /// Embedded-only class: no primary key required.
    pub fn embeddable(mut self) -> Self {
        self.embeddable = true;
        self
    }

    pub fn field(mut self, field: FieldMetadata) -> Self {
        self.fields.push(field);
        self
    }

    pub fn build(self) -> Result<ClassMetadata> {
        let kind = self.kind.unwrap_or_else(|| self.name.clone());
        validate_kind(&kind).map_err(|e| MapperError::InvalidMetadata(e.to_string()))?;

        let mut primary_key = None;
        let mut parent_pk = None;
        let mut relation_positions = Vec::new();
        let mut fields = Vec::with_capacity(self.fields.len());

        for (position, mut field) in self.fields.into_iter().enumerate() {
            let role = classify(&self.name, &field)?;
            match role {
                FieldRole::PrimaryKey => {
                    if primary_key.replace(position).is_some() {
                        return Err(MapperError::InvalidMetadata(format!(
                            "class {} declares more than one primary key field",
                            self.name
                        )));
                    }
                }
                FieldRole::ParentKey => {
                    if parent_pk.replace(position).is_some() {
                        return Err(MapperError::InvalidMetadata(format!(
                            "class {} declares more than one parent key field",
                            self.name
                        )));
                    }
                }
                FieldRole::Relation => relation_positions.push(position),
                _ => {}
            }
            field.position = position;
            field.role = role;
            fields.push(Arc::new(field));
        }

        if primary_key.is_none() && !self.embeddable {
            return Err(MapperError::InvalidMetadata(format!(
                "class {} has no primary key field",
                self.name
            )));
        }

        Ok(ClassMetadata {
            name: self.name,
            kind,
            inheritance: self.inheritance,
            embeddable: self.embeddable,
            fields,
            primary_key,
            parent_pk,
            relation_positions,
        })
    }
}

fn classify(class: &str, field: &FieldMetadata) -> Result<FieldRole> {
    let key_flags = [field.primary_key, field.parent_pk, field.pk_name, field.pk_id];
    if key_flags.iter().filter(|flag| **flag).count() > 1 {
        return Err(MapperError::InvalidMetadata(format!(
            "field {} carries more than one key role",
            field.full_name(class)
        )));
    }
    if field.relation.is_some() && key_flags.iter().any(|flag| *flag) {
        return Err(MapperError::InvalidMetadata(format!(
            "relation field {} cannot be part of the key",
            field.full_name(class)
        )));
    }

    let role = if field.primary_key {
        FieldRole::PrimaryKey
    } else if field.parent_pk {
        FieldRole::ParentKey
    } else if field.pk_name {
        FieldRole::PrimaryKeyName
    } else if field.pk_id {
        FieldRole::PrimaryKeyId
    } else if field.relation.is_some() {
        FieldRole::Relation
    } else {
        FieldRole::Regular
    };
    Ok(role)
}

/// Source of class metadata, queried per save.
pub trait ClassMetadataProvider: Send + Sync {
    fn class_metadata(&self, class: &str) -> Option<Arc<ClassMetadata>>;
}

/// In-memory provider keyed by class name.
#[derive(Debug, Clone, Default)]
pub struct MetadataRegistry {
    classes: HashMap<String, Arc<ClassMetadata>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, class: ClassMetadata) -> Arc<ClassMetadata> {
        let class = Arc::new(class);
        self.classes.insert(class.name().to_string(), Arc::clone(&class));
        class
    }

    pub fn with_class(mut self, class: ClassMetadata) -> Self {
        self.register(class);
        self
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl ClassMetadataProvider for MetadataRegistry {
    fn class_metadata(&self, class: &str) -> Option<Arc<ClassMetadata>> {
        self.classes.get(class).cloned()
    }
}
