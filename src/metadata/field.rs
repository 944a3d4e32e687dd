use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::ClassMetadata;

/// Declared type of a persistable field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Long,
    Integer,
    Double,
    Boolean,
    String,
    Key,
    Bytes,
    DateTime,
    List,
    /// Reference to a persistable class.
    Object(String),
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "Long"),
            Self::Integer => write!(f, "Integer"),
            Self::Double => write!(f, "Double"),
            Self::Boolean => write!(f, "Boolean"),
            Self::String => write!(f, "String"),
            Self::Key => write!(f, "Key"),
            Self::Bytes => write!(f, "Bytes"),
            Self::DateTime => write!(f, "DateTime"),
            Self::List => write!(f, "List"),
            Self::Object(class) => write!(f, "{}", class),
        }
    }
}

/// Role of a field in building the entity record, resolved once per class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    PrimaryKey,
    ParentKey,
    /// Name component of the primary key (the kind comes from the class).
    PrimaryKeyName,
    /// Numeric id component of the primary key.
    PrimaryKeyId,
    Regular,
    Relation,
}

/// Field-level policy for null values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NullValue {
    #[default]
    None,
    Exception,
    Default,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMetadata {
    pub name: Option<String>,
    pub allows_null: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Collection,
    Array,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Single,
    Multi(Container),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Owned,
    Unowned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationDirection {
    ManyToOneBi,
    OneToOneBi,
    Other,
}

/// What the storage mapping behind a relation field can do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MappingCapabilities {
    /// Writes a foreign-key-like value into the owner record.
    pub eager_foreign_key: bool,
    /// Wants post-insert / post-update notifications.
    pub lifecycle_callbacks: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MappingDescriptor {
    pub capabilities: MappingCapabilities,
    /// The field points at the owner's parent, so ancestry already carries it.
    pub parent_key_provider: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationMetadata {
    pub cardinality: Cardinality,
    pub ownership: Ownership,
    pub direction: RelationDirection,
    pub mapped_by: Option<String>,
    /// Declared class of the related object (element class for multi-valued).
    pub element_class: String,
    pub mapping: MappingDescriptor,
}

impl RelationMetadata {
    /// Owned single-valued relation to a persistable mapping.
    pub fn single(element_class: &str) -> Self {
        Self {
            cardinality: Cardinality::Single,
            ownership: Ownership::Owned,
            direction: RelationDirection::Other,
            mapped_by: None,
            element_class: element_class.to_string(),
            mapping: MappingDescriptor {
                capabilities: MappingCapabilities {
                    eager_foreign_key: true,
                    lifecycle_callbacks: false,
                },
                parent_key_provider: false,
            },
        }
    }

    /// Owned collection relation; collection mappings take lifecycle callbacks.
    pub fn collection(element_class: &str) -> Self {
        Self {
            cardinality: Cardinality::Multi(Container::Collection),
            mapping: MappingDescriptor {
                capabilities: MappingCapabilities {
                    eager_foreign_key: false,
                    lifecycle_callbacks: true,
                },
                parent_key_provider: false,
            },
            ..Self::single(element_class)
        }
    }

    pub fn array(element_class: &str) -> Self {
        Self {
            cardinality: Cardinality::Multi(Container::Array),
            ..Self::collection(element_class)
        }
    }

    /// Child-side pointer to the owning parent.
    pub fn many_to_one_bi(parent_class: &str) -> Self {
        Self {
            direction: RelationDirection::ManyToOneBi,
            mapping: MappingDescriptor {
                capabilities: MappingCapabilities {
                    eager_foreign_key: true,
                    lifecycle_callbacks: false,
                },
                parent_key_provider: true,
            },
            ..Self::single(parent_class)
        }
    }

    pub fn unowned(mut self) -> Self {
        self.ownership = Ownership::Unowned;
        self
    }

    pub fn one_to_one_bi(mut self) -> Self {
        self.direction = RelationDirection::OneToOneBi;
        self
    }

    pub fn mapped_by(mut self, field: &str) -> Self {
        self.mapped_by = Some(field.to_string());
        self
    }

    pub fn parent_key_provider(mut self) -> Self {
        self.mapping.parent_key_provider = true;
        self
    }

    pub fn capabilities(mut self, capabilities: MappingCapabilities) -> Self {
        self.mapping.capabilities = capabilities;
        self
    }

    pub fn is_owned(&self) -> bool {
        self.ownership == Ownership::Owned
    }

    pub fn is_single_valued(&self) -> bool {
        self.cardinality == Cardinality::Single
    }

    pub fn is_array(&self) -> bool {
        self.cardinality == Cardinality::Multi(Container::Array)
    }

    /// Non-owning side of a bidirectional relation: never stores the other side.
    pub fn is_non_owning_side(&self) -> bool {
        match self.direction {
            RelationDirection::ManyToOneBi => true,
            RelationDirection::OneToOneBi => self.mapped_by.is_some(),
            RelationDirection::Other => false,
        }
    }
}

/// Embedded object: the embedded class plus column overrides for this owner.
#[derive(Debug, Clone)]
pub struct EmbeddedMetadata {
    pub class: Arc<ClassMetadata>,
    pub property_overrides: HashMap<String, String>,
}

impl EmbeddedMetadata {
    pub fn new(class: Arc<ClassMetadata>) -> Self {
        Self {
            class,
            property_overrides: HashMap::new(),
        }
    }

    pub fn property(mut self, field: &str, property: &str) -> Self {
        self.property_overrides.insert(field.to_string(), property.to_string());
        self
    }
}

#[derive(Debug, Clone)]
pub struct FieldMetadata {
    pub name: String,
    pub field_type: FieldType,
    pub primary_key: bool,
    pub parent_pk: bool,
    pub pk_name: bool,
    pub pk_id: bool,
    /// String key field holding an encoded key token.
    pub encoded_key: bool,
    pub null_value: NullValue,
    pub column: Option<ColumnMetadata>,
    pub serialized: bool,
    pub large_text: bool,
    pub indexed: bool,
    pub insertable: bool,
    pub updateable: bool,
    pub embedded: Option<EmbeddedMetadata>,
    pub relation: Option<RelationMetadata>,
    pub(crate) position: usize,
    pub(crate) role: FieldRole,
}

impl FieldMetadata {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            primary_key: false,
            parent_pk: false,
            pk_name: false,
            pk_id: false,
            encoded_key: false,
            null_value: NullValue::None,
            column: None,
            serialized: false,
            large_text: false,
            indexed: true,
            insertable: true,
            updateable: true,
            embedded: None,
            relation: None,
            position: 0,
            role: FieldRole::Regular,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn parent_pk(mut self) -> Self {
        self.parent_pk = true;
        self
    }

    pub fn pk_name(mut self) -> Self {
        self.pk_name = true;
        self
    }

    pub fn pk_id(mut self) -> Self {
        self.pk_id = true;
        self
    }

    pub fn encoded_key(mut self) -> Self {
        self.encoded_key = true;
        self
    }

    /// Null values raise an error (field-level rule).
    pub fn mandatory(mut self) -> Self {
        self.null_value = NullValue::Exception;
        self
    }

    /// Column declared not-nullable (column-level rule).
    pub fn not_null(mut self) -> Self {
        let column = self.column.get_or_insert_with(ColumnMetadata::default);
        column.allows_null = Some(false);
        self
    }

    pub fn column(mut self, name: &str) -> Self {
        let column = self.column.get_or_insert_with(ColumnMetadata::default);
        column.name = Some(name.to_string());
        self
    }

    pub fn serialized(mut self) -> Self {
        self.serialized = true;
        self
    }

    pub fn large_text(mut self) -> Self {
        self.large_text = true;
        self
    }

    pub fn unindexed(mut self) -> Self {
        self.indexed = false;
        self
    }

    pub fn not_insertable(mut self) -> Self {
        self.insertable = false;
        self
    }

    pub fn not_updateable(mut self) -> Self {
        self.updateable = false;
        self
    }

    pub fn embedded(mut self, embedded: EmbeddedMetadata) -> Self {
        self.embedded = Some(embedded);
        self
    }

    pub fn relation(mut self, relation: RelationMetadata) -> Self {
        self.relation = Some(relation);
        self
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn role(&self) -> FieldRole {
        self.role
    }

    pub fn full_name(&self, class: &str) -> String {
        format!("{}.{}", class, self.name)
    }
}
