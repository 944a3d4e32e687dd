use crate::core::{MapperError, Result, Value};
use crate::key::Key;

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub value: Value,
    pub indexed: bool,
}

/// Storage-native representation of one persisted object.
///
/// Properties keep insertion order. The key's kind always equals the record
/// kind; the only way to change the key is [`EntityRecord::rebuild`].
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    kind: String,
    key: Key,
    properties: Vec<Property>,
}

impl EntityRecord {
    /// Fresh record with no identifier and no parent.
    pub fn new(kind: &str) -> Result<Self> {
        Ok(Self {
            kind: kind.to_string(),
            key: Key::incomplete(kind, None)?,
            properties: Vec::new(),
        })
    }

    pub fn with_key(key: Key) -> Self {
        Self {
            kind: key.kind().to_string(),
            key,
            properties: Vec::new(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn parent(&self) -> Option<Key> {
        self.key.parent()
    }

    /// Moves every property onto a new record around `key`.
    pub fn rebuild(self, key: Key) -> Result<Self> {
        if key.kind() != self.kind {
            return Err(MapperError::KindMismatch {
                expected: self.kind,
                actual: key.kind().to_string(),
            });
        }
        Ok(Self {
            kind: self.kind,
            key,
            properties: self.properties,
        })
    }

    pub fn set_property(&mut self, name: &str, value: Value) {
        self.put(name, value, true);
    }

    pub fn set_unindexed_property(&mut self, name: &str, value: Value) {
        self.put(name, value, false);
    }

    fn put(&mut self, name: &str, value: Value, indexed: bool) {
        let indexed = indexed && !value.is_always_unindexed();
        match self.properties.iter_mut().find(|p| p.name == name) {
            Some(existing) => {
                existing.value = value;
                existing.indexed = indexed;
            }
            None => self.properties.push(Property {
                name: name.to_string(),
                value,
                indexed,
            }),
        }
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.iter().any(|p| p.name == name)
    }

    pub fn is_unindexed(&self, name: &str) -> bool {
        self.properties.iter().any(|p| p.name == name && !p.indexed)
    }

    pub fn remove_property(&mut self, name: &str) -> Option<Value> {
        let pos = self.properties.iter().position(|p| p.name == name)?;
        Some(self.properties.remove(pos).value)
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}
