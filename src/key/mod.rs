// ============================================================================
// Hierarchical Keys
// ============================================================================
//
// A key is a path of (kind, identifier) segments. Every segment but the last
// is a complete ancestor; the last one may still wait for a datastore id.
//
// ============================================================================

pub mod codec;

pub use codec::{create_key, derive_parent, key_to_string, string_to_key};

use crate::core::{MapperError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

lazy_static::lazy_static! {
    static ref RESERVED_KIND: Regex = Regex::new(r"^__.*__$").expect("static regex");
}

/// Identifier of a single key segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyId {
    /// Kind only; the datastore assigns an id on commit.
    Incomplete,
    /// System-assigned numeric id (always positive).
    Id(i64),
    /// Application-assigned name.
    Name(String),
}

/// Numeric id or textual name used when creating a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdOrName {
    Id(i64),
    Name(String),
}

impl From<i64> for IdOrName {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for IdOrName {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for IdOrName {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeySegment {
    kind: String,
    id: KeyId,
}

impl KeySegment {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> &KeyId {
        &self.id
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Key {
    path: Vec<KeySegment>,
}

pub(crate) fn validate_kind(kind: &str) -> Result<()> {
    if kind.is_empty() {
        return Err(MapperError::InvalidKey("kind cannot be empty".to_string()));
    }
    if RESERVED_KIND.is_match(kind) {
        return Err(MapperError::InvalidKey(format!("kind '{}' is reserved", kind)));
    }
    Ok(())
}

fn segment(kind: &str, id: IdOrName) -> Result<KeySegment> {
    validate_kind(kind)?;
    let id = match id {
        IdOrName::Id(id) if id <= 0 => {
            return Err(MapperError::InvalidKey(format!(
                "id must be positive, got {} for kind {}",
                id, kind
            )));
        }
        IdOrName::Id(id) => KeyId::Id(id),
        IdOrName::Name(name) if name.is_empty() => {
            return Err(MapperError::InvalidKey(format!(
                "name cannot be empty for kind {}",
                kind
            )));
        }
        IdOrName::Name(name) => KeyId::Name(name),
    };
    Ok(KeySegment { kind: kind.to_string(), id })
}

fn ancestor_path(parent: Option<&Key>) -> Result<Vec<KeySegment>> {
    match parent {
        None => Ok(Vec::new()),
        Some(p) if !p.is_complete() => Err(MapperError::InvalidKey(format!(
            "parent key {} is incomplete",
            p
        ))),
        Some(p) => Ok(p.path.clone()),
    }
}

impl Key {
    /// Complete key of the given kind under an optional complete parent.
    pub fn new(parent: Option<&Key>, kind: &str, id: impl Into<IdOrName>) -> Result<Self> {
        let mut path = ancestor_path(parent)?;
        path.push(segment(kind, id.into())?);
        Ok(Self { path })
    }

    /// Key whose identifier is left for the datastore to assign.
    pub fn incomplete(kind: &str, parent: Option<&Key>) -> Result<Self> {
        validate_kind(kind)?;
        let mut path = ancestor_path(parent)?;
        path.push(KeySegment {
            kind: kind.to_string(),
            id: KeyId::Incomplete,
        });
        Ok(Self { path })
    }

    pub(crate) fn from_path(path: Vec<KeySegment>) -> Result<Self> {
        let Some((_, ancestors)) = path.split_last() else {
            return Err(MapperError::InvalidKey("key path cannot be empty".to_string()));
        };
        for seg in ancestors {
            if seg.id == KeyId::Incomplete {
                return Err(MapperError::InvalidKey(format!(
                    "ancestor of kind {} is incomplete",
                    seg.kind
                )));
            }
        }
        for seg in path.iter() {
            validate_kind(&seg.kind)?;
            match &seg.id {
                KeyId::Id(id) if *id <= 0 => {
                    return Err(MapperError::InvalidKey(format!("id must be positive, got {}", id)));
                }
                KeyId::Name(name) if name.is_empty() => {
                    return Err(MapperError::InvalidKey("name cannot be empty".to_string()));
                }
                _ => {}
            }
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &[KeySegment] {
        &self.path
    }

    fn last(&self) -> &KeySegment {
        // path is never empty by construction
        &self.path[self.path.len() - 1]
    }

    pub fn kind(&self) -> &str {
        &self.last().kind
    }

    pub fn identifier(&self) -> &KeyId {
        &self.last().id
    }

    pub fn id(&self) -> Option<i64> {
        match self.last().id {
            KeyId::Id(id) => Some(id),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match &self.last().id {
            KeyId::Name(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.last().id != KeyId::Incomplete
    }

    pub fn parent(&self) -> Option<Key> {
        derive_parent(self)
    }

    pub fn has_parent(&self) -> bool {
        self.path.len() > 1
    }

    /// Root of the entity group this key belongs to.
    pub fn root(&self) -> Key {
        Key {
            path: vec![self.path[0].clone()],
        }
    }

    pub fn is_ancestor_of(&self, other: &Key) -> bool {
        other.path.len() > self.path.len() && other.path.starts_with(&self.path)
    }

    /// Same kind and identifier placed under a different parent.
    pub fn with_parent(&self, parent: &Key) -> Result<Key> {
        let mut path = ancestor_path(Some(parent))?;
        path.push(self.last().clone());
        Ok(Key { path })
    }

    /// Completes an incomplete key with a datastore-assigned id.
    pub fn complete_with_id(&self, id: i64) -> Result<Key> {
        if self.is_complete() {
            return Err(MapperError::InvalidKey(format!("key {} is already complete", self)));
        }
        let parent = self.parent();
        Key::new(parent.as_ref(), self.kind(), id)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.path.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            match &seg.id {
                KeyId::Incomplete => write!(f, "{}(no-id-yet)", seg.kind)?,
                KeyId::Id(id) => write!(f, "{}({})", seg.kind, id)?,
                KeyId::Name(name) => write!(f, "{}(\"{}\")", seg.kind, name)?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self)
    }
}

impl TryFrom<String> for Key {
    type Error = MapperError;

    fn try_from(token: String) -> Result<Self> {
        string_to_key(&token)
    }
}

impl From<Key> for String {
    fn from(key: Key) -> Self {
        key_to_string(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_and_root() {
        let library = Key::new(None, "Library", "central").unwrap();
        let shelf = Key::new(Some(&library), "Shelf", 3).unwrap();
        let book = Key::new(Some(&shelf), "Book", 12).unwrap();

        assert_eq!(book.parent(), Some(shelf.clone()));
        assert_eq!(book.root(), library);
        assert!(library.is_ancestor_of(&book));
        assert!(!book.is_ancestor_of(&library));
        assert_eq!(library.parent(), None);
        assert_eq!(book.to_string(), "Library(\"central\")/Shelf(3)/Book(12)");
    }

    #[test]
    fn test_incomplete_key() {
        let library = Key::new(None, "Library", "central").unwrap();
        let book = Key::incomplete("Book", Some(&library)).unwrap();
        assert!(!book.is_complete());
        assert_eq!(book.kind(), "Book");
        assert_eq!(book.parent(), Some(library.clone()));

        let done = book.complete_with_id(7).unwrap();
        assert_eq!(done.id(), Some(7));
        assert_eq!(done.parent(), Some(library));
        assert!(done.complete_with_id(8).is_err());
    }

    #[test]
    fn test_invalid_keys() {
        assert!(Key::new(None, "", 1).is_err());
        assert!(Key::new(None, "__reserved__", 1).is_err());
        assert!(Key::new(None, "Book", 0).is_err());
        assert!(Key::new(None, "Book", "").is_err());

        let pending = Key::incomplete("Library", None).unwrap();
        assert!(Key::new(Some(&pending), "Book", 1).is_err());
    }

    #[test]
    fn test_with_parent_keeps_identifier() {
        let book = Key::new(None, "Book", "dune").unwrap();
        let library = Key::new(None, "Library", 4).unwrap();
        let moved = book.with_parent(&library).unwrap();
        assert_eq!(moved.name(), Some("dune"));
        assert_eq!(moved.parent(), Some(library));
    }
}
