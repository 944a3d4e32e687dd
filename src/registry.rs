use std::collections::{HashMap, HashSet};

use crate::key::Key;
use crate::object::ObjectId;

/// Parent keys waiting to be picked up by owned children, for one unit of work.
///
/// A parent's relation pass registers its key against each owned child; the
/// child's own save takes it when establishing its entity group. Objects
/// reached only through unowned relations are remembered so they stay roots.
#[derive(Debug, Default)]
pub struct KeyRegistry {
    parent_keys: HashMap<ObjectId, Key>,
    unowned: HashSet<ObjectId>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_parent_key(&mut self, child: ObjectId, parent: Key) {
        self.parent_keys.insert(child, parent);
    }

    pub fn parent_key(&self, child: &ObjectId) -> Option<&Key> {
        self.parent_keys.get(child)
    }

    /// Removes and returns the registered parent key of `child`.
    pub fn take_parent_key(&mut self, child: &ObjectId) -> Option<Key> {
        self.parent_keys.remove(child)
    }

    pub fn register_unowned(&mut self, object: ObjectId) {
        self.unowned.insert(object);
    }

    pub fn is_unowned(&self, object: &ObjectId) -> bool {
        self.unowned.contains(object)
    }

    pub fn is_empty(&self) -> bool {
        self.parent_keys.is_empty() && self.unowned.is_empty()
    }

    /// Ends the unit of work.
    pub fn clear(&mut self) {
        self.parent_keys.clear();
        self.unowned.clear();
    }
}
