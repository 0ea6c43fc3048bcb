//! Persistent unique-element set (spec §4.6), backed by a `HashDictionary`
//! from element hash to element, plus a staging dictionary for elements
//! added since the last save (spec: "a staging HashDictionary
//! (_new_objects) for Atoms that are not yet persisted").

use crate::atom::{AtomPointer, AtomValue};
use crate::error::Result;
use crate::hashing::ProtoHash;

use super::hash_dictionary::HashDictionary;

/// Persistent set of unique `AtomValue`s (spec §4.6). Iteration yields
/// unique elements in key (hash) order.
#[derive(Debug, Clone, Default)]
pub struct Set {
    pub pointer: Option<AtomPointer>,
    content: HashDictionary,
    new_objects: HashDictionary,
}

impl Set {
    pub fn new() -> Self {
        Set {
            pointer: None,
            content: HashDictionary::new(),
            new_objects: HashDictionary::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.content.len() + self.new_objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has(&self, value: &AtomValue) -> bool {
        let key = value.proto_hash();
        self.content.has(key) || self.new_objects.has(key)
    }

    pub fn add(&self, value: AtomValue) -> Set {
        let key = value.proto_hash();
        if self.has(&value) {
            return self.clone();
        }
        Set {
            pointer: None,
            content: self.content.clone(),
            new_objects: self.new_objects.set_at(key, value),
        }
    }

    pub fn remove_at(&self, value: &AtomValue) -> Result<Set> {
        let key = value.proto_hash();
        Ok(Set {
            pointer: None,
            content: self.content.remove_at(key)?,
            new_objects: self.new_objects.remove_at(key)?,
        })
    }

    /// Folds any staged (unsaved) elements into `content`, leaving the
    /// staging dictionary empty; called by the storage layer once the
    /// set's elements have been persisted (spec: "during `_save`, staged
    /// atoms are promoted into content").
    pub fn promote_staged(&self) -> Set {
        Set {
            pointer: None,
            content: self.content.merge(&self.new_objects),
            new_objects: HashDictionary::new(),
        }
    }

    pub fn union(&self, other: &Set) -> Set {
        let mut result = self.promote_staged();
        for v in other.iter() {
            result = result.add(v);
        }
        result
    }

    pub fn intersection(&self, other: &Set) -> Set {
        let mut result = Set::new();
        for v in self.iter() {
            if other.has(&v) {
                result = result.add(v);
            }
        }
        result
    }

    pub fn difference(&self, other: &Set) -> Set {
        let mut result = Set::new();
        for v in self.iter() {
            if !other.has(&v) {
                result = result.add(v);
            }
        }
        result
    }

    pub fn iter(&self) -> impl Iterator<Item = AtomValue> {
        self.content.merge(&self.new_objects).values().into_iter()
    }
}

#[cfg(test)]
#[path = "set_test.rs"]
mod set_test;
