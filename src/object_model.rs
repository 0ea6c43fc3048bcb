//! User-facing persisted node kinds (spec §3.1): the object-space root,
//! interned string literals, out-of-line byte blobs, immutable attribute
//! bags and the mutable-slot indirection layered on top of them.

use chrono::{DateTime, Utc};
use im::OrdMap;

use crate::atom::{AtomPointer, AtomValue};

/// `RootObject`: `{object_root, literal_root, created_at}` (spec §3.1).
#[derive(Debug, Clone)]
pub struct RootObject {
    pub pointer: Option<AtomPointer>,
    pub object_root: AtomValue,
    pub literal_root: AtomValue,
    pub created_at: DateTime<Utc>,
}

impl RootObject {
    pub fn new(object_root: AtomValue, literal_root: AtomValue, created_at: DateTime<Utc>) -> Self {
        RootObject {
            pointer: None,
            object_root,
            literal_root,
            created_at,
        }
    }
}

/// Interned immutable string (spec §3.1): equal by string value, unique
/// per Object Space via `RootObject.literal_root`.
#[derive(Debug, Clone)]
pub struct Literal {
    pub pointer: Option<AtomPointer>,
    pub string: String,
}

impl Literal {
    pub fn new(string: impl Into<String>) -> Self {
        Literal {
            pointer: None,
            string: string.into(),
        }
    }
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        self.string == other.string
    }
}

impl Eq for Literal {}

impl PartialEq<str> for Literal {
    fn eq(&self, other: &str) -> bool {
        self.string == other
    }
}

/// Out-of-line byte blob with its own pointer (spec §3.1, §9: "preserve
/// `BytesAtom` indirection for size bounds and caching uniformity").
#[derive(Debug, Clone)]
pub struct BytesAtom {
    pub pointer: Option<AtomPointer>,
    pub content: Vec<u8>,
}

impl BytesAtom {
    pub fn new(content: Vec<u8>) -> Self {
        BytesAtom {
            pointer: None,
            content,
        }
    }
}

/// Immutable attribute bag (spec §3.1). `im::OrdMap` gives the
/// "structural copy" semantics spec.md demands for mutation (`with_attr`
/// returns a new bag sharing unchanged subtrees) without hand-rolling a
/// persistent map a second time alongside the AVL collections.
#[derive(Debug, Clone, Default)]
pub struct DBObject {
    pub pointer: Option<AtomPointer>,
    pub attributes: OrdMap<String, AtomValue>,
}

impl DBObject {
    pub fn new() -> Self {
        DBObject {
            pointer: None,
            attributes: OrdMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> AtomValue {
        self.attributes.get(name).cloned().unwrap_or(AtomValue::Null)
    }

    /// Returns a new, unsaved `DBObject` with `name` bound to `value`;
    /// `self` is left untouched (spec §3.1: "mutation returns a new
    /// DBObject with the updated field").
    pub fn with_attr(&self, name: impl Into<String>, value: AtomValue) -> DBObject {
        DBObject {
            pointer: None,
            attributes: self.attributes.update(name.into(), value),
        }
    }

    pub fn without_attr(&self, name: &str) -> DBObject {
        DBObject {
            pointer: None,
            attributes: self.attributes.without(name),
        }
    }
}

/// The record a `MutableObject` indirects through: a slot id plus the
/// `DBObject` version currently occupying `_mutable_root[slot]` as seen
/// by one transaction (spec §3.1, §4.7).
#[derive(Debug, Clone)]
pub struct MutableObjectState {
    pub pointer: Option<AtomPointer>,
    pub hash_key: u128,
}

impl MutableObjectState {
    pub fn new(hash_key: u128) -> Self {
        MutableObjectState {
            pointer: None,
            hash_key,
        }
    }

    /// Folds a 128-bit slot id into the 64-bit key `_mutable_root` (a
    /// `HashDictionary`) is keyed by, with the same XOR-fold
    /// `AtomPointer::proto_hash` uses (spec §3.1, §3.2).
    pub fn slot_key(hash_key: u128) -> i64 {
        (hash_key ^ (hash_key >> 64)) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_object_mutation_does_not_touch_the_original() {
        let a = DBObject::new().with_attr("x", AtomValue::Int(1));
        let b = a.with_attr("x", AtomValue::Int(2));
        assert_eq!(a.get("x").as_i64(), Some(1));
        assert_eq!(b.get("x").as_i64(), Some(2));
    }

    #[test]
    fn missing_attribute_reads_as_null() {
        let a = DBObject::new();
        assert!(a.get("missing").is_none());
    }
}
