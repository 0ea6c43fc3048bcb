//! Persistent multiset (spec §4.6), backed by two `HashDictionary`s: one
//! holding the unique elements (`items`) and one holding per-key
//! multiplicities (`counts`). `add`/`remove_at` only touch `items` on the
//! first insertion / last removal of a key.

use crate::atom::{AtomPointer, AtomValue};
use crate::error::Result;
use crate::hashing::ProtoHash;

use super::hash_dictionary::HashDictionary;

/// Persistent multiset over `AtomValue` (spec §4.6). `len()` reports the
/// number of unique elements; `total_count()` sums multiplicities.
#[derive(Debug, Clone, Default)]
pub struct CountedSet {
    pub pointer: Option<AtomPointer>,
    items: HashDictionary,
    counts: HashDictionary,
}

impl CountedSet {
    pub fn new() -> Self {
        CountedSet {
            pointer: None,
            items: HashDictionary::new(),
            counts: HashDictionary::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Current multiplicity of `value`, `0` if absent.
    pub fn count_of(&self, value: &AtomValue) -> i64 {
        let key = value.proto_hash();
        self.counts.get_at(key).and_then(|v| v.as_i64()).unwrap_or(0)
    }

    pub fn total_count(&self) -> i64 {
        self.counts.values().iter().filter_map(|v| v.as_i64()).sum()
    }

    pub fn has(&self, value: &AtomValue) -> bool {
        self.count_of(value) > 0
    }

    /// First `add(x)` registers `x` in `items` (spec: "first insertion
    /// performs `add2indexes`"); subsequent adds only bump the counter.
    pub fn add(&self, value: AtomValue) -> CountedSet {
        let key = value.proto_hash();
        let current = self.count_of(&value);
        let items = if current == 0 {
            self.items.set_at(key, value.clone())
        } else {
            self.items.clone()
        };
        CountedSet {
            pointer: None,
            items,
            counts: self.counts.set_at(key, AtomValue::Int(current + 1)),
        }
    }

    /// Last `remove_at(x)` drops `x` from `items` (spec: "last removal
    /// performs `remove_from_indexes`"); intermediate decrements leave
    /// `items` untouched. Removing an absent element is a no-op.
    pub fn remove_at(&self, value: &AtomValue) -> Result<CountedSet> {
        let key = value.proto_hash();
        let current = self.count_of(value);
        if current == 0 {
            return Ok(self.clone());
        }
        if current == 1 {
            Ok(CountedSet {
                pointer: None,
                items: self.items.remove_at(key)?,
                counts: self.counts.remove_at(key)?,
            })
        } else {
            Ok(CountedSet {
                pointer: None,
                items: self.items.clone(),
                counts: self.counts.set_at(key, AtomValue::Int(current - 1)),
            })
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = AtomValue> {
        self.items.values().into_iter()
    }
}

#[cfg(test)]
#[path = "counted_set_test.rs"]
mod counted_set_test;
