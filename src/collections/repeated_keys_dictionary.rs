//! Dictionary whose values are `Set`s (spec §4.6): `set_at(k, v)` reads or
//! creates the bucket for `k` and inserts `v`; the underlying keyed
//! storage is the same string-keyed `Dictionary` used elsewhere, with
//! `AtomValue::Atom(AnyAtom::Set(..))` as the stored value.

use std::rc::Rc;

use crate::atom::{AnyAtom, AtomPointer, AtomValue};
use crate::error::Result;

use super::dictionary::Dictionary;
use super::set::Set;

fn bucket_of(value: &AtomValue) -> Set {
    match value {
        AtomValue::Atom(a) => match a.as_ref() {
            AnyAtom::Set(s) => s.clone(),
            _ => Set::new(),
        },
        _ => Set::new(),
    }
}

fn wrap(set: Set) -> AtomValue {
    AtomValue::Atom(Rc::new(AnyAtom::Set(set)))
}

/// Persistent multi-valued dictionary: each key maps to a `Set` of values
/// (spec §4.6). Used by `add_index` to group elements by extracted key.
#[derive(Debug, Clone, Default)]
pub struct RepeatedKeysDictionary {
    pub pointer: Option<AtomPointer>,
    buckets: Dictionary,
}

impl RepeatedKeysDictionary {
    pub fn new() -> Self {
        RepeatedKeysDictionary {
            pointer: None,
            buckets: Dictionary::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn get_at(&self, key: &str) -> Set {
        self.buckets.get_at(key).map(|v| bucket_of(&v)).unwrap_or_default()
    }

    pub fn has(&self, key: &str) -> bool {
        self.buckets.has(key)
    }

    /// Inserts `value` into the bucket for `key`, creating the bucket if
    /// it doesn't yet exist (spec: "reads or creates the bucket and adds
    /// v").
    pub fn set_at(&self, key: impl Into<String>, value: AtomValue) -> Result<RepeatedKeysDictionary> {
        let key = key.into();
        let bucket = self.get_at(&key).add(value);
        Ok(RepeatedKeysDictionary {
            pointer: None,
            buckets: self.buckets.set_at(key, wrap(bucket))?,
        })
    }

    /// Removes a single value from the bucket for `key`, leaving an empty
    /// bucket in place if it was the last member (spec only names
    /// `remove_at(k)` for dropping the whole bucket).
    pub fn remove_record_at(&self, key: &str, value: &AtomValue) -> Result<RepeatedKeysDictionary> {
        let bucket = self.get_at(key).remove_at(value)?;
        Ok(RepeatedKeysDictionary {
            pointer: None,
            buckets: self.buckets.set_at(key, wrap(bucket))?,
        })
    }

    /// Drops the whole bucket for `key` (spec: "`remove_at(k)` removes
    /// the whole bucket").
    pub fn remove_at(&self, key: &str) -> Result<RepeatedKeysDictionary> {
        Ok(RepeatedKeysDictionary {
            pointer: None,
            buckets: self.buckets.remove_at(key)?,
        })
    }

    pub fn keys(&self) -> Vec<String> {
        self.buckets.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (String, Set)> + '_ {
        self.buckets.iter().map(|(k, v)| (k, bucket_of(&v)))
    }
}

#[cfg(test)]
#[path = "repeated_keys_dictionary_test.rs"]
mod repeated_keys_dictionary_test;
