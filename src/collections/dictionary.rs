//! Ordered string-keyed map (spec §4.6): a `List` of `{key, value}` pairs
//! kept sorted by `key`. Point operations binary search directly against
//! the backing `List`'s order-statistics index (`List::get_at`) rather
//! than flattening to a `Vec` first, so they stay O(log^2 n) — a binary
//! search of O(log n) steps, each an O(log n) `List::get_at` — instead of
//! the O(n) a full flatten would cost (spec §4.6: "mutations delegate to
//! the List and remain O(log n)").

use crate::atom::{AtomPointer, AtomValue};
use crate::error::Result;

use super::list::List;

fn entry_to_atom(key: &str, value: &AtomValue) -> AtomValue {
    let pair = List::new().append_last(AtomValue::str(key)).append_last(value.clone());
    AtomValue::Atom(std::rc::Rc::new(crate::atom::AnyAtom::List(pair)))
}

fn entry_key(v: &AtomValue) -> String {
    match v {
        AtomValue::Atom(a) => match a.as_ref() {
            crate::atom::AnyAtom::List(pair) => pair.get_at(0).and_then(|v| v.as_str().map(str::to_owned)).unwrap_or_default(),
            _ => String::new(),
        },
        _ => String::new(),
    }
}

fn entry_value(v: &AtomValue) -> AtomValue {
    match v {
        AtomValue::Atom(a) => match a.as_ref() {
            crate::atom::AnyAtom::List(pair) => pair.get_at(1).unwrap_or(AtomValue::Null),
            _ => AtomValue::Null,
        },
        _ => AtomValue::Null,
    }
}

/// Persistent string-keyed ordered map (spec §4.6). Values are stored in
/// the backing `List` as two-element sub-lists `[key, value]` so the
/// whole structure is expressible purely in terms of `AtomValue`.
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    pub pointer: Option<AtomPointer>,
    entries: List,
}

impl Dictionary {
    pub fn new() -> Self {
        Dictionary { pointer: None, entries: List::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Binary searches the backing list by key, fetching only the
    /// entries the search actually visits (`O(log n)` calls to
    /// `List::get_at`, each itself `O(log n)`).
    fn position(&self, key: &str) -> std::result::Result<usize, usize> {
        let mut lo = 0usize;
        let mut hi = self.entries.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let entry = self.entries.get_at(mid as i64).expect("mid is within [lo, hi) <= len");
            match entry_key(&entry).as_str().cmp(key) {
                std::cmp::Ordering::Equal => return Ok(mid),
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        Err(lo)
    }

    pub fn has(&self, key: &str) -> bool {
        self.position(key).is_ok()
    }

    pub fn get_at(&self, key: &str) -> Option<AtomValue> {
        let i = self.position(key).ok()?;
        self.entries.get_at(i as i64).map(|e| entry_value(&e))
    }

    pub fn set_at(&self, key: impl Into<String>, value: AtomValue) -> Result<Dictionary> {
        let key = key.into();
        let entry = entry_to_atom(&key, &value);
        let new_list = match self.position(&key) {
            Ok(i) => self.entries.set_at(i as i64, entry)?,
            Err(i) => self.entries.insert_at(i as i64, entry)?,
        };
        Ok(Dictionary { pointer: None, entries: new_list })
    }

    pub fn remove_at(&self, key: &str) -> Result<Dictionary> {
        match self.position(key) {
            Ok(i) => Ok(Dictionary {
                pointer: None,
                entries: self.entries.remove_at(i as i64)?,
            }),
            Err(_) => Ok(self.clone()),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.to_vec().iter().map(entry_key).collect()
    }

    pub fn values(&self) -> Vec<AtomValue> {
        self.entries.to_vec().iter().map(entry_value).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (String, AtomValue)> {
        self.entries.to_vec().into_iter().map(|e| (entry_key(&e), entry_value(&e)))
    }
}

#[cfg(test)]
#[path = "dictionary_test.rs"]
mod dictionary_test;
