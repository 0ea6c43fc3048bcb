//! The atom model (spec §3.1, §3.3, §4.5): `AtomPointer` identity,
//! `AtomValue` as the in-memory representation of a persisted field, and
//! `AnyAtom` as the sum type over every concrete persisted node kind —
//! the rewrite of the design note in spec §9 ("model Atom as a sum type
//! over the known persisted node kinds").

use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collections::{
    counted_set::CountedSet, dictionary::Dictionary, hash_dictionary::HashDictionary,
    index_registry::IndexRegistry, list::List, repeated_keys_dictionary::RepeatedKeysDictionary,
    set::Set,
};
use crate::hashing::ProtoHash;
use crate::object_model::{BytesAtom, DBObject, Literal, MutableObjectState, RootObject};
use crate::query::plan::PlanNode;
use crate::vector::VectorIndexRecord;

/// Identity of a persisted atom: the transaction that wrote it and the
/// byte offset it was written at (spec §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AtomPointer {
    pub transaction_id: Uuid,
    pub offset: u64,
}

impl AtomPointer {
    pub fn new(transaction_id: Uuid, offset: u64) -> Self {
        AtomPointer {
            transaction_id,
            offset,
        }
    }

    /// `hash = transaction_id.int XOR offset` (spec §3.1), folded into an
    /// i64 so pointers can key a `HashDictionary`.
    pub fn proto_hash(&self) -> i64 {
        let folded = self.transaction_id.as_u128() ^ (self.offset as u128);
        (folded ^ (folded >> 64)) as i64
    }
}

impl fmt::Display for AtomPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transaction_id, self.offset)
    }
}

/// Lifecycle of a single persisted node (spec §3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Unloaded,
    Loaded,
    Saved,
}

/// In-memory representation of a persisted field or collection element.
///
/// Primitive values serialize verbatim; `Atom` wraps a reference to
/// another node in the object graph (resolved lazily through the owning
/// transaction, spec §4.5); `Bytes` becomes a `BytesAtom` with its own
/// pointer once saved (spec §3.1, §9 "preserve `BytesAtom` indirection").
#[derive(Debug, Clone)]
pub enum AtomValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
    Duration(chrono::Duration),
    Bytes(Rc<Vec<u8>>),
    Atom(Rc<AnyAtom>),
}

impl PartialEq for AtomValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AtomValue::Null, AtomValue::Null) => true,
            (AtomValue::Bool(a), AtomValue::Bool(b)) => a == b,
            (AtomValue::Int(a), AtomValue::Int(b)) => a == b,
            (AtomValue::Float(a), AtomValue::Float(b)) => a == b,
            (AtomValue::Str(a), AtomValue::Str(b)) => a == b,
            (AtomValue::DateTime(a), AtomValue::DateTime(b)) => a == b,
            (AtomValue::Date(a), AtomValue::Date(b)) => a == b,
            (AtomValue::Duration(a), AtomValue::Duration(b)) => a == b,
            (AtomValue::Bytes(a), AtomValue::Bytes(b)) => a == b,
            (AtomValue::Atom(a), AtomValue::Atom(b)) => Rc::ptr_eq(a, b) || a.pointer() == b.pointer(),
            _ => false,
        }
    }
}

impl AtomValue {
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        AtomValue::Str(s.into())
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AtomValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AtomValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, AtomValue::Null)
    }
}

impl ProtoHash for AtomValue {
    /// Cross-collection hashing rule, spec §3.2: primitives hash their
    /// tagged representation, atoms hash their pointer when persisted or
    /// fall back to identity (pointer address) otherwise.
    fn proto_hash(&self) -> i64 {
        match self {
            AtomValue::Null => crate::hashing::sha256_key("none", ""),
            AtomValue::Bool(b) => b.proto_hash(),
            AtomValue::Int(i) => i.proto_hash(),
            AtomValue::Float(f) => f.proto_hash(),
            AtomValue::Str(s) => s.proto_hash(),
            AtomValue::DateTime(d) => crate::hashing::sha256_key("datetime", &d.to_rfc3339()),
            AtomValue::Date(d) => crate::hashing::sha256_key("date", &d.to_string()),
            AtomValue::Duration(d) => {
                crate::hashing::sha256_key("duration", &d.num_microseconds().unwrap_or(0).to_string())
            }
            AtomValue::Bytes(b) => crate::hashing::sha256_key("bytes", &hex_digest(b)),
            AtomValue::Atom(a) => match a.pointer() {
                Some(p) => p.proto_hash(),
                None => (Rc::as_ptr(a) as usize) as i64,
            },
        }
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Minimal hex encoding so `atom.rs` doesn't need a dependency solely for
/// this one debug-hash helper.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        let mut s = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }
}

/// Sum type over every concrete persisted node kind (spec §9 design
/// note). `DBObject` is the catch-all variant for user-defined attribute
/// bags; everything else is an engine-internal node.
#[derive(Debug, Clone)]
pub enum AnyAtom {
    Root(RootObject),
    Literal(Literal),
    Bytes(BytesAtom),
    Object(DBObject),
    Mutable(MutableObjectState),
    List(List),
    HashDictionary(HashDictionary),
    Dictionary(Dictionary),
    Set(Set),
    CountedSet(CountedSet),
    RepeatedKeysDictionary(RepeatedKeysDictionary),
    IndexRegistry(IndexRegistry),
    Plan(PlanNode),
    VectorIndex(VectorIndexRecord),
}

impl AnyAtom {
    pub fn class_name(&self) -> &'static str {
        match self {
            AnyAtom::Root(_) => "RootObject",
            AnyAtom::Literal(_) => "Literal",
            AnyAtom::Bytes(_) => "BytesAtom",
            AnyAtom::Object(_) => "DBObject",
            AnyAtom::Mutable(_) => "MutableObject",
            AnyAtom::List(_) => "List",
            AnyAtom::HashDictionary(_) => "HashDictionary",
            AnyAtom::Dictionary(_) => "Dictionary",
            AnyAtom::Set(_) => "Set",
            AnyAtom::CountedSet(_) => "CountedSet",
            AnyAtom::RepeatedKeysDictionary(_) => "RepeatedKeysDictionary",
            AnyAtom::IndexRegistry(_) => "IndexRegistry",
            AnyAtom::Plan(_) => "QueryPlan",
            AnyAtom::VectorIndex(_) => "VectorIndex",
        }
    }

    pub fn pointer(&self) -> Option<AtomPointer> {
        match self {
            AnyAtom::Root(a) => a.pointer,
            AnyAtom::Literal(a) => a.pointer,
            AnyAtom::Bytes(a) => a.pointer,
            AnyAtom::Object(a) => a.pointer,
            AnyAtom::Mutable(a) => a.pointer,
            AnyAtom::List(a) => a.pointer,
            AnyAtom::HashDictionary(a) => a.pointer,
            AnyAtom::Dictionary(a) => a.pointer,
            AnyAtom::Set(a) => a.pointer,
            AnyAtom::CountedSet(a) => a.pointer,
            AnyAtom::RepeatedKeysDictionary(a) => a.pointer,
            AnyAtom::IndexRegistry(a) => a.pointer,
            AnyAtom::Plan(_) => None,
            AnyAtom::VectorIndex(a) => a.pointer,
        }
    }
}
