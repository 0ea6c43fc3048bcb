//! Cross-collection hashing rules (spec §3.2).
//!
//! Every persistent collection keyed by hash (`HashDictionary`, and the
//! `Set`/`CountedSet` built on top of it) needs a single, stable rule for
//! turning an arbitrary value into the `i64` key the AVL tree sorts on.
//! The rule is SHA-256 based so that two equal values always hash equal
//! regardless of which transaction or process computed it.

use sha2::{Digest, Sha256};

/// Compute the i64 hash-dictionary key for a tagged value.
///
/// `tag` identifies the value's kind (`"int"`, `"str"`, `"atom"`, ...); the
/// digest is taken over `"<tag>:<repr>"` exactly as spec §3.2 describes for
/// the fallback case, with dedicated fast paths for the named cases.
pub fn sha256_key(tag: &str, repr: &str) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(tag.as_bytes());
    hasher.update(b":");
    hasher.update(repr.as_bytes());
    let digest = hasher.finalize();
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[0..8]);
    i64::from_be_bytes(buf)
}

/// Trait implemented by anything that can be a `HashDictionary`/`Set` key
/// or element, per the rules in spec §3.2.
pub trait ProtoHash {
    fn proto_hash(&self) -> i64;
}

impl ProtoHash for bool {
    fn proto_hash(&self) -> i64 {
        sha256_key("bool", if *self { "true" } else { "false" })
    }
}

impl ProtoHash for i64 {
    fn proto_hash(&self) -> i64 {
        sha256_key("int", &self.to_string())
    }
}

impl ProtoHash for f64 {
    fn proto_hash(&self) -> i64 {
        sha256_key("float", &format!("{:e}", self))
    }
}

impl ProtoHash for str {
    fn proto_hash(&self) -> i64 {
        sha256_key("str", self)
    }
}

impl ProtoHash for String {
    fn proto_hash(&self) -> i64 {
        self.as_str().proto_hash()
    }
}
