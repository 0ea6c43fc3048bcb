//! Class-name registry (spec §9 "Global mutable state and singletons"):
//! the Python original keeps `atom_class_registry` as a process-wide
//! dict populated by a metaclass (`original_source/proto_db/common.py`,
//! `atom_class_registry`/`AtomMetaclass`). Here it is an explicit value
//! owned by `ObjectSpace` and threaded through (de)serialization instead
//! of a hidden global, per the design note's own resolution.

use std::collections::BTreeSet;

use crate::error::{Error, Result};

/// The built-in persisted node kinds, matching `AnyAtom::class_name()`.
/// Always registered; user-defined `DBObject` subclasses are added on
/// top via [`ClassRegistry::register`].
const BUILTIN_CLASSES: &[&str] = &[
    "RootObject",
    "Literal",
    "BytesAtom",
    "DBObject",
    "MutableObject",
    "List",
    "HashDictionary",
    "Dictionary",
    "Set",
    "CountedSet",
    "RepeatedKeysDictionary",
    "IndexRegistry",
    "QueryPlan",
    "VectorIndex",
];

/// Known atom class names for one Object Space (spec §9). Unlike the
/// Python original's process-wide dict, each `ObjectSpace` owns one of
/// these and passes it to its serializers explicitly.
#[derive(Debug, Clone)]
pub struct ClassRegistry {
    user_classes: BTreeSet<String>,
}

impl Default for ClassRegistry {
    fn default() -> Self {
        ClassRegistry::new()
    }
}

impl ClassRegistry {
    pub fn new() -> Self {
        ClassRegistry {
            user_classes: BTreeSet::new(),
        }
    }

    /// Registers a user-defined `DBObject` subclass name. Re-registering
    /// the same name is rejected (spec's source: "Class repeated in atom
    /// class registry").
    pub fn register(&mut self, class_name: impl Into<String>) -> Result<()> {
        let class_name = class_name.into();
        if self.is_known(&class_name) {
            return Err(Error::validation(format!(
                "class repeated in atom class registry ({class_name})"
            )));
        }
        self.user_classes.insert(class_name);
        Ok(())
    }

    pub fn is_known(&self, class_name: &str) -> bool {
        BUILTIN_CLASSES.contains(&class_name) || self.user_classes.contains(class_name)
    }

    /// Validates that `class_name` was seen before at load time,
    /// surfacing the same failure as the Python original's "It is not
    /// possible to load Atom of class {class_name}!" as a `Corruption`
    /// error (spec §7).
    pub fn resolve(&self, class_name: &str) -> Result<()> {
        if self.is_known(class_name) {
            Ok(())
        } else {
            Err(Error::corruption(format!(
                "it is not possible to load atom of class {class_name}"
            )))
        }
    }

    pub fn known_classes(&self) -> impl Iterator<Item = &str> {
        BUILTIN_CLASSES.iter().copied().chain(self.user_classes.iter().map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_classes_are_known_without_registration() {
        let registry = ClassRegistry::new();
        assert!(registry.is_known("DBObject"));
        assert!(registry.is_known("List"));
        assert!(!registry.is_known("Customer"));
    }

    #[test]
    fn register_then_resolve_succeeds() {
        let mut registry = ClassRegistry::new();
        registry.register("Customer").unwrap();
        assert!(registry.resolve("Customer").is_ok());
    }

    #[test]
    fn resolving_unknown_class_is_corruption() {
        let registry = ClassRegistry::new();
        assert!(registry.resolve("Ghost").is_err());
    }

    #[test]
    fn re_registering_same_class_fails() {
        let mut registry = ClassRegistry::new();
        registry.register("Customer").unwrap();
        assert!(registry.register("Customer").is_err());
    }
}
