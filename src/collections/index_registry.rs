//! Immutable secondary-index registry (spec §3.1, §4.6): a list of index
//! definitions plus, per index name, a mapping from extracted key to the
//! set of object ids carrying that key. `with_add`/`with_remove` are the
//! only mutators; both return a new registry.

use crate::atom::AtomValue;
use crate::error::Result;
use crate::hashing::ProtoHash;

use super::repeated_keys_dictionary::RepeatedKeysDictionary;

/// How an index derives its key from an indexed element (spec: "`name`,
/// `extractor`"). `Field` covers the common `getattr(elem, field_name)`
/// case (spec §4.6: "`add_index(field_name)`: build a
/// RepeatedKeysDictionary from current elements whose key is
/// `getattr(elem, field_name)`"); `Custom` covers user-supplied
/// extractors (spec: "`add_index(IndexDefinition)`: supports custom
/// extractors").
#[derive(Debug, Clone)]
pub enum Extractor {
    Field(String),
    Custom(fn(&AtomValue) -> AtomValue),
}

impl Extractor {
    pub fn extract(&self, element: &AtomValue) -> AtomValue {
        match self {
            Extractor::Field(name) => match element {
                AtomValue::Atom(a) => match a.as_ref() {
                    crate::atom::AnyAtom::Object(obj) => obj.get(name),
                    _ => AtomValue::Null,
                },
                _ => AtomValue::Null,
            },
            Extractor::Custom(f) => f(element),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexDefinition {
    pub name: String,
    pub extractor: Extractor,
}

impl IndexDefinition {
    pub fn field(name: impl Into<String>) -> Self {
        let name = name.into();
        IndexDefinition {
            extractor: Extractor::Field(name.clone()),
            name,
        }
    }

    pub fn custom(name: impl Into<String>, extractor: fn(&AtomValue) -> AtomValue) -> Self {
        IndexDefinition {
            name: name.into(),
            extractor: Extractor::Custom(extractor),
        }
    }
}

fn key_string(key: &AtomValue) -> String {
    key.proto_hash().to_string()
}

/// Immutable registry of secondary indexes over a collection (spec §4.6).
/// Every mutation (`with_add`, `with_remove`, `with_replace`) returns a
/// new registry sharing the unaffected bucket dictionaries.
#[derive(Debug, Clone, Default)]
pub struct IndexRegistry {
    pub pointer: Option<crate::atom::AtomPointer>,
    definitions: Vec<IndexDefinition>,
    buckets: Vec<(String, RepeatedKeysDictionary)>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        IndexRegistry {
            pointer: None,
            definitions: Vec::new(),
            buckets: Vec::new(),
        }
    }

    pub fn index_names(&self) -> Vec<&str> {
        self.definitions.iter().map(|d| d.name.as_str()).collect()
    }

    fn bucket_dict(&self, name: &str) -> RepeatedKeysDictionary {
        self.buckets
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d.clone())
            .unwrap_or_default()
    }

    /// Registers a new index and builds its bucket dictionary from the
    /// current elements (spec: "build a RepeatedKeysDictionary from
    /// current elements").
    pub fn add_index(&self, definition: IndexDefinition, elements: &[(AtomValue, AtomValue)]) -> Result<IndexRegistry> {
        let mut dict = RepeatedKeysDictionary::new();
        for (object_id, element) in elements {
            let key = definition.extractor.extract(element);
            dict = dict.set_at(key_string(&key), object_id.clone())?;
        }
        let mut definitions = self.definitions.clone();
        let mut buckets: Vec<_> = self.buckets.iter().filter(|(n, _)| n != &definition.name).cloned().collect();
        definitions.retain(|d| d.name != definition.name);
        definitions.push(definition.clone());
        buckets.push((definition.name, dict));
        Ok(IndexRegistry {
            pointer: None,
            definitions,
            buckets,
        })
    }

    pub fn remove_index(&self, name: &str) -> IndexRegistry {
        IndexRegistry {
            pointer: None,
            definitions: self.definitions.iter().filter(|d| d.name != name).cloned().collect(),
            buckets: self.buckets.iter().filter(|(n, _)| n != name).cloned().collect(),
        }
    }

    /// Folds a single element insertion into every index (spec §4.6:
    /// "mutators produce an updated registry by calling with_add ... on
    /// the affected element").
    pub fn with_add(&self, object_id: AtomValue, element: &AtomValue) -> Result<IndexRegistry> {
        let mut buckets = Vec::with_capacity(self.buckets.len());
        for definition in &self.definitions {
            let key = definition.extractor.extract(element);
            let current = self.bucket_dict(&definition.name);
            buckets.push((definition.name.clone(), current.set_at(key_string(&key), object_id.clone())?));
        }
        Ok(IndexRegistry {
            pointer: None,
            definitions: self.definitions.clone(),
            buckets,
        })
    }

    pub fn with_remove(&self, object_id: &AtomValue, element: &AtomValue) -> Result<IndexRegistry> {
        let mut buckets = Vec::with_capacity(self.buckets.len());
        for definition in &self.definitions {
            let key = definition.extractor.extract(element);
            let current = self.bucket_dict(&definition.name);
            buckets.push((
                definition.name.clone(),
                current.remove_record_at(&key_string(&key), object_id)?,
            ));
        }
        Ok(IndexRegistry {
            pointer: None,
            definitions: self.definitions.clone(),
            buckets,
        })
    }

    pub fn with_replace(&self, object_id: AtomValue, old_element: &AtomValue, new_element: &AtomValue) -> Result<IndexRegistry> {
        self.with_remove(&object_id, old_element)?.with_add(object_id, new_element)
    }

    /// Looks up object ids matching `key` under the named index, or
    /// `None` if the index doesn't exist (used by the optimizer to
    /// rewrite a `WherePlan` into an `IndexedSearchPlan`).
    pub fn lookup(&self, index_name: &str, key: &AtomValue) -> Option<crate::collections::set::Set> {
        if !self.definitions.iter().any(|d| d.name == index_name) {
            return None;
        }
        Some(self.bucket_dict(index_name).get_at(&key_string(key)))
    }
}

#[cfg(test)]
#[path = "index_registry_test.rs"]
mod index_registry_test;
