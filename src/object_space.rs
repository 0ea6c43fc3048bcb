//! Object Space and Database (spec §2 "Control flow", §3.1 "Database
//! catalog"/"Database root", §4.7 step 7): the Object Space owns one
//! `SharedStorage` and the current `RootObject` it points at; a
//! `Database` is just a name plus a handle back to its owning space.
//! Grounded in `original_source/proto_db/db_access.py`'s `ObjectSpace`
//! and `Database` classes, with the global `atom_class_registry` they
//! relied on replaced by the explicit [`ClassRegistry`] spec §9 calls
//! for.

use std::rc::Rc;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::atom::{AnyAtom, AtomPointer, AtomValue};
use crate::collections::dictionary::Dictionary;
use crate::collections::hash_dictionary::HashDictionary;
use crate::error::{Error, Result};
use crate::object_model::{MutableObjectState, RootObject};
use crate::registry::ClassRegistry;
use crate::storage::SharedStorage;
use crate::transaction::Transaction;

pub(crate) const MUTABLE_ROOT_KEY: &str = "_mutable_root";

/// Resolves an atom reference already produced by [`crate::serialize`]
/// into a concrete value, recursing through nested references and
/// de-duplicating repeated pointers against `identity_map` (spec §4.7
/// `read_object`: "repeated calls with the same pointer return the same
/// Atom instance").
pub(crate) fn load_atom(
    space: &ObjectSpace,
    identity_map: &std::cell::RefCell<std::collections::HashMap<AtomPointer, Rc<AnyAtom>>>,
    pointer: AtomPointer,
    class_name: &str,
) -> Result<Rc<AnyAtom>> {
    if let Some(existing) = identity_map.borrow().get(&pointer) {
        return Ok(existing.clone());
    }
    space.classes.lock().resolve(class_name)?;

    struct Loader<'a> {
        space: &'a ObjectSpace,
        identity_map: &'a std::cell::RefCell<std::collections::HashMap<AtomPointer, Rc<AnyAtom>>>,
    }
    impl<'a> crate::serialize::AtomLoader for Loader<'a> {
        fn load(&mut self, pointer: AtomPointer, class_name: &str) -> Result<Rc<AnyAtom>> {
            load_atom(self.space, self.identity_map, pointer, class_name)
        }
    }

    let mut loader = Loader { space, identity_map };
    let atom = space.storage.get_atom(pointer, class_name, &mut loader)?;
    identity_map.borrow_mut().insert(pointer, atom.clone());
    Ok(atom)
}

/// Unwraps a `Dictionary` stored as a nested atom reference, treating an
/// absent/`Null` value as an empty dictionary (the shape a brand-new
/// Object Space or database root starts in).
pub(crate) fn dictionary_from_atom_value(value: &AtomValue) -> Result<Dictionary> {
    match value {
        AtomValue::Null => Ok(Dictionary::new()),
        AtomValue::Atom(a) => match a.as_ref() {
            AnyAtom::Dictionary(d) => Ok(d.clone()),
            other => Err(Error::corruption(format!("expected Dictionary atom, found {}", other.class_name()))),
        },
        _ => Err(Error::corruption("expected Dictionary atom value")),
    }
}

pub(crate) fn atom_value_from_dictionary(d: Dictionary) -> AtomValue {
    AtomValue::Atom(Rc::new(AnyAtom::Dictionary(d)))
}

pub(crate) fn hash_dictionary_from_atom_value(value: &AtomValue) -> Result<HashDictionary> {
    match value {
        AtomValue::Null => Ok(HashDictionary::new()),
        AtomValue::Atom(a) => match a.as_ref() {
            AnyAtom::HashDictionary(d) => Ok(d.clone()),
            other => Err(Error::corruption(format!("expected HashDictionary atom, found {}", other.class_name()))),
        },
        _ => Err(Error::corruption("expected HashDictionary atom value")),
    }
}

pub(crate) fn atom_value_from_hash_dictionary(d: HashDictionary) -> AtomValue {
    AtomValue::Atom(Rc::new(AnyAtom::HashDictionary(d)))
}

fn empty_database_root() -> Dictionary {
    Dictionary::new()
}

/// Owns the single `SharedStorage` for an Object Space and the class
/// registry every (de)serialization call validates against (spec §9:
/// threaded through explicitly instead of a process-wide global).
pub struct ObjectSpace {
    storage: Arc<SharedStorage>,
    classes: Mutex<ClassRegistry>,
}

impl ObjectSpace {
    /// Opens (or bootstraps) an Object Space over `storage`. A brand new
    /// storage (no current root yet) gets an empty `RootObject`
    /// published immediately so every later read can assume a root
    /// exists (spec §4.1 "tolerate empty/missing" covers the read path;
    /// this establishes the write-side invariant once, up front).
    pub fn new(storage: Arc<SharedStorage>) -> Result<Arc<ObjectSpace>> {
        let space = Arc::new(ObjectSpace {
            storage,
            classes: Mutex::new(ClassRegistry::new()),
        });
        if space.storage.read_current_root()?.is_none() {
            let root = RootObject::new(AtomValue::Null, AtomValue::Null, Utc::now());
            space.commit_database(Uuid::new_v4(), root)?;
        }
        Ok(space)
    }

    pub fn classes_mut(&self) -> parking_lot::MutexGuard<'_, ClassRegistry> {
        self.classes.lock()
    }

    pub(crate) fn storage(&self) -> &Arc<SharedStorage> {
        &self.storage
    }

    pub(crate) fn read_current_root_object(&self) -> Result<RootObject> {
        let pointer = self
            .storage
            .read_current_root()?
            .ok_or_else(|| Error::corruption("object space has no current root"))?;
        let identity_map = std::cell::RefCell::new(std::collections::HashMap::new());
        let atom = load_atom(self, &identity_map, pointer, "RootObject")?;
        match atom.as_ref() {
            AnyAtom::Root(root) => Ok(root.clone()),
            other => Err(Error::corruption(format!("current root points at a {}", other.class_name()))),
        }
    }

    /// Saves `root` (children-first) and publishes it as the new current
    /// root (spec §4.7 step 7: "publish it via the Object Space").
    pub(crate) fn commit_database(&self, transaction_id: Uuid, root: RootObject) -> Result<AtomPointer> {
        let saved = crate::commit::save_atom(&self.storage, transaction_id, Rc::new(AnyAtom::Root(root)))?;
        let pointer = saved.pointer().expect("save_atom always assigns a pointer");
        self.storage.set_current_root(pointer)?;
        Ok(pointer)
    }

    /// Full string→Literal map currently interned in this Object Space
    /// (spec §3.1 `literal_root`), mostly useful for diagnostics.
    pub fn get_literals(self: &Arc<Self>) -> Result<Dictionary> {
        let root = self.read_current_root_object()?;
        dictionary_from_atom_value(&root.literal_root)
    }

    pub fn open_database(self: &Arc<Self>, name: &str) -> Result<Database> {
        let root = self.read_current_root_object()?;
        let catalog = dictionary_from_atom_value(&root.object_root)?;
        if !catalog.has(name) {
            return Err(Error::validation(format!("no such database '{name}'")));
        }
        Ok(Database { name: name.to_string(), space: self.clone() })
    }

    /// Creates a new, empty database and publishes the updated catalog
    /// (spec §3.1 "Database catalog: Dictionary mapping database_name
    /// (string) -> database root Dictionary").
    pub fn new_database(self: &Arc<Self>, name: &str) -> Result<Database> {
        let _guard = self.storage.read_lock_current_root()?;
        let root = self.read_current_root_object()?;
        let mut catalog = dictionary_from_atom_value(&root.object_root)?;
        if catalog.has(name) {
            return Err(Error::validation(format!("database '{name}' already exists")));
        }
        let db_root = empty_database_root().set_at(MUTABLE_ROOT_KEY, atom_value_from_hash_dictionary(HashDictionary::new()))?;
        catalog = catalog.set_at(name, atom_value_from_dictionary(db_root))?;
        let new_root = RootObject {
            pointer: None,
            object_root: atom_value_from_dictionary(catalog),
            literal_root: root.literal_root,
            created_at: root.created_at,
        };
        self.commit_database(Uuid::new_v4(), new_root)?;
        Ok(Database { name: name.to_string(), space: self.clone() })
    }

    pub fn rename_database(self: &Arc<Self>, old_name: &str, new_name: &str) -> Result<()> {
        let _guard = self.storage.read_lock_current_root()?;
        let root = self.read_current_root_object()?;
        let mut catalog = dictionary_from_atom_value(&root.object_root)?;
        if !catalog.has(old_name) {
            return Err(Error::validation(format!("no such database '{old_name}'")));
        }
        if catalog.has(new_name) {
            return Err(Error::validation(format!("database '{new_name}' already exists")));
        }
        let value = catalog.get_at(old_name).expect("just checked has()");
        catalog = catalog.remove_at(old_name)?;
        catalog = catalog.set_at(new_name, value)?;
        let new_root = RootObject {
            pointer: None,
            object_root: atom_value_from_dictionary(catalog),
            literal_root: root.literal_root,
            created_at: root.created_at,
        };
        self.commit_database(Uuid::new_v4(), new_root)?;
        Ok(())
    }

    /// Forks `source` into a brand new database name, sharing its entire
    /// root structurally (copy-on-write atoms make this an O(1) catalog
    /// edit rather than a deep copy).
    pub fn new_branch_database(self: &Arc<Self>, source: &str, new_name: &str) -> Result<Database> {
        let _guard = self.storage.read_lock_current_root()?;
        let root = self.read_current_root_object()?;
        let mut catalog = dictionary_from_atom_value(&root.object_root)?;
        if catalog.has(new_name) {
            return Err(Error::validation(format!("database '{new_name}' already exists")));
        }
        let source_root = catalog
            .get_at(source)
            .ok_or_else(|| Error::validation(format!("no such database '{source}'")))?;
        catalog = catalog.set_at(new_name, source_root)?;
        let new_root = RootObject {
            pointer: None,
            object_root: atom_value_from_dictionary(catalog),
            literal_root: root.literal_root,
            created_at: root.created_at,
        };
        self.commit_database(Uuid::new_v4(), new_root)?;
        Ok(Database { name: new_name.to_string(), space: self.clone() })
    }
}

/// A named root inside an Object Space's catalog (spec §2 "a Database
/// is a named root inside a catalog dictionary"). Cheap to clone: it is
/// just a name and a shared handle back to the space.
#[derive(Clone)]
pub struct Database {
    name: String,
    space: Arc<ObjectSpace>,
}

impl Database {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of this database's root Dictionary as currently
    /// committed (spec §3.1 "Database root").
    pub fn get_current_root(&self) -> Result<Dictionary> {
        let root = self.space.read_current_root_object()?;
        let catalog = dictionary_from_atom_value(&root.object_root)?;
        let db_root = catalog
            .get_at(&self.name)
            .ok_or_else(|| Error::validation(format!("no such database '{}'", self.name)))?;
        dictionary_from_atom_value(&db_root)
    }

    pub fn get_literal(&self, s: &str) -> Result<AtomValue> {
        let root = self.space.read_current_root_object()?;
        let literal_root = dictionary_from_atom_value(&root.literal_root)?;
        Ok(literal_root.get_at(s).unwrap_or(AtomValue::Null))
    }

    pub fn new_branch_database(&self, new_name: &str) -> Result<Database> {
        self.space.new_branch_database(&self.name, new_name)
    }

    /// Opens a new transaction snapshotted against this database's
    /// current root (spec §4.7).
    pub fn new_transaction(&self) -> Result<Transaction> {
        Transaction::new(self.space.clone(), self.name.clone())
    }
}

/// Folds a 128-bit mutable-slot id into the 64-bit key `_mutable_root`
/// is actually keyed by, mirroring `AtomPointer::proto_hash`'s fold
/// (spec §3.1 "hash_key (random 128-bit integer)" vs. the `HashDictionary`
/// it indexes into).
pub(crate) fn slot_key(hash_key: u128) -> i64 {
    MutableObjectState::slot_key(hash_key)
}
