//! The Transaction engine (spec §4.7): snapshot reads bound to the
//! database root captured at `Transaction::new`, staged writes buffered
//! until `commit`, and an optimistic commit protocol that validates
//! read-locked mutable slots before publishing a new root. Grounded in
//! `original_source/proto_db/db_access.py`'s `ObjectTransaction` and
//! `common.py`'s `ConcurrentOptimized` mixin.
//!
//! A `Transaction` is deliberately not `Send`: all of its staged state
//! is `Rc`/`RefCell` because exactly one thread drives one transaction
//! from `new` to `commit`/`abort` (spec §5 "one transaction, one
//! thread"). The storage it reads and writes through, `SharedStorage`,
//! is the `Arc`-shared piece underneath that can be touched by many
//! transactions — on many threads — at once.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

use uuid::Uuid;

use crate::atom::{AnyAtom, AtomPointer, AtomValue};
use crate::collections::dictionary::Dictionary;
use crate::collections::hash_dictionary::HashDictionary;
use crate::collections::list::List;
use crate::collections::set::Set;
use crate::error::{Error, Result};
use crate::object_model::{DBObject, Literal, RootObject};
use crate::object_space::{
    atom_value_from_dictionary, atom_value_from_hash_dictionary, dictionary_from_atom_value,
    hash_dictionary_from_atom_value, load_atom, slot_key, ObjectSpace, MUTABLE_ROOT_KEY,
};
use crate::query::exec::Query;
use crate::query::plan::PlanNode;

/// A `DBObject` attribute that, when `true`, opts a mutable slot into
/// [`rebase_on_concurrent_update`] instead of hard-failing on a
/// concurrent write (spec §4.7 step 6, `common.py`'s `ConcurrentOptimized`
/// mixin and its `_rebase_on_concurrent_update` hook).
pub const CONCURRENT_OPTIMIZED_FLAG: &str = "_concurrent_optimized";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Running,
    Committed,
    Aborted,
}

fn is_concurrent_optimized(value: &AtomValue) -> bool {
    match value {
        AtomValue::Atom(a) => match a.as_ref() {
            AnyAtom::Object(o) => matches!(o.get(CONCURRENT_OPTIMIZED_FLAG), AtomValue::Bool(true)),
            _ => false,
        },
        _ => false,
    }
}

/// Merges the attributes this transaction actually changed (relative to
/// `observed`, the value it read at slot-lock time) onto `current`, the
/// value a concurrent commit left in place. Only defined for DBObject
/// mutable slots; anything else surfaces the same `NotSupported` a
/// missing Python override would (`common.py`: "raises
/// ProtoNotSupportedException if the merge is not possible").
fn rebase_on_concurrent_update(mine: &AtomValue, observed: &AtomValue, current: &AtomValue) -> Result<AtomValue> {
    let (mine, observed, current) = match (mine, observed, current) {
        (AtomValue::Atom(m), AtomValue::Atom(o), AtomValue::Atom(c)) => match (m.as_ref(), o.as_ref(), c.as_ref()) {
            (AnyAtom::Object(m), AnyAtom::Object(o), AnyAtom::Object(c)) => (m, o, c),
            _ => return Err(Error::not_supported("concurrent rebase is only defined for DBObject mutable slots")),
        },
        _ => return Err(Error::not_supported("concurrent rebase is only defined for DBObject mutable slots")),
    };
    let mut rebased = current.clone();
    for (name, value) in mine.attributes.iter() {
        if observed.get(name) != *value {
            rebased = rebased.with_attr(name.clone(), value.clone());
        }
    }
    Ok(AtomValue::Atom(Rc::new(AnyAtom::Object(rebased))))
}

/// One unit of work against a [`crate::object_space::Database`] (spec
/// §4.7). Reads are served from the root snapshot captured at
/// construction time plus anything staged this transaction; writes are
/// buffered in-memory until `commit`.
pub struct Transaction {
    id: Uuid,
    database_name: String,
    space: Arc<ObjectSpace>,
    state: Cell<TransactionState>,

    /// The database root Dictionary as committed when this transaction
    /// started (spec: "initial_transaction_root").
    initial_transaction_root: Dictionary,
    /// Root names this transaction has itself assigned via
    /// `set_root_object` (spec: "transaction_root... root objects set by
    /// user this transaction").
    transaction_root: RefCell<Dictionary>,

    /// The Object Space's literal_root as of transaction start, used as
    /// the fallback lookup in `get_literal`.
    literal_root: Dictionary,
    /// Strings interned for the first time this transaction.
    new_literals: RefCell<Dictionary>,

    /// Mutable-slot writes staged this transaction, keyed by the folded
    /// slot key (spec: "new_mutable_objects / modified_mutable_objects").
    modified_mutable_objects: RefCell<HashDictionary>,
    /// The value observed the first time each slot was locked this
    /// transaction, used for optimistic validation at commit (spec:
    /// "read_lock_objects").
    read_lock_objects: RefCell<HashDictionary>,

    /// Identity map so repeated `read_object` calls for the same pointer
    /// return the same `Rc` (spec §4.7 `read_object`).
    identity_map: RefCell<HashMap<AtomPointer, Rc<AnyAtom>>>,
}

impl Transaction {
    pub(crate) fn new(space: Arc<ObjectSpace>, database_name: String) -> Result<Transaction> {
        let root = space.read_current_root_object()?;
        let catalog = dictionary_from_atom_value(&root.object_root)?;
        let db_root_value = catalog
            .get_at(&database_name)
            .ok_or_else(|| Error::validation(format!("no such database '{database_name}'")))?;
        let initial_transaction_root = dictionary_from_atom_value(&db_root_value)?;
        let literal_root = dictionary_from_atom_value(&root.literal_root)?;

        Ok(Transaction {
            id: Uuid::new_v4(),
            database_name,
            space,
            state: Cell::new(TransactionState::Running),
            initial_transaction_root,
            transaction_root: RefCell::new(Dictionary::new()),
            literal_root,
            new_literals: RefCell::new(Dictionary::new()),
            modified_mutable_objects: RefCell::new(HashDictionary::new()),
            read_lock_objects: RefCell::new(HashDictionary::new()),
            identity_map: RefCell::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state.get()
    }

    fn require_running(&self) -> Result<()> {
        if self.state.get() != TransactionState::Running {
            return Err(Error::validation("transaction is not Running"));
        }
        Ok(())
    }

    /// Reads a root object under this transaction's snapshot, preferring
    /// anything staged this transaction over the committed snapshot
    /// (spec §4.7 `get_root_object`).
    pub fn get_root_object(&self, name: &str) -> Option<AtomValue> {
        if let Some(v) = self.transaction_root.borrow().get_at(name) {
            return Some(v);
        }
        self.initial_transaction_root.get_at(name)
    }

    pub fn set_root_object(&self, name: impl Into<String>, value: AtomValue) -> Result<()> {
        self.require_running()?;
        let updated = self.transaction_root.borrow().set_at(name.into(), value)?;
        *self.transaction_root.borrow_mut() = updated;
        Ok(())
    }

    /// Looks up (or interns) a string literal (spec §4.7 `get_literal`):
    /// staged-this-transaction, then the space's literal_root, then a
    /// freshly created one staged for this commit.
    pub fn get_literal(&self, s: &str) -> Result<AtomValue> {
        if let Some(v) = self.new_literals.borrow().get_at(s) {
            return Ok(v);
        }
        if let Some(v) = self.literal_root.get_at(s) {
            return Ok(v);
        }
        let literal = AtomValue::Atom(Rc::new(AnyAtom::Literal(Literal::new(s))));
        let updated = self.new_literals.borrow().set_at(s, literal.clone())?;
        *self.new_literals.borrow_mut() = updated;
        Ok(literal)
    }

    /// Idempotent instantiation bound to this transaction: repeated
    /// calls with the same pointer return the same `Atom` instance
    /// (spec §4.7 `read_object`).
    pub fn read_object(&self, class_name: &str, pointer: AtomPointer) -> Result<Rc<AnyAtom>> {
        load_atom(&self.space, &self.identity_map, pointer, class_name)
    }

    /// Current value of a mutable slot under this transaction's view:
    /// anything staged this transaction, else the value in the snapshot
    /// captured at transaction start (spec §4.7 `get_mutable`).
    pub fn get_mutable(&self, hash_key: u128) -> Result<AtomValue> {
        let key = slot_key(hash_key);
        if let Some(v) = self.modified_mutable_objects.borrow().get_at(key) {
            return Ok(v);
        }
        let base = match self.initial_transaction_root.get_at(MUTABLE_ROOT_KEY) {
            Some(v) => hash_dictionary_from_atom_value(&v)?,
            None => HashDictionary::new(),
        };
        Ok(base.get_at(key).unwrap_or(AtomValue::Null))
    }

    /// Stages a new value for a mutable slot (spec §4.7 `set_mutable`).
    pub fn set_mutable(&self, hash_key: u128, value: AtomValue) -> Result<()> {
        self.require_running()?;
        let key = slot_key(hash_key);
        let updated = self.modified_mutable_objects.borrow().set_at(key, value);
        *self.modified_mutable_objects.borrow_mut() = updated;
        Ok(())
    }

    /// Records the value observed for a mutable slot the first time it
    /// is accessed through the public API this transaction, so commit
    /// can detect a concurrent change (spec §4.7: "called once the first
    /// time a mutable is accessed via the public API").
    pub fn set_locked_object(&self, hash_key: u128, current: AtomValue) {
        let key = slot_key(hash_key);
        if !self.read_lock_objects.borrow().has(key) {
            let updated = self.read_lock_objects.borrow().set_at(key, current);
            *self.read_lock_objects.borrow_mut() = updated;
        }
    }

    pub fn new_list(&self) -> List {
        List::new()
    }

    pub fn new_dictionary(&self) -> Dictionary {
        Dictionary::new()
    }

    pub fn new_hash_set(&self) -> Set {
        Set::new()
    }

    pub fn new_hash_dictionary(&self) -> HashDictionary {
        HashDictionary::new()
    }

    pub fn new_object(&self) -> DBObject {
        DBObject::new()
    }

    /// Builds a query over a root-level `List` (spec §4.8's plan tree
    /// starts from a `ListPlan`).
    pub fn query_list(&self, root_name: &str) -> Result<Query> {
        let value = self
            .get_root_object(root_name)
            .ok_or_else(|| Error::validation(format!("no root object named '{root_name}'")))?;
        match value {
            AtomValue::Atom(a) => match a.as_ref() {
                AnyAtom::List(list) => Ok(Query::new(PlanNode::ListScan { list: list.clone() })),
                other => Err(Error::validation(format!("root object '{root_name}' is a {}, not a List", other.class_name()))),
            },
            _ => Err(Error::validation(format!("root object '{root_name}' is not a List"))),
        }
    }

    /// Abandons every staged change (spec §4.7 "Abort: must be allowed
    /// only from Running; transitions to Aborted; no persistence
    /// occurs").
    pub fn abort(&self) -> Result<()> {
        self.require_running()?;
        self.state.set(TransactionState::Aborted);
        Ok(())
    }

    /// Runs the commit protocol (spec §4.7 steps 1-8).
    pub fn commit(&self) -> Result<()> {
        self.require_running()?;

        let transaction_root = self.transaction_root.borrow();
        let new_literals = self.new_literals.borrow();
        let modified_mutables = self.modified_mutable_objects.borrow();
        if transaction_root.is_empty() && new_literals.is_empty() && modified_mutables.is_empty() {
            drop(transaction_root);
            drop(new_literals);
            drop(modified_mutables);
            self.state.set(TransactionState::Committed);
            return Ok(());
        }

        // Step 2: save staged mutables and staged root atoms, bottom-up,
        // before taking the root lock.
        let mut saved_roots = Vec::with_capacity(transaction_root.len());
        for (key, value) in transaction_root.iter() {
            saved_roots.push((key, crate::commit::save_value(self.space.storage(), self.id, &value)?));
        }
        drop(transaction_root);

        let mut saved_literals = Vec::with_capacity(new_literals.len());
        for (key, value) in new_literals.iter() {
            saved_literals.push((key, crate::commit::save_value(self.space.storage(), self.id, &value)?));
        }
        drop(new_literals);

        let mut saved_mutables = Vec::with_capacity(modified_mutables.len());
        for (key, value) in modified_mutables.iter() {
            saved_mutables.push((key, crate::commit::save_value(self.space.storage(), self.id, &value)?));
        }
        drop(modified_mutables);

        // Step 3: acquire the root lock and read the current database root.
        let _guard = self.space.storage().read_lock_current_root()?;
        let current_root = self.space.read_current_root_object()?;
        let mut catalog = dictionary_from_atom_value(&current_root.object_root)?;
        let current_db_root_value = catalog
            .get_at(&self.database_name)
            .ok_or_else(|| Error::validation(format!("database '{}' no longer exists", self.database_name)))?;
        let mut db_root = dictionary_from_atom_value(&current_db_root_value)?;

        // Step 4: reconcile literals against the current literal_root.
        let mut literal_root = dictionary_from_atom_value(&current_root.literal_root)?;
        for (key, value) in &saved_literals {
            if !literal_root.has(key) {
                literal_root = literal_root.set_at(key.clone(), value.clone())?;
            }
        }

        // Steps 5-6: validate read-locks, merge mutable-slot updates,
        // rebasing `ConcurrentOptimized` values instead of failing where
        // the slot opts in.
        let current_mutable_root = match db_root.get_at(MUTABLE_ROOT_KEY) {
            Some(v) => hash_dictionary_from_atom_value(&v)?,
            None => HashDictionary::new(),
        };
        let mut new_mutable_root = current_mutable_root.clone();
        let read_locks = self.read_lock_objects.borrow().entries();
        let mut resolved_slots: HashSet<i64> = HashSet::new();

        for (slot, observed) in &read_locks {
            let current_value = current_mutable_root.get_at(*slot).unwrap_or(AtomValue::Null);
            if *observed == current_value {
                continue;
            }
            match saved_mutables.iter().find(|(k, _)| k == slot) {
                Some((_, mine)) if is_concurrent_optimized(mine) => {
                    let resolved = rebase_on_concurrent_update(mine, observed, &current_value)?;
                    new_mutable_root = new_mutable_root.set_at(*slot, resolved);
                    resolved_slots.insert(*slot);
                }
                Some(_) => {
                    return Err(Error::locking(*slot as u128, "mutable slot was modified concurrently and does not support rebasing"));
                }
                None => {
                    return Err(Error::locking(*slot as u128, "mutable slot read was invalidated by a concurrent commit"));
                }
            }
        }
        for (slot, value) in &saved_mutables {
            if !resolved_slots.contains(slot) {
                new_mutable_root = new_mutable_root.set_at(*slot, value.clone());
            }
        }

        db_root = db_root.set_at(MUTABLE_ROOT_KEY, atom_value_from_hash_dictionary(new_mutable_root))?;
        for (key, value) in &saved_roots {
            db_root = db_root.set_at(key.clone(), value.clone())?;
        }

        catalog = catalog.set_at(self.database_name.as_str(), atom_value_from_dictionary(db_root))?;

        // Step 7: save the new root (children-first; untouched branches
        // already carry pointers and are no-ops) and publish it.
        let new_root = RootObject {
            pointer: None,
            object_root: atom_value_from_dictionary(catalog),
            literal_root: atom_value_from_dictionary(literal_root),
            created_at: current_root.created_at,
        };
        self.space.commit_database(self.id, new_root)?;

        // Step 8.
        self.state.set(TransactionState::Committed);
        Ok(())
    }
}
