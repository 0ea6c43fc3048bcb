//! ProtoBase is a transactional, object-oriented embedded database: a
//! persistent, copy-on-write object graph (atoms, persistent
//! collections, secondary indexes, vector indexes) laid over a
//! log-structured append-only store.
//!
//! An [`object_space::ObjectSpace`] owns the storage for a set of named
//! [`object_space::Database`]s; each `Database` hands out
//! [`transaction::Transaction`]s that snapshot its root, buffer reads
//! and writes, and commit with optimistic validation against concurrent
//! mutable-slot updates. [`query::exec::Query`] runs a filter/join/
//! group-by plan over a root collection; [`vector`] adds approximate
//! and exact nearest-neighbor search over persisted vectors.
//!
//! ```no_run
//! use std::sync::Arc;
//! use protobase::atom::{AnyAtom, AtomValue};
//! use protobase::object_model::DBObject;
//! use protobase::object_space::ObjectSpace;
//! use protobase::storage::{FileBlockProvider, SharedStorage};
//!
//! # fn main() -> protobase::error::Result<()> {
//! let provider = Arc::new(FileBlockProvider::open("./data")?);
//! let storage = Arc::new(SharedStorage::new(provider));
//! let space = ObjectSpace::new(storage)?;
//! let db = space.new_database("accounts")?;
//!
//! let tx = db.new_transaction()?;
//! let customer = DBObject::new().with_attr("name", AtomValue::str("Ada"));
//! tx.set_root_object("customer", AtomValue::Atom(std::rc::Rc::new(AnyAtom::Object(customer))))?;
//! tx.commit()?;
//! # Ok(())
//! # }
//! ```

pub mod atom;
pub mod collections;
pub mod commit;
pub mod error;
pub mod fsm;
pub mod hashing;
pub mod object_model;
pub mod object_space;
pub mod query;
pub mod registry;
pub mod serialize;
pub mod storage;
pub mod transaction;
pub mod vector;

pub use atom::{AnyAtom, AtomPointer, AtomValue};
pub use error::{Error, Result};
pub use object_model::{BytesAtom, DBObject, Literal, MutableObjectState, RootObject};
pub use object_space::{Database, ObjectSpace};
pub use registry::ClassRegistry;
pub use storage::{BlockProvider, FileBlockProvider, SharedStorage};
pub use transaction::{Transaction, TransactionState};
