//! Storage substrate (spec §4.1-§4.4): the append-only WAL abstraction,
//! page and atom caches sitting in front of it, the background worker
//! pool futures run on, and `SharedStorage`, which ties all three
//! together behind the interface a `Transaction` actually calls.

pub mod atom_cache;
pub mod block_provider;
pub mod handle;
pub mod page_cache;
pub mod shared_storage;
pub mod wal_record;

pub use block_provider::{BlockProvider, FileBlockProvider, WalId};
pub use handle::{Handle, WorkerPool};
pub use shared_storage::SharedStorage;
