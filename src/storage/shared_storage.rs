//! `SharedStorage` (spec §2 "SharedStorage (8%)", §4.4): the single
//! choke point every atom read/write passes through — serialization to
//! the WAL, root read/write, and push/get for atoms and raw byte blobs.
//! One `SharedStorage` is owned by one `ObjectSpace` (spec §6.3) and
//! shared by every `Transaction` opened against it.
//!
//! Addressing note: `AtomPointer` is `{transaction_id, offset: u64}`
//! (spec §3.1) but `BlockProvider` addresses bytes by `(WalId, u64)`
//! (spec §4.1). This storage packs `wal_id` into the high 24 bits of
//! `offset` and the in-WAL byte offset into the low 40 bits — a WAL
//! rotates at 64MiB (`2^26`), comfortably under `2^40`, and 2^24 WAL
//! files is far beyond what a single object space will ever produce.
//! `transaction_id` keeps its spec meaning (the writing transaction's
//! identity) untouched by this packing.

use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as Json;
use uuid::Uuid;

use crate::atom::{AnyAtom, AtomPointer};
use crate::error::{Error, Result};
use crate::serialize::{atom_to_payload, payload_to_atom, AtomLoader};

use super::atom_cache::{BytesCacheKey, ObjectCacheKey, TwoQCache};
use super::block_provider::{BlockProvider, RootLockGuard, WalId};
use super::page_cache::PageCache;
use super::wal_record::{decode_record, encode_record, Format};

const OFFSET_BITS: u32 = 40;
const WAL_ID_SHIFT: u32 = OFFSET_BITS;

fn pack_offset(wal_id: WalId, byte_offset: u64) -> Result<u64> {
    if wal_id >> (64 - WAL_ID_SHIFT) != 0 {
        return Err(Error::validation("wal id exceeds addressable range"));
    }
    if byte_offset >> OFFSET_BITS != 0 {
        return Err(Error::validation("byte offset exceeds addressable range"));
    }
    Ok((wal_id << WAL_ID_SHIFT) | byte_offset)
}

fn unpack_offset(offset: u64) -> (WalId, u64) {
    let mask = (1u64 << OFFSET_BITS) - 1;
    (offset >> WAL_ID_SHIFT, offset & mask)
}

/// Default cache sizing, grounded in the teacher's `DEFAULT_CACHE_CAPACITY`
/// sizing for its own `bogn` page caches.
const DEFAULT_ATOM_CACHE_ENTRIES: usize = 4096;
const DEFAULT_ATOM_CACHE_BYTES: u64 = 64 * 1024 * 1024;
const DEFAULT_PAGE_SIZE: usize = 4096;
const DEFAULT_PAGE_CACHE_BYTES: usize = 32 * 1024 * 1024;
const ROOT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SharedStorage {
    provider: Arc<dyn BlockProvider>,
    pages: PageCache,
    objects: TwoQCache<ObjectCacheKey, Json>,
    bytes: TwoQCache<BytesCacheKey, Arc<Vec<u8>>>,
    schema_epoch: u64,
}

impl SharedStorage {
    pub fn new(provider: Arc<dyn BlockProvider>) -> Self {
        SharedStorage {
            provider,
            pages: PageCache::new(DEFAULT_PAGE_SIZE, DEFAULT_PAGE_CACHE_BYTES),
            objects: TwoQCache::new(DEFAULT_ATOM_CACHE_ENTRIES, DEFAULT_ATOM_CACHE_BYTES),
            bytes: TwoQCache::new(DEFAULT_ATOM_CACHE_ENTRIES, DEFAULT_ATOM_CACHE_BYTES),
            schema_epoch: 1,
        }
    }

    fn write_record(&self, format: Format, payload: &[u8], transaction_id: Uuid) -> Result<AtomPointer> {
        let mut framed = Vec::with_capacity(payload.len() + 9);
        encode_record(&mut framed, format, payload)?;
        let wal_id = self.provider.writer_wal_id();
        let (written_wal_id, byte_offset) = self.provider.append(wal_id, &framed)?;
        let offset = pack_offset(written_wal_id, byte_offset)?;
        Ok(AtomPointer::new(transaction_id, offset))
    }

    fn read_record(&self, pointer: AtomPointer) -> Result<Vec<u8>> {
        let (wal_id, byte_offset) = unpack_offset(pointer.offset);
        let len_bytes = self.pages.read(self.provider.as_ref(), wal_id, byte_offset, 8)?;
        let len = u64::from_le_bytes(len_bytes.as_slice().try_into().map_err(|_| Error::corruption("short length prefix"))?) as usize;
        let body = self.pages.read(self.provider.as_ref(), wal_id, byte_offset + 8, len)?;
        let mut framed = Vec::with_capacity(8 + len);
        framed.extend_from_slice(&(len as u64).to_le_bytes());
        framed.extend_from_slice(&body);
        let decoded = decode_record(&mut framed.as_slice())?;
        Ok(decoded.payload)
    }

    /// Serializes `atom` to its JSON payload, appends it to the WAL and
    /// caches the decoded payload under its new pointer (spec §4.4
    /// `push_atom`).
    pub fn push_atom(&self, atom: &AnyAtom, transaction_id: Uuid) -> Result<AtomPointer> {
        let payload = atom_to_payload(atom)?;
        let bytes = serde_json::to_vec(&payload)?;
        let pointer = self.write_record(Format::JsonUtf8, &bytes, transaction_id)?;
        let key = ObjectCacheKey { wal_id: unpack_offset(pointer.offset).0, offset: unpack_offset(pointer.offset).1, schema_epoch: self.schema_epoch };
        self.objects.put(key, payload, bytes.len() as u64);
        Ok(pointer)
    }

    /// Loads and rehydrates the atom at `pointer` (spec §4.4 `get_atom`),
    /// going through the object cache first.
    pub fn get_atom(&self, pointer: AtomPointer, class_name: &str, loader: &mut dyn AtomLoader) -> Result<Rc<AnyAtom>> {
        let (wal_id, byte_offset) = unpack_offset(pointer.offset);
        let key = ObjectCacheKey { wal_id, offset: byte_offset, schema_epoch: self.schema_epoch };
        let payload = self.objects.get_or_load(key, |v| approx_json_size(v), || {
            let bytes = self.read_record(pointer)?;
            let value: Json = serde_json::from_slice(&bytes)?;
            Ok(value)
        })?;
        let mut atom = payload_to_atom(class_name, &payload, loader)?;
        set_pointer(&mut atom, pointer);
        Ok(Rc::new(atom))
    }

    /// Stores a raw byte blob as its own record (spec §3.1 "bytes stored
    /// as a `BytesAtom` with its own pointer"); the blob's content never
    /// goes through atom JSON encoding.
    pub fn push_bytes(&self, content: &[u8], transaction_id: Uuid) -> Result<AtomPointer> {
        let pointer = self.write_record(Format::MsgPack, content, transaction_id)?;
        let (wal_id, byte_offset) = unpack_offset(pointer.offset);
        let key = BytesCacheKey { wal_id, offset: byte_offset };
        self.bytes.put(key, Arc::new(content.to_vec()), content.len() as u64);
        Ok(pointer)
    }

    pub fn get_bytes(&self, pointer: AtomPointer) -> Result<Rc<Vec<u8>>> {
        let (wal_id, byte_offset) = unpack_offset(pointer.offset);
        let key = BytesCacheKey { wal_id, offset: byte_offset };
        let content = self.bytes.get_or_load(key, |v| v.len() as u64, || self.read_record(pointer).map(Arc::new))?;
        Ok(Rc::new((*content).clone()))
    }

    pub fn read_current_root(&self) -> Result<Option<AtomPointer>> {
        self.provider.get_current_root()
    }

    pub fn set_current_root(&self, pointer: AtomPointer) -> Result<()> {
        self.provider.update_root(pointer)
    }

    /// Acquires the re-entrant root lock with the storage's default
    /// timeout (spec §4.1 `root_context_manager`).
    pub fn read_lock_current_root(&self) -> Result<RootLockGuard<'_>> {
        self.provider.lock_root(ROOT_LOCK_TIMEOUT)
    }

    /// No explicit flush step is needed beyond what `append` already
    /// guarantees (every write is immediately written+flushed to the
    /// underlying file, spec §4.1); kept as an explicit call so callers
    /// that want a durability checkpoint have a named place to put it.
    pub fn flush_wal(&self) -> Result<()> {
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.provider.close()
    }

    pub fn cache_metrics(&self) -> (super::atom_cache::CacheMetrics, super::atom_cache::CacheMetrics) {
        (self.objects.metrics(), self.bytes.metrics())
    }
}

fn approx_json_size(value: &Json) -> u64 {
    serde_json::to_vec(value).map(|v| v.len() as u64).unwrap_or(64)
}

/// Returns `atom` with its pointer field set to `pointer`, consuming it
/// (used by [`crate::commit::save_atom`] once `push_atom` hands back the
/// pointer a freshly-built atom was written at).
pub(crate) fn with_pointer(mut atom: AnyAtom, pointer: AtomPointer) -> AnyAtom {
    set_pointer(&mut atom, pointer);
    atom
}

fn set_pointer(atom: &mut AnyAtom, pointer: AtomPointer) {
    match atom {
        AnyAtom::Root(a) => a.pointer = Some(pointer),
        AnyAtom::Literal(a) => a.pointer = Some(pointer),
        AnyAtom::Bytes(a) => a.pointer = Some(pointer),
        AnyAtom::Object(a) => a.pointer = Some(pointer),
        AnyAtom::Mutable(a) => a.pointer = Some(pointer),
        AnyAtom::List(a) => a.pointer = Some(pointer),
        AnyAtom::HashDictionary(a) => a.pointer = Some(pointer),
        AnyAtom::Dictionary(a) => a.pointer = Some(pointer),
        AnyAtom::Set(a) => a.pointer = Some(pointer),
        AnyAtom::CountedSet(a) => a.pointer = Some(pointer),
        AnyAtom::RepeatedKeysDictionary(a) => a.pointer = Some(pointer),
        AnyAtom::IndexRegistry(a) => a.pointer = Some(pointer),
        AnyAtom::Plan(_) => {}
        AnyAtom::VectorIndex(a) => a.pointer = Some(pointer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_model::DBObject;

    struct NoopLoader;
    impl AtomLoader for NoopLoader {
        fn load(&mut self, pointer: AtomPointer, _class_name: &str) -> Result<Rc<AnyAtom>> {
            Err(Error::not_supported(format!("no loader in this test ({pointer})")))
        }
    }

    #[test]
    fn push_then_get_round_trips_a_db_object() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(crate::storage::block_provider::FileBlockProvider::open(dir.path()).unwrap());
        let storage = SharedStorage::new(provider);
        let tx = Uuid::new_v4();
        let obj = DBObject::new().with_attr("name", crate::atom::AtomValue::str("Ada"));
        let pointer = storage.push_atom(&AnyAtom::Object(obj), tx).unwrap();

        let mut loader = NoopLoader;
        let loaded = storage.get_atom(pointer, "DBObject", &mut loader).unwrap();
        match loaded.as_ref() {
            AnyAtom::Object(o) => assert_eq!(o.get("name").as_str(), Some("Ada")),
            other => panic!("unexpected atom kind: {other:?}"),
        }
    }

    #[test]
    fn push_then_get_round_trips_raw_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(crate::storage::block_provider::FileBlockProvider::open(dir.path()).unwrap());
        let storage = SharedStorage::new(provider);
        let pointer = storage.push_bytes(b"hello world", Uuid::new_v4()).unwrap();
        let back = storage.get_bytes(pointer).unwrap();
        assert_eq!(back.as_slice(), b"hello world");
    }

    #[test]
    fn root_round_trips_through_update_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(crate::storage::block_provider::FileBlockProvider::open(dir.path()).unwrap());
        let storage = SharedStorage::new(provider);
        assert!(storage.read_current_root().unwrap().is_none());
        let pointer = AtomPointer::new(Uuid::new_v4(), 42);
        storage.set_current_root(pointer).unwrap();
        assert_eq!(storage.read_current_root().unwrap(), Some(pointer));
    }
}
