//! Append-only WAL storage and atomic root-pointer publication (spec
//! §4.1, §6.1). `FileBlockProvider` is the on-disk implementation;
//! `BlockProvider` is the abstract seam cluster/cloud adapters plug into
//! (spec §1: "out of scope; only the interfaces they consume/expose are
//! specified").

use std::cell::Cell;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use parking_lot::ReentrantMutex;
use serde::{Deserialize, Serialize};

use crate::atom::AtomPointer;
use crate::error::{Error, Result};

/// A WAL file is capped at this many bytes before a new one is started
/// (grounded in the teacher's `JOURNAL_LIMIT` WAL-rotation constant).
const WAL_SIZE_LIMIT: u64 = 64 * 1024 * 1024;

/// Identifies one WAL file within a `BlockProvider`.
pub type WalId = u64;

/// Abstract append-only log + atomic root pointer (spec §4.1).
pub trait BlockProvider: Send + Sync {
    fn new_wal(&self) -> Result<(WalId, u64)>;
    fn writer_wal_id(&self) -> WalId;
    /// Appends `bytes` to the writer WAL, rotating to a fresh file first
    /// if `wal_id` has reached the size limit. The returned `WalId` is
    /// whichever file the bytes actually landed in, which may differ
    /// from the requested `wal_id` after a rotation — callers must pack
    /// pointers with the returned id, not the one they passed in.
    fn append(&self, wal_id: WalId, bytes: &[u8]) -> Result<(WalId, u64)>;
    fn read_at(&self, wal_id: WalId, offset: u64, len: usize) -> Result<Vec<u8>>;
    fn get_current_root(&self) -> Result<Option<AtomPointer>>;
    fn update_root(&self, pointer: AtomPointer) -> Result<()>;
    fn lock_root(&self, timeout: Duration) -> Result<RootLockGuard<'_>>;
    fn close_wal(&self, wal_id: WalId) -> Result<()>;
    fn close(&self) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
struct RootFile {
    transaction_id: uuid::Uuid,
    offset: u64,
}

thread_local! {
    static ROOT_LOCK_DEPTH: Cell<u32> = Cell::new(0);
}

/// RAII guard for the re-entrant root lock (spec §4.1
/// `root_context_manager`). Holds two layers of exclusion for the whole
/// guard's lifetime: `root_mutex`, a `parking_lot::ReentrantMutex` that
/// actually serializes threads *within this process* (re-entrant for
/// the owning thread, blocking for every other thread — unlike
/// `fs2::FileExt::try_lock_exclusive`, which is scoped to the open file
/// description and so is already a no-op the second time the *same*
/// process calls it on the *same* `File`, re-entrant or not, and would
/// never actually block a second thread sharing that handle); and the
/// advisory `flock` on `space_root.lock`, which is what excludes other
/// *processes*. The OS lock is only taken/released at the outermost
/// re-entrant depth for this thread, tracked by `ROOT_LOCK_DEPTH`.
pub struct RootLockGuard<'a> {
    provider: &'a FileBlockProvider,
    _mutex_guard: parking_lot::ReentrantMutexGuard<'a, ()>,
    released: bool,
}

impl<'a> Drop for RootLockGuard<'a> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let depth = ROOT_LOCK_DEPTH.with(|d| {
            let v = d.get() - 1;
            d.set(v);
            v
        });
        if depth == 0 {
            let _ = fs2::FileExt::unlock(&*self.provider.lock_file.lock().unwrap());
        }
    }
}

/// On-disk `BlockProvider`: one directory holding numbered WAL files, a
/// `space_root` pointer file, and a `space_root.lock` advisory lock file
/// (spec §6.1, §4.1).
pub struct FileBlockProvider {
    base_dir: PathBuf,
    lock_file: std::sync::Mutex<File>,
    current_wal: std::sync::Mutex<(WalId, File, u64)>,
    root_mutex: ReentrantMutex<()>,
}

impl FileBlockProvider {
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir)?;
        let lock_path = base_dir.join("space_root.lock");
        let lock_file = OpenOptions::new().create(true).write(true).open(&lock_path)?;

        let (wal_id, file, offset) = Self::open_or_create_writer_wal(&base_dir)?;

        Ok(FileBlockProvider {
            base_dir,
            lock_file: std::sync::Mutex::new(lock_file),
            current_wal: std::sync::Mutex::new((wal_id, file, offset)),
            root_mutex: ReentrantMutex::new(()),
        })
    }

    fn wal_path(base_dir: &Path, wal_id: WalId) -> PathBuf {
        base_dir.join(format!("wal-{wal_id:020}.log"))
    }

    fn open_or_create_writer_wal(base_dir: &Path) -> Result<(WalId, File, u64)> {
        let mut max_id = 0u64;
        let mut found = false;
        for entry in fs::read_dir(base_dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if let Some(id_str) = name.strip_prefix("wal-").and_then(|s| s.strip_suffix(".log")) {
                    if let Ok(id) = id_str.parse::<u64>() {
                        found = true;
                        max_id = max_id.max(id);
                    }
                }
            }
        }

        let wal_id = if found { max_id } else { 0 };
        let path = Self::wal_path(base_dir, wal_id);
        let file = OpenOptions::new().create(true).read(true).append(true).open(&path)?;
        let size = file.metadata()?.len();

        if found && size >= WAL_SIZE_LIMIT {
            let wal_id = wal_id + 1;
            let path = Self::wal_path(base_dir, wal_id);
            let file = OpenOptions::new().create(true).read(true).append(true).open(&path)?;
            Ok((wal_id, file, 0))
        } else {
            Ok((wal_id, file, size))
        }
    }

    fn root_path(&self) -> PathBuf {
        self.base_dir.join("space_root")
    }
}

impl BlockProvider for FileBlockProvider {
    fn new_wal(&self) -> Result<(WalId, u64)> {
        let mut guard = self.current_wal.lock().unwrap();
        let next_id = guard.0 + 1;
        let path = Self::wal_path(&self.base_dir, next_id);
        let file = OpenOptions::new().create(true).read(true).append(true).open(&path)?;
        *guard = (next_id, file, 0);
        Ok((next_id, 0))
    }

    fn writer_wal_id(&self) -> WalId {
        self.current_wal.lock().unwrap().0
    }

    /// Appends `bytes` to the current writer WAL, rotating to a new WAL
    /// file first if the limit has been reached (spec §4.1 `new_wal`:
    /// "return an existing WAL opened for append ... or a fresh one").
    fn append(&self, wal_id: WalId, bytes: &[u8]) -> Result<(WalId, u64)> {
        let mut guard = self.current_wal.lock().unwrap();
        if guard.0 != wal_id {
            return Err(Error::validation(format!("wal {wal_id} is not the current writer wal")));
        }
        if guard.2 >= WAL_SIZE_LIMIT {
            drop(guard);
            self.new_wal()?;
            guard = self.current_wal.lock().unwrap();
        }
        let written_wal_id = guard.0;
        let offset = guard.2;
        guard.1.write_all(bytes)?;
        guard.1.flush()?;
        guard.2 += bytes.len() as u64;
        Ok((written_wal_id, offset))
    }

    /// Reads up to `len` bytes at `offset`, short of that if `offset +
    /// len` runs past the end of the file. The page cache always asks
    /// for a full `page_size` chunk, including for a WAL's trailing
    /// page, which is normally shorter than `page_size` — so a short
    /// read here is expected, not an error condition.
    fn read_at(&self, wal_id: WalId, offset: u64, len: usize) -> Result<Vec<u8>> {
        let path = Self::wal_path(&self.base_dir, wal_id);
        let mut file = File::open(&path)?;
        let file_len = file.metadata()?.len();
        if offset >= file_len {
            return Ok(Vec::new());
        }
        file.seek(SeekFrom::Start(offset))?;
        let available = (file_len - offset).min(len as u64) as usize;
        let mut buf = vec![0u8; available];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Tolerant of a missing or partially-written root file (spec §4.1:
    /// "Root read is tolerant of empty/partial files (returns None)").
    fn get_current_root(&self) -> Result<Option<AtomPointer>> {
        let path = self.root_path();
        let mut contents = String::new();
        match File::open(&path) {
            Ok(mut f) => {
                if f.read_to_string(&mut contents).is_err() || contents.is_empty() {
                    return Ok(None);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        }
        match serde_json::from_str::<RootFile>(&contents) {
            Ok(root) => Ok(Some(AtomPointer::new(root.transaction_id, root.offset))),
            Err(_) => Ok(None),
        }
    }

    /// Temp file + `fsync` + rename + directory `fsync` (spec §4.1,
    /// §6.1): durable on POSIX even across a crash mid-rename.
    fn update_root(&self, pointer: AtomPointer) -> Result<()> {
        let root = RootFile {
            transaction_id: pointer.transaction_id,
            offset: pointer.offset,
        };
        let body = serde_json::to_vec(&root)?;
        let tmp_path = self.base_dir.join(format!("space_root.tmp-{}", std::process::id()));
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&body)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, self.root_path())?;
        let dir = File::open(&self.base_dir)?;
        dir.sync_all()?;
        Ok(())
    }

    /// Non-blocking acquisition with a bounded retry loop (spec §4.1:
    /// "acquired non-blocking with bounded timeout; fail with a
    /// validation error on timeout"), re-entrant per thread.
    ///
    /// Acquires `root_mutex` first — this is what actually excludes
    /// other *threads* in this process, blocking them for as long as
    /// any thread holds (or re-entrantly re-holds) the guard. Only the
    /// outermost acquisition for this thread (`ROOT_LOCK_DEPTH` going
    /// 0 -> 1) takes the `flock`, which is what excludes other
    /// *processes*.
    fn lock_root(&self, timeout: Duration) -> Result<RootLockGuard<'_>> {
        let deadline = Instant::now() + timeout;
        let mutex_guard = loop {
            if let Some(g) = self.root_mutex.try_lock() {
                break g;
            }
            if Instant::now() >= deadline {
                return Err(Error::LockTimeout(timeout));
            }
            std::thread::sleep(Duration::from_millis(5));
        };

        let depth = ROOT_LOCK_DEPTH.with(|d| d.get());
        if depth > 0 {
            ROOT_LOCK_DEPTH.with(|d| d.set(depth + 1));
            return Ok(RootLockGuard {
                provider: self,
                _mutex_guard: mutex_guard,
                released: false,
            });
        }

        loop {
            let file = self.lock_file.lock().unwrap();
            match fs2::FileExt::try_lock_exclusive(&*file) {
                Ok(()) => {
                    drop(file);
                    ROOT_LOCK_DEPTH.with(|d| d.set(1));
                    return Ok(RootLockGuard {
                        provider: self,
                        _mutex_guard: mutex_guard,
                        released: false,
                    });
                }
                Err(_) => {
                    drop(file);
                    if Instant::now() >= deadline {
                        return Err(Error::LockTimeout(timeout));
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
            }
        }
    }

    fn close_wal(&self, _wal_id: WalId) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let guard = self.current_wal.lock().unwrap();
        guard.1.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "block_provider_test.rs"]
mod block_provider_test;
