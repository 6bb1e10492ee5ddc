//! Fault injection for freezer tests.
//!
//! A [`FaultyVolume`] wraps any [`Volume`] and hands out [`FaultyBackend`]s
//! that share one [`Faults`] switchboard. Write, sync and replace faults
//! only hit files whose name starts with the configured target prefix, so a
//! test can break one table of a freezer while the others keep working.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let faults = Arc::new(Faults::new());
//! let volume = FaultyVolume::new(Arc::new(MemoryVolume::new()), Arc::clone(&faults));
//! let freezer = Freezer::open_with_volume(Arc::new(volume), &tables, FreezerConfig::new())?;
//!
//! faults.set_target("bodies.");
//! faults.crash_after(0);
//! assert!(freezer.modify_ancients(&mut |batch| { /* ... */ Ok(()) }).is_err());
//! ```

use ancientdb_storage::{StorageBackend, StorageError, StorageResult, Volume};
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

fn simulated(message: &str) -> StorageError {
    StorageError::Io(io::Error::new(io::ErrorKind::Other, message.to_string()))
}

/// Shared fault switches.
#[derive(Debug)]
pub struct Faults {
    target: Mutex<Option<String>>,
    crash_after_bytes: AtomicU64,
    bytes_written: AtomicU64,
    fail_sync: AtomicBool,
    fail_truncate: AtomicBool,
    fail_replace: AtomicBool,
    crashed: AtomicBool,
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            target: Mutex::new(None),
            crash_after_bytes: AtomicU64::new(u64::MAX),
            bytes_written: AtomicU64::new(0),
            fail_sync: AtomicBool::new(false),
            fail_truncate: AtomicBool::new(false),
            fail_replace: AtomicBool::new(false),
            crashed: AtomicBool::new(false),
        }
    }
}

impl Faults {
    /// Creates a disarmed switchboard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts every fault to files whose name starts with `prefix`.
    pub fn set_target(&self, prefix: &str) {
        *self.target.lock() = Some(prefix.to_string());
    }

    /// Lets `bytes` more bytes reach the target files, then fails appends.
    ///
    /// The append that crosses the limit is written partially, like a
    /// write torn by a crash.
    pub fn crash_after(&self, bytes: u64) {
        self.bytes_written.store(0, Ordering::SeqCst);
        self.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Sets whether syncs of target files fail.
    pub fn set_fail_sync(&self, fail: bool) {
        self.fail_sync.store(fail, Ordering::SeqCst);
    }

    /// Sets whether truncations fail.
    ///
    /// Unlike the other faults this hits every file, modelling a process
    /// that dies before it can roll anything back.
    pub fn set_fail_truncate(&self, fail: bool) {
        self.fail_truncate.store(fail, Ordering::SeqCst);
    }

    /// Sets whether atomic replacements of target files fail.
    pub fn set_fail_replace(&self, fail: bool) {
        self.fail_replace.store(fail, Ordering::SeqCst);
    }

    /// Disarms every fault and clears the target.
    pub fn reset(&self) {
        *self.target.lock() = None;
        self.crash_after_bytes.store(u64::MAX, Ordering::SeqCst);
        self.bytes_written.store(0, Ordering::SeqCst);
        self.fail_sync.store(false, Ordering::SeqCst);
        self.fail_truncate.store(false, Ordering::SeqCst);
        self.fail_replace.store(false, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
    }

    /// Returns whether any fault has fired.
    #[must_use]
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    fn applies(&self, name: &str) -> bool {
        self.target
            .lock()
            .as_deref()
            .is_some_and(|prefix| name.starts_with(prefix))
    }

    fn trip(&self, message: &str) -> StorageError {
        self.crashed.store(true, Ordering::SeqCst);
        simulated(message)
    }
}

/// A backend that fails on command.
pub struct FaultyBackend {
    name: String,
    inner: Box<dyn StorageBackend>,
    faults: Arc<Faults>,
}

impl FaultyBackend {
    /// Wraps `inner`, which is known to the faults as `name`.
    pub fn new(name: &str, inner: Box<dyn StorageBackend>, faults: Arc<Faults>) -> Self {
        Self {
            name: name.to_string(),
            inner,
            faults,
        }
    }
}

impl fmt::Debug for FaultyBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultyBackend")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl StorageBackend for FaultyBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if !self.faults.applies(&self.name) {
            return self.inner.append(data);
        }
        let len = data.len() as u64;
        let current = self.faults.bytes_written.fetch_add(len, Ordering::SeqCst);
        let threshold = self.faults.crash_after_bytes.load(Ordering::SeqCst);

        if current >= threshold {
            return Err(self.faults.trip("simulated crash during write"));
        }
        if current + len > threshold {
            let partial = (threshold - current) as usize;
            let _ = self.inner.append(&data[..partial]);
            return Err(self.faults.trip("simulated crash during partial write"));
        }
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.faults.applies(&self.name) && self.faults.fail_sync.load(Ordering::SeqCst) {
            return Err(self.faults.trip("simulated crash during sync"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if self.faults.fail_truncate.load(Ordering::SeqCst) {
            return Err(self.faults.trip("simulated crash during truncate"));
        }
        self.inner.truncate(new_size)
    }
}

/// A volume whose files fail on command.
#[derive(Debug)]
pub struct FaultyVolume {
    inner: Arc<dyn Volume>,
    faults: Arc<Faults>,
}

impl FaultyVolume {
    /// Wraps `inner`; every file it opens reports to `faults`.
    pub fn new(inner: Arc<dyn Volume>, faults: Arc<Faults>) -> Self {
        Self { inner, faults }
    }

    /// Returns the shared switchboard.
    #[must_use]
    pub fn faults(&self) -> &Arc<Faults> {
        &self.faults
    }
}

impl Volume for FaultyVolume {
    fn open(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        let inner = self.inner.open(name)?;
        Ok(Box::new(FaultyBackend::new(
            name,
            inner,
            Arc::clone(&self.faults),
        )))
    }

    fn exists(&self, name: &str) -> StorageResult<bool> {
        self.inner.exists(name)
    }

    fn file_size(&self, name: &str) -> StorageResult<u64> {
        self.inner.file_size(name)
    }

    fn remove(&self, name: &str) -> StorageResult<()> {
        self.inner.remove(name)
    }

    fn read(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        self.inner.read(name)
    }

    fn write_atomic(&self, name: &str, data: &[u8]) -> StorageResult<()> {
        if self.faults.applies(name) && self.faults.fail_replace.load(Ordering::SeqCst) {
            return Err(self.faults.trip("simulated crash during replace"));
        }
        self.inner.write_atomic(name, data)
    }

    fn list(&self) -> StorageResult<Vec<String>> {
        self.inner.list()
    }

    fn sync_dir(&self) -> StorageResult<()> {
        self.inner.sync_dir()
    }

    fn is_read_only(&self) -> bool {
        self.inner.is_read_only()
    }

    fn location(&self) -> Option<&Path> {
        self.inner.location()
    }
}
