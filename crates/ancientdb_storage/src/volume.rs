//! Named file namespaces.
//!
//! A freezer keeps every table's index, data and metadata files side by side
//! in one namespace:
//!
//! ```text
//! <freezer_dir>/
//! ├─ FLOCK               # Advisory lock (exclusive for writers, shared for readers)
//! ├─ headers.cidx        # Index file
//! ├─ headers.meta        # Table metadata
//! ├─ headers.0000.cdat   # Data files
//! └─ headers.0001.cdat
//! ```
//!
//! [`DirVolume`] maps that namespace onto a directory; [`MemoryVolume`] keeps
//! it in memory for ephemeral freezers and tests.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::file::FileBackend;
use crate::memory::InMemoryBackend;
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Name of the advisory lock file inside a [`DirVolume`].
pub const LOCK_FILE: &str = "FLOCK";

/// Suffix used for the temporary file of [`Volume::write_atomic`].
const TEMP_SUFFIX: &str = ".tmp";

/// A flat namespace of named byte stores.
///
/// # Invariants
///
/// - `open` on a writable volume creates missing files
/// - `write_atomic` either leaves the old contents or the new contents,
///   never a mixture, even across a crash
/// - `list` never reports the lock file or temporary files
pub trait Volume: Send + Sync + fmt::Debug {
    /// Opens (creating if writable and missing) the named file.
    fn open(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>>;

    /// Returns whether the named file exists.
    fn exists(&self, name: &str) -> StorageResult<bool>;

    /// Returns the size of the named file, or 0 if it does not exist.
    fn file_size(&self, name: &str) -> StorageResult<u64>;

    /// Removes the named file. Removing a missing file is not an error.
    fn remove(&self, name: &str) -> StorageResult<()>;

    /// Reads the full contents of the named file, `None` if missing.
    fn read(&self, name: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Replaces the contents of the named file atomically.
    fn write_atomic(&self, name: &str, data: &[u8]) -> StorageResult<()>;

    /// Lists all file names in the namespace, sorted.
    fn list(&self) -> StorageResult<Vec<String>>;

    /// Makes creations, renames and removals durable.
    fn sync_dir(&self) -> StorageResult<()>;

    /// Returns whether the volume rejects writes.
    fn is_read_only(&self) -> bool;

    /// Returns the on-disk location, if any.
    fn location(&self) -> Option<&Path> {
        None
    }
}

/// A volume backed by a directory on disk.
///
/// A writable `DirVolume` holds an exclusive lock on `FLOCK` for its
/// lifetime; a read-only one holds a shared lock, so any number of readers
/// can coexist but never alongside a writer.
pub struct DirVolume {
    path: PathBuf,
    read_only: bool,
    _lock_file: File,
}

impl DirVolume {
    /// Opens a directory for reading and writing, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another handle holds the lock,
    /// or an I/O error if the directory cannot be created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        fs::create_dir_all(path)?;
        let lock_file = Self::lock_file(path)?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(path.to_path_buf()));
        }
        Ok(Self {
            path: path.to_path_buf(),
            read_only: false,
            _lock_file: lock_file,
        })
    }

    /// Opens an existing directory for reading only.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the directory is missing and
    /// [`StorageError::Locked`] if a writer holds the lock.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        if !path.is_dir() {
            return Err(StorageError::NotFound(path.display().to_string()));
        }
        let lock_file = Self::lock_file(path)?;
        if lock_file.try_lock_shared().is_err() {
            return Err(StorageError::Locked(path.to_path_buf()));
        }
        Ok(Self {
            path: path.to_path_buf(),
            read_only: true,
            _lock_file: lock_file,
        })
    }

    fn lock_file(path: &Path) -> StorageResult<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?)
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.read_only {
            Err(StorageError::ReadOnly)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for DirVolume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirVolume")
            .field("path", &self.path)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl Volume for DirVolume {
    fn open(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        let path = self.path.join(name);
        let backend = if self.read_only {
            FileBackend::open_read_only(&path)?
        } else {
            FileBackend::open(&path)?
        };
        Ok(Box::new(backend))
    }

    fn exists(&self, name: &str) -> StorageResult<bool> {
        Ok(self.path.join(name).is_file())
    }

    fn file_size(&self, name: &str) -> StorageResult<u64> {
        match fs::metadata(self.path.join(name)) {
            Ok(meta) => Ok(meta.len()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    fn remove(&self, name: &str) -> StorageResult<()> {
        self.check_writable()?;
        match fs::remove_file(self.path.join(name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn read(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        match fs::read(self.path.join(name)) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Uses write-then-rename:
    /// 1. Write to `<name>.tmp`
    /// 2. Sync the temporary file
    /// 3. Rename it over `<name>`
    /// 4. Fsync the directory so the rename is durable
    fn write_atomic(&self, name: &str, data: &[u8]) -> StorageResult<()> {
        self.check_writable()?;
        let target = self.path.join(name);
        let temp = self.path.join(format!("{name}{TEMP_SUFFIX}"));

        let mut file = File::create(&temp)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp, &target)?;
        self.sync_dir()
    }

    fn list(&self) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name == LOCK_FILE || name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    /// On Windows, directory fsync is not supported; NTFS journaling covers
    /// metadata durability, so the call is a no-op there.
    #[cfg(unix)]
    fn sync_dir(&self) -> StorageResult<()> {
        if self.read_only {
            return Ok(());
        }
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_dir(&self) -> StorageResult<()> {
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// A volume that keeps every file in memory.
///
/// Handles returned by [`Volume::open`] share their buffer with the volume,
/// so reopening a file within the same `MemoryVolume` sees earlier writes.
#[derive(Debug, Default)]
pub struct MemoryVolume {
    files: RwLock<BTreeMap<String, InMemoryBackend>>,
}

impl MemoryVolume {
    /// Creates an empty volume.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle onto the named buffer, if present.
    ///
    /// Tests use this to corrupt files directly.
    #[must_use]
    pub fn backend(&self, name: &str) -> Option<InMemoryBackend> {
        self.files.read().get(name).cloned()
    }
}

impl Volume for MemoryVolume {
    fn open(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        let mut files = self.files.write();
        let backend = files.entry(name.to_string()).or_default().clone();
        Ok(Box::new(backend))
    }

    fn exists(&self, name: &str) -> StorageResult<bool> {
        Ok(self.files.read().contains_key(name))
    }

    fn file_size(&self, name: &str) -> StorageResult<u64> {
        match self.files.read().get(name) {
            Some(backend) => backend.size(),
            None => Ok(0),
        }
    }

    fn remove(&self, name: &str) -> StorageResult<()> {
        self.files.write().remove(name);
        Ok(())
    }

    fn read(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.files.read().get(name).map(InMemoryBackend::data))
    }

    fn write_atomic(&self, name: &str, data: &[u8]) -> StorageResult<()> {
        self.files
            .write()
            .insert(name.to_string(), InMemoryBackend::with_data(data.to_vec()));
        Ok(())
    }

    fn list(&self) -> StorageResult<Vec<String>> {
        Ok(self.files.read().keys().cloned().collect())
    }

    fn sync_dir(&self) -> StorageResult<()> {
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        false
    }
}
