//! The file abstraction every freezer table is built on.

use crate::error::StorageResult;

/// One append-only file of a freezer table.
///
/// Backends are plain byte stores. Index entries, data file layout and
/// metadata are interpreted by the table above them.
///
/// # Invariants
///
/// - `append` writes at the current end and returns that offset
/// - `read_at` sees every byte appended before it, synced or not
/// - after `sync` returns, appended bytes survive a crash
/// - `truncate` only ever shrinks a file
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - heap buffers for tests and ephemeral freezers
/// - [`super::FileBackend`] - files on disk
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range does not fit
    /// inside the file, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` and returns the offset it was written at.
    ///
    /// # Errors
    ///
    /// Returns an I/O error, or [`crate::StorageError::ReadOnly`].
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Hands buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an I/O error.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the file size, which is where the next append lands.
    ///
    /// # Errors
    ///
    /// Returns an I/O error.
    fn size(&self) -> StorageResult<u64>;

    /// Makes every appended byte durable.
    ///
    /// # Errors
    ///
    /// Returns an I/O error.
    fn sync(&mut self) -> StorageResult<()>;

    /// Cuts the file down to `new_size` bytes.
    ///
    /// Tables use this to drop torn writes during repair and to discard
    /// items at the head.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TruncateBeyondEnd`] if `new_size`
    /// exceeds the file size, [`crate::StorageError::ReadOnly`], or an I/O
    /// error.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
