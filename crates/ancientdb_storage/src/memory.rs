//! Heap-backed files for tests and ephemeral freezers.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// A file kept in a shared heap buffer.
///
/// Cloning a backend yields a second handle onto the **same** buffer. A
/// [`crate::MemoryVolume`] relies on this so that a table reopened in the
/// same process sees the bytes written before.
///
/// # Example
///
/// ```rust
/// use ancientdb_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let offset = backend.append(b"test data").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(backend.size().unwrap(), 9);
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a buffer holding `data`, e.g. a torn file for repair tests.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Copies out the buffer.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Returns the number of handles sharing this buffer.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.data)
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        match offset.checked_add(len as u64) {
            Some(end) if end <= size => Ok(data[offset as usize..end as usize].to_vec()),
            _ => Err(StorageError::ReadPastEnd { offset, len, size }),
        }
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }
        data.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_new_is_empty() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(backend.data().is_empty());
    }

    #[test]
    fn memory_append_returns_correct_offset() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.size().unwrap(), 11);
    }

    #[test]
    fn memory_read_past_end() {
        let backend = InMemoryBackend::with_data(b"abc".to_vec());
        assert!(matches!(
            backend.read_at(2, 2),
            Err(StorageError::ReadPastEnd { offset: 2, len: 2, size: 3 })
        ));
        assert!(backend.read_at(3, 0).unwrap().is_empty());
    }

    #[test]
    fn clones_share_the_buffer() {
        let mut first = InMemoryBackend::new();
        let second = first.clone();
        assert_eq!(first.handle_count(), 2);

        first.append(b"shared").unwrap();
        assert_eq!(second.size().unwrap(), 6);
        assert_eq!(&second.read_at(0, 6).unwrap(), b"shared");
    }

    #[test]
    fn memory_truncate() {
        let mut backend = InMemoryBackend::with_data(b"abcdef".to_vec());
        backend.truncate(3).unwrap();
        assert_eq!(backend.data(), b"abc");
        assert!(matches!(
            backend.truncate(4),
            Err(StorageError::TruncateBeyondEnd { requested: 4, size: 3 })
        ));
    }
}
