//! Flat append-only key-value file.
//!
//! A flat database is written once, front to back, and then only iterated.
//! It backs bulk exports where ordering and random access don't matter.
//!
//! ## Record Format
//!
//! ```text
//! | key_len (4, LE) | key | value_len (4, LE) | value |
//! ```
//!
//! ## Modes
//!
//! - **write**: after [`FlatDatabase::create`]; accepts `put` and batches
//! - **read**: after [`FlatDatabase::open`] or [`FlatDatabase::commit`];
//!   accepts `iter`
//!
//! Point lookups (`has`, `get`, `delete`) are never supported.

use crate::error::{CoreError, CoreResult};
use ancientdb_storage::{FileBackend, StorageBackend};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::debug;

const LEN_SIZE: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Write,
    Read,
    Closed,
}

#[derive(Debug)]
struct FlatState {
    backend: Option<FileBackend>,
    mode: Mode,
    iterating: bool,
}

/// A single-file, append-only key-value store.
#[derive(Debug)]
pub struct FlatDatabase {
    path: PathBuf,
    state: Mutex<FlatState>,
}

fn encode_record(buf: &mut Vec<u8>, key: &[u8], value: &[u8]) -> CoreResult<()> {
    let key_len = u32::try_from(key.len())
        .map_err(|_| CoreError::invalid_operation("flat database key too large"))?;
    let value_len = u32::try_from(value.len())
        .map_err(|_| CoreError::invalid_operation("flat database value too large"))?;
    buf.extend_from_slice(&key_len.to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(&value_len.to_le_bytes());
    buf.extend_from_slice(value);
    Ok(())
}

impl FlatDatabase {
    /// Creates (or truncates) the file at `path` and opens it for writing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: &Path) -> CoreResult<Self> {
        let mut backend = FileBackend::open_with_create_dirs(path)?;
        if backend.size()? > 0 {
            backend.truncate(0)?;
        }
        debug!(path = %path.display(), "Created flat database");
        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(FlatState {
                backend: Some(backend),
                mode: Mode::Write,
                iterating: false,
            }),
        })
    }

    /// Opens an existing file for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist.
    pub fn open(path: &Path) -> CoreResult<Self> {
        let backend = FileBackend::open_read_only(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(FlatState {
                backend: Some(backend),
                mode: Mode::Read,
                iterating: false,
            }),
        })
    }

    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Not supported.
    ///
    /// # Panics
    ///
    /// Always panics.
    pub fn has(&self, _key: &[u8]) -> bool {
        panic!("flat database: has is not supported")
    }

    /// Not supported.
    ///
    /// # Panics
    ///
    /// Always panics.
    pub fn get(&self, _key: &[u8]) -> Option<Vec<u8>> {
        panic!("flat database: get is not supported")
    }

    /// Not supported.
    ///
    /// # Panics
    ///
    /// Always panics.
    pub fn delete(&self, _key: &[u8]) {
        panic!("flat database: delete is not supported")
    }

    /// Appends one record.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the write fails, or [`CoreError::Closed`].
    ///
    /// # Panics
    ///
    /// Panics in read mode.
    pub fn put(&self, key: &[u8], value: &[u8]) -> CoreResult<()> {
        let mut record = Vec::with_capacity(key.len() + value.len() + 2 * LEN_SIZE as usize);
        encode_record(&mut record, key, value)?;
        self.write_raw(&record)
    }

    fn write_raw(&self, records: &[u8]) -> CoreResult<()> {
        let mut state = self.state.lock();
        match state.mode {
            Mode::Write => {}
            Mode::Read => panic!("flat database: put is not supported in read mode"),
            Mode::Closed => return Err(CoreError::Closed),
        }
        let backend = state.backend.as_mut().ok_or(CoreError::Closed)?;
        backend.append(records)?;
        Ok(())
    }

    /// Starts a write batch.
    #[must_use]
    pub fn new_batch(&self) -> FlatBatch<'_> {
        FlatBatch {
            db: self,
            buf: Vec::new(),
        }
    }

    /// Flushes and syncs the file, then switches to read mode.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the sync or reopen fails.
    ///
    /// # Panics
    ///
    /// Panics in read mode.
    pub fn commit(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        match state.mode {
            Mode::Write => {}
            Mode::Read => panic!("flat database: commit is not supported in read mode"),
            Mode::Closed => return Err(CoreError::Closed),
        }
        if let Some(mut backend) = state.backend.take() {
            backend.flush()?;
            backend.sync()?;
        }
        state.backend = Some(FileBackend::open_read_only(&self.path)?);
        state.mode = Mode::Read;
        debug!(path = %self.path.display(), "Committed flat database");
        Ok(())
    }

    /// Iterates the records whose key starts with `prefix`, in insertion
    /// order, skipping keys below `prefix ++ start`.
    ///
    /// The file is not sorted, so the whole file is scanned: records with
    /// other prefixes are passed over, not treated as the end.
    ///
    /// Only one iterator can be live at a time.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] while another iterator is
    /// live, or [`CoreError::Closed`].
    ///
    /// # Panics
    ///
    /// Panics in write mode.
    pub fn iter(&self, prefix: &[u8], start: &[u8]) -> CoreResult<FlatIter<'_>> {
        let mut state = self.state.lock();
        match state.mode {
            Mode::Read => {}
            Mode::Write => panic!("flat database: iteration is not supported in write mode"),
            Mode::Closed => return Err(CoreError::Closed),
        }
        if state.iterating {
            return Err(CoreError::invalid_operation(
                "flat database: another iterator is in progress",
            ));
        }
        let end = state.backend.as_ref().ok_or(CoreError::Closed)?.size()?;
        state.iterating = true;

        let mut lower = prefix.to_vec();
        lower.extend_from_slice(start);
        Ok(FlatIter {
            db: self,
            prefix: prefix.to_vec(),
            lower,
            offset: 0,
            end,
            done: false,
        })
    }

    /// Releases the file. Writes not yet committed are flushed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the final flush fails.
    pub fn close(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        let mode = state.mode;
        state.mode = Mode::Closed;
        if let Some(mut backend) = state.backend.take() {
            if mode == Mode::Write {
                backend.flush()?;
                backend.sync()?;
            }
        }
        Ok(())
    }

    fn read_record(&self, offset: u64, end: u64) -> CoreResult<(Vec<u8>, Vec<u8>, u64)> {
        let state = self.state.lock();
        let backend = state.backend.as_ref().ok_or(CoreError::Closed)?;
        let truncated = || {
            CoreError::corruption(
                self.path.display().to_string(),
                format!("truncated record at offset {offset}"),
            )
        };

        let read_len = |at: u64| -> CoreResult<u64> {
            if at + LEN_SIZE > end {
                return Err(truncated());
            }
            let raw = backend.read_at(at, LEN_SIZE as usize)?;
            Ok(u64::from(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])))
        };

        let key_len = read_len(offset)?;
        let key_at = offset + LEN_SIZE;
        if key_at + key_len > end {
            return Err(truncated());
        }
        let key = backend.read_at(key_at, key_len as usize)?;

        let value_len = read_len(key_at + key_len)?;
        let value_at = key_at + key_len + LEN_SIZE;
        if value_at + value_len > end {
            return Err(truncated());
        }
        let value = backend.read_at(value_at, value_len as usize)?;
        Ok((key, value, value_at + value_len))
    }

    fn finish_iteration(&self) {
        self.state.lock().iterating = false;
    }
}

/// A batch of records written to a [`FlatDatabase`] in one append.
#[derive(Debug)]
pub struct FlatBatch<'a> {
    db: &'a FlatDatabase,
    buf: Vec<u8>,
}

impl FlatBatch<'_> {
    /// Stages one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the key or value exceeds 4 GiB.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> CoreResult<()> {
        encode_record(&mut self.buf, key, value)
    }

    /// Returns the number of staged bytes.
    #[must_use]
    pub fn value_size(&self) -> usize {
        self.buf.len()
    }

    /// Appends the staged records to the database. The batch keeps its
    /// contents; call [`reset`](Self::reset) to reuse it.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the write fails.
    ///
    /// # Panics
    ///
    /// Panics if the database is in read mode.
    pub fn write(&self) -> CoreResult<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        self.db.write_raw(&self.buf)
    }

    /// Discards the staged records.
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

/// Iterator over the records of a [`FlatDatabase`].
///
/// Yields `(key, value)` pairs. A malformed record ends the iteration with
/// an error.
#[derive(Debug)]
pub struct FlatIter<'a> {
    db: &'a FlatDatabase,
    prefix: Vec<u8>,
    lower: Vec<u8>,
    offset: u64,
    end: u64,
    done: bool,
}

impl Iterator for FlatIter<'_> {
    type Item = CoreResult<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done && self.offset < self.end {
            match self.db.read_record(self.offset, self.end) {
                Ok((key, value, next)) => {
                    self.offset = next;
                    if key.starts_with(&self.prefix) && key >= self.lower {
                        return Some(Ok((key, value)));
                    }
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
        None
    }
}

impl Drop for FlatIter<'_> {
    fn drop(&mut self) {
        self.db.finish_iteration();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use tempfile::tempdir;

    fn collect(iter: FlatIter<'_>) -> Vec<(Vec<u8>, Vec<u8>)> {
        iter.map(Result::unwrap).collect()
    }

    #[test]
    fn write_commit_iterate() {
        let temp = tempdir().unwrap();
        let db = FlatDatabase::create(&temp.path().join("export.flat")).unwrap();
        db.put(b"b-2", b"two").unwrap();
        db.put(b"a-1", b"one").unwrap();
        db.put(b"b-1", b"uno").unwrap();
        db.commit().unwrap();

        let all = collect(db.iter(b"", b"").unwrap());
        assert_eq!(
            all,
            vec![
                (b"b-2".to_vec(), b"two".to_vec()),
                (b"a-1".to_vec(), b"one".to_vec()),
                (b"b-1".to_vec(), b"uno".to_vec()),
            ]
        );

        let prefixed = collect(db.iter(b"b-", b"").unwrap());
        assert_eq!(prefixed.len(), 2);

        let started = collect(db.iter(b"b-", b"2").unwrap());
        assert_eq!(started, vec![(b"b-2".to_vec(), b"two".to_vec())]);
    }

    #[test]
    fn iteration_scans_past_other_prefixes() {
        let temp = tempdir().unwrap();
        let db = FlatDatabase::create(&temp.path().join("export.flat")).unwrap();
        db.put(b"h-3", b"c").unwrap();
        db.put(b"r-1", b"x").unwrap();
        db.put(b"h-1", b"a").unwrap();
        db.put(b"r-2", b"y").unwrap();
        db.put(b"h-5", b"e").unwrap();
        db.commit().unwrap();

        let headers = collect(db.iter(b"h-", b"2").unwrap());
        assert_eq!(
            headers,
            vec![(b"h-3".to_vec(), b"c".to_vec()), (b"h-5".to_vec(), b"e".to_vec())]
        );
    }

    #[test]
    fn batches_stage_records() {
        let temp = tempdir().unwrap();
        let db = FlatDatabase::create(&temp.path().join("export.flat")).unwrap();

        let mut batch = db.new_batch();
        batch.put(b"k", b"value").unwrap();
        assert_eq!(batch.value_size(), 4 + 1 + 4 + 5);
        batch.write().unwrap();
        batch.reset();
        assert_eq!(batch.value_size(), 0);
        batch.put(b"k2", b"").unwrap();
        batch.write().unwrap();
        db.commit().unwrap();

        let all = collect(db.iter(b"", b"").unwrap());
        assert_eq!(all.len(), 2);
        assert!(all[1].1.is_empty());
    }

    #[test]
    fn reopen_reads_records() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("export.flat");
        {
            let db = FlatDatabase::create(&path).unwrap();
            db.put(b"key", b"value").unwrap();
            db.close().unwrap();
        }
        let db = FlatDatabase::open(&path).unwrap();
        assert_eq!(
            collect(db.iter(b"", b"").unwrap()),
            vec![(b"key".to_vec(), b"value".to_vec())]
        );

        // Creating again truncates.
        drop(db);
        let db = FlatDatabase::create(&path).unwrap();
        db.commit().unwrap();
        assert!(collect(db.iter(b"", b"").unwrap()).is_empty());
    }

    #[test]
    fn one_iterator_at_a_time() {
        let temp = tempdir().unwrap();
        let db = FlatDatabase::create(&temp.path().join("export.flat")).unwrap();
        db.put(b"a", b"1").unwrap();
        db.commit().unwrap();

        let first = db.iter(b"", b"").unwrap();
        assert!(matches!(
            db.iter(b"", b""),
            Err(CoreError::InvalidOperation { .. })
        ));
        drop(first);
        assert!(db.iter(b"", b"").is_ok());
    }

    #[test]
    fn truncated_file_reports_corruption() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("export.flat");
        let mut raw = Vec::new();
        encode_record(&mut raw, b"whole", b"record").unwrap();
        raw.extend_from_slice(&10u32.to_le_bytes());
        raw.extend_from_slice(b"shor");
        std::fs::write(&path, &raw).unwrap();

        let db = FlatDatabase::open(&path).unwrap();
        let mut iter = db.iter(b"", b"").unwrap();
        assert!(iter.next().unwrap().is_ok());
        assert!(matches!(
            iter.next().unwrap(),
            Err(CoreError::Corruption { .. })
        ));
        assert!(iter.next().is_none());
    }

    #[test]
    fn mode_misuse_panics() {
        let temp = tempdir().unwrap();
        let db = FlatDatabase::create(&temp.path().join("export.flat")).unwrap();
        assert!(catch_unwind(AssertUnwindSafe(|| db.iter(b"", b""))).is_err());
        assert!(catch_unwind(AssertUnwindSafe(|| db.get(b"k"))).is_err());
        assert!(catch_unwind(AssertUnwindSafe(|| db.has(b"k"))).is_err());
        assert!(catch_unwind(AssertUnwindSafe(|| db.delete(b"k"))).is_err());

        db.commit().unwrap();
        assert!(catch_unwind(AssertUnwindSafe(|| db.put(b"k", b"v"))).is_err());
    }

    #[test]
    fn closed_database_rejects_use() {
        let temp = tempdir().unwrap();
        let db = FlatDatabase::create(&temp.path().join("export.flat")).unwrap();
        db.close().unwrap();
        assert!(matches!(db.put(b"k", b"v"), Err(CoreError::Closed)));
        assert!(matches!(db.iter(b"", b""), Err(CoreError::Closed)));
    }
}
