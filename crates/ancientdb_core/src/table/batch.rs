//! Staged appends to one table.

use super::index::IndexEntry;
use super::{FreezerTable, TableState};
use crate::codec::encode_value;
use crate::error::{CoreError, CoreResult};
use ancientdb_storage::StorageBackend;
use parking_lot::MutexGuard;
use serde::Serialize;
use tracing::warn;

/// A batch of appends to one table.
///
/// Encoded items and their index entries are staged in memory and written
/// out once the staged data exceeds the table's buffer limit, when the head
/// file fills up, or on [`commit`](Self::commit). Dropping a batch discards
/// whatever was staged since the last write.
///
/// The batch holds the table's writer lock for its whole lifetime.
pub struct TableBatch<'a> {
    table: &'a FreezerTable,
    _writer: MutexGuard<'a, ()>,
    data: Vec<u8>,
    index: Vec<u8>,
    /// Item number the next append must use.
    next: u64,
    /// Items staged since the last write.
    staged: u64,
    head_id: u32,
    /// Bytes already written to the head file.
    head_bytes: u64,
    /// Data and index bytes appended through this batch.
    written: u64,
}

impl<'a> TableBatch<'a> {
    pub(super) fn new(table: &'a FreezerTable) -> CoreResult<Self> {
        table.check_writable()?;
        let writer = table.writer.lock();
        let state = table.state.read();
        state.check_open()?;
        let (next, head_id, head_bytes) = (state.items, state.head_id, state.head_bytes);
        drop(state);

        Ok(Self {
            table,
            _writer: writer,
            data: Vec::new(),
            index: Vec::new(),
            next,
            staged: 0,
            head_id,
            head_bytes,
            written: 0,
        })
    }

    /// Returns the item number the next append must use.
    #[must_use]
    pub fn next_item(&self) -> u64 {
        self.next
    }

    /// Returns the data and index bytes appended through this batch.
    #[must_use]
    pub fn written_bytes(&self) -> u64 {
        self.written
    }

    /// Serializes `value` and stages it as item `item`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::OutOfOrder`] if `item` is not the next item,
    /// an encoding error, or an I/O error from an intermediate write.
    pub fn append<T: Serialize + ?Sized>(&mut self, item: u64, value: &T) -> CoreResult<()> {
        self.check_order(item)?;
        let bytes = encode_value(value)?;
        self.stage(&bytes)
    }

    /// Stages pre-encoded bytes as item `item`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::OutOfOrder`] if `item` is not the next item, or
    /// an I/O error from an intermediate write.
    pub fn append_raw(&mut self, item: u64, blob: &[u8]) -> CoreResult<()> {
        self.check_order(item)?;
        self.stage(blob)
    }

    fn check_order(&self, item: u64) -> CoreResult<()> {
        if item != self.next {
            return Err(CoreError::OutOfOrder {
                table: self.table.name.clone(),
                expected: self.next,
                got: item,
            });
        }
        Ok(())
    }

    fn stage(&mut self, item: &[u8]) -> CoreResult<()> {
        let stored = self.table.codec.encode(item)?;
        let size = stored.len() as u64;

        let mut offset = self.head_bytes + self.data.len() as u64;
        if offset > 0 && offset + size > self.table.max_file_size {
            self.commit()?;
            self.head_id = self.table.advance_head()?;
            self.head_bytes = 0;
            offset = 0;
        }
        let end = u32::try_from(offset + size).map_err(|_| {
            CoreError::invalid_operation(format!(
                "item {} of table {} is too large ({size} bytes)",
                self.next, self.table.name
            ))
        })?;

        self.data.extend_from_slice(&stored);
        IndexEntry::new(self.head_id, end).encode_into(&mut self.index);
        self.next += 1;
        self.staged += 1;

        if self.data.len() >= self.table.batch_limit {
            self.commit()?;
        }
        Ok(())
    }

    /// Writes all staged items to the table's files.
    ///
    /// Committed items become visible to readers immediately; durability
    /// still needs [`FreezerTable::sync`]. A failed write rewinds both files
    /// to their previous lengths so that the batch can be abandoned safely.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a write fails.
    pub fn commit(&mut self) -> CoreResult<()> {
        if self.staged == 0 {
            return Ok(());
        }
        let table = self.table;
        let mut state = table.state.write();
        state.check_open()?;

        let head_before = state.head_bytes;
        let index_before = state.index.size()?;
        if let Err(err) = write_out(&mut state, &table.name, &self.data, &self.index) {
            if let Ok(head) = state.head_file_mut(&table.name) {
                rewind(head.as_mut(), head_before, &table.name);
            }
            rewind(state.index.as_mut(), index_before, &table.name);
            return Err(err);
        }

        let data_len = self.data.len() as u64;
        state.head_bytes += data_len;
        state.items = self.next;
        drop(state);

        table.stats.record_write(self.staged, data_len);
        self.written += data_len + self.index.len() as u64;
        self.head_bytes += data_len;
        self.data.clear();
        self.index.clear();
        self.staged = 0;
        Ok(())
    }
}

fn write_out(state: &mut TableState, table: &str, data: &[u8], index: &[u8]) -> CoreResult<()> {
    state.head_file_mut(table)?.append(data)?;
    state.index.append(index)?;
    Ok(())
}

/// Cuts a file back to `len` after a failed write, logging any error.
fn rewind(file: &mut dyn StorageBackend, len: u64, table: &str) {
    let result = file
        .size()
        .and_then(|size| if size > len { file.truncate(len) } else { Ok(()) });
    if let Err(err) = result {
        warn!(table = %table, error = %err, "Failed to rewind after a failed write");
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{FreezerConfig, TableConfig};
    use crate::error::CoreError;
    use crate::stats::FreezerStats;
    use crate::table::FreezerTable;
    use ancientdb_storage::{MemoryVolume, Volume};
    use std::sync::Arc;

    fn table(volume: &Arc<MemoryVolume>, cap: u32, limit: usize) -> FreezerTable {
        let dyn_volume: Arc<dyn Volume> = volume.clone();
        FreezerTable::open(
            dyn_volume,
            "bodies",
            TableConfig::new().compressed(false),
            &FreezerConfig::new()
                .max_table_size(cap)
                .batch_buffer_limit(limit),
            Arc::new(FreezerStats::new()),
        )
        .unwrap()
    }

    #[test]
    fn staged_items_are_invisible_until_commit() {
        let volume = Arc::new(MemoryVolume::new());
        let table = table(&volume, 1024, 1 << 20);

        let mut batch = table.batch().unwrap();
        batch.append_raw(0, b"one").unwrap();
        batch.append_raw(1, b"two").unwrap();
        assert_eq!(batch.next_item(), 2);
        assert_eq!(table.items(), 0);
        assert_eq!(volume.file_size("bodies.0000.rdat").unwrap(), 0);

        batch.commit().unwrap();
        assert_eq!(table.items(), 2);
        assert_eq!(batch.written_bytes(), 6 + 16);
        drop(batch);
        assert_eq!(table.retrieve(1).unwrap(), b"two");
    }

    #[test]
    fn dropped_batch_discards_staged_items() {
        let volume = Arc::new(MemoryVolume::new());
        let table = table(&volume, 1024, 1 << 20);

        {
            let mut batch = table.batch().unwrap();
            batch.append_raw(0, b"lost").unwrap();
        }
        assert_eq!(table.items(), 0);
        table.append_raw(0, b"kept").unwrap();
        assert_eq!(table.retrieve(0).unwrap(), b"kept");
    }

    #[test]
    fn buffer_limit_flushes_early() {
        let volume = Arc::new(MemoryVolume::new());
        let table = table(&volume, 1024, 16);

        let mut batch = table.batch().unwrap();
        batch.append_raw(0, &[1u8; 10]).unwrap();
        assert_eq!(table.items(), 0);
        batch.append_raw(1, &[2u8; 10]).unwrap();
        // 20 staged bytes passed the 16-byte limit.
        assert_eq!(table.items(), 2);
        batch.append_raw(2, &[3u8; 10]).unwrap();
        assert_eq!(table.items(), 2);
    }

    #[test]
    fn rotation_commits_and_syncs_finished_file() {
        let volume = Arc::new(MemoryVolume::new());
        let table = table(&volume, 25, 1 << 20);

        let mut batch = table.batch().unwrap();
        batch.append_raw(0, &[0u8; 20]).unwrap();
        batch.append_raw(1, &[1u8; 20]).unwrap();
        // Item 0 was written out when item 1 opened file 1.
        assert_eq!(table.items(), 1);
        assert_eq!(table.info().unwrap().flush_offset, 16);
        batch.commit().unwrap();
        assert_eq!(table.items(), 2);
    }

    #[test]
    fn typed_append_checks_order_first() {
        let volume = Arc::new(MemoryVolume::new());
        let table = table(&volume, 1024, 1 << 20);

        let mut batch = table.batch().unwrap();
        let err = batch.append(3, &"header").unwrap_err();
        assert!(matches!(err, CoreError::OutOfOrder { expected: 0, got: 3, .. }));
        batch.append(0, &"header").unwrap();
        batch.commit().unwrap();
        assert_eq!(table.items(), 1);
    }
}
