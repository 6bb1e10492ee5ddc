//! Freezer tables.
//!
//! A table is one append-only column of items numbered from zero. It is
//! stored as:
//!
//! - a sequence of data files (`<name>.NNNN.cdat`, or `.rdat` when
//!   uncompressed), each capped at the configured size
//! - one index file (`<name>.cidx` / `.ridx`) of fixed-size [`IndexEntry`]
//!   records
//! - one metadata file (`<name>.meta`), see [`TableMetadata`]
//!
//! ## Item ranges
//!
//! ```text
//!   deleted        hidden           visible
//! |---------|------------------|--------------------|
//! 0    actual tail       virtual tail              head
//! ```
//!
//! Only items in `[virtual tail, head)` can be read. Hidden items still
//! occupy disk space until [`FreezerTable::prune`] removes the data files
//! that hold them.

mod batch;
pub mod index;
pub mod metadata;
mod repair;

pub use batch::TableBatch;
pub use index::{IndexEntry, ENTRY_SIZE};
pub use metadata::{TableMetadata, META_VERSION};

use crate::codec::ItemCodec;
use crate::config::{FreezerConfig, TableConfig};
use crate::error::{CoreError, CoreResult};
use crate::stats::FreezerStats;
use ancientdb_storage::{StorageBackend, Volume};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Returns the index file name of a table.
#[must_use]
pub fn index_file_name(name: &str, compressed: bool) -> String {
    let ext = if compressed { "cidx" } else { "ridx" };
    format!("{name}.{ext}")
}

/// Returns the name of data file `id` of a table.
#[must_use]
pub fn data_file_name(name: &str, compressed: bool, id: u32) -> String {
    let ext = if compressed { "cdat" } else { "rdat" };
    format!("{name}.{id:04}.{ext}")
}

/// Returns the metadata file name of a table.
#[must_use]
pub fn meta_file_name(name: &str) -> String {
    format!("{name}.meta")
}

/// Splits an index file name into table name and compression flag.
#[must_use]
pub fn parse_index_file_name(file: &str) -> Option<(&str, bool)> {
    if let Some(name) = file.strip_suffix(".cidx") {
        Some((name, true))
    } else {
        file.strip_suffix(".ridx").map(|name| (name, false))
    }
}

/// Mutable state of a table, guarded by the table's `RwLock`.
pub(crate) struct TableState {
    index: Box<dyn StorageBackend>,
    /// Open data files, `tail_id..=head_id`.
    files: BTreeMap<u32, Box<dyn StorageBackend>>,
    head_id: u32,
    tail_id: u32,
    /// Committed bytes in the head data file.
    head_bytes: u64,
    /// Number of items (the head).
    items: u64,
    /// First physically stored item (the actual tail).
    item_offset: u64,
    /// First visible item (the virtual tail).
    item_hidden: u64,
    metadata: TableMetadata,
    closed: bool,
}

impl TableState {
    fn check_open(&self) -> CoreResult<()> {
        if self.closed {
            Err(CoreError::Closed)
        } else {
            Ok(())
        }
    }

    /// Reads the index entry at position `pos` (0 is the sentinel).
    fn read_entry(&self, pos: u64) -> CoreResult<IndexEntry> {
        let raw = self.index.read_at(pos * ENTRY_SIZE, ENTRY_SIZE as usize)?;
        Ok(IndexEntry::decode(&raw))
    }

    fn data_file(&self, table: &str, id: u32) -> CoreResult<&dyn StorageBackend> {
        self.files
            .get(&id)
            .map(|file| file.as_ref())
            .ok_or_else(|| CoreError::corruption(table, format!("data file {id} is not open")))
    }

    fn head_file_mut(&mut self, table: &str) -> CoreResult<&mut Box<dyn StorageBackend>> {
        let head_id = self.head_id;
        self.files
            .get_mut(&head_id)
            .ok_or_else(|| CoreError::corruption(table, format!("head file {head_id} is not open")))
    }

    fn is_visible(&self, item: u64) -> bool {
        item >= self.item_hidden && item < self.items
    }
}

/// Point-in-time description of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    /// Table name.
    pub name: String,
    /// Whether items are compressed.
    pub compressed: bool,
    /// Whether the table takes part in tail truncation.
    pub prunable: bool,
    /// Number of items (the head).
    pub items: u64,
    /// First visible item.
    pub tail: u64,
    /// First physically stored item.
    pub actual_tail: u64,
    /// Number of the first data file.
    pub tail_file: u32,
    /// Number of the data file receiving appends.
    pub head_file: u32,
    /// Bytes in the head data file.
    pub head_bytes: u64,
    /// Durable index length recorded in metadata.
    pub flush_offset: u64,
    /// Total bytes of data and index files.
    pub size: u64,
}

/// One append-only column of items.
///
/// # Thread Safety
///
/// Reads take the state lock shared and may run concurrently with each
/// other. Writes (batch commits, truncations, sync) take it exclusively.
/// Only one [`TableBatch`] can be open at a time; a second caller blocks
/// until the first batch is dropped.
pub struct FreezerTable {
    name: String,
    config: TableConfig,
    codec: ItemCodec,
    max_file_size: u64,
    batch_limit: usize,
    read_only: bool,
    volume: Arc<dyn Volume>,
    stats: Arc<FreezerStats>,
    writer: Mutex<()>,
    state: RwLock<TableState>,
}

impl fmt::Debug for FreezerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("FreezerTable")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("items", &state.items)
            .field("tail", &state.item_hidden)
            .field("head_file", &state.head_id)
            .finish_non_exhaustive()
    }
}

impl FreezerTable {
    /// Opens (creating if needed) the table `name` inside `volume`.
    ///
    /// Opening validates the index, reconciles it with the data files and
    /// the metadata, and repairs whatever a crash left behind. Read-only
    /// tables report the first needed repair as [`CoreError::Corruption`].
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be read, are corrupted beyond
    /// repair, or carry an unknown metadata version.
    pub fn open(
        volume: Arc<dyn Volume>,
        name: &str,
        config: TableConfig,
        options: &FreezerConfig,
        stats: Arc<FreezerStats>,
    ) -> CoreResult<Self> {
        let read_only = options.read_only || volume.is_read_only();
        let (state, repaired) =
            repair::Repairer::new(volume.as_ref(), name, config.compressed, read_only).load()?;
        if repaired {
            stats.record_repair();
        }

        debug!(
            table = %name,
            items = state.items,
            tail = state.item_hidden,
            files = state.files.len(),
            "Opened freezer table"
        );

        Ok(Self {
            name: name.to_string(),
            config,
            codec: ItemCodec::new(config.compressed),
            max_file_size: u64::from(options.max_table_size),
            batch_limit: options.batch_buffer_limit,
            read_only,
            volume,
            stats,
            writer: Mutex::new(()),
            state: RwLock::new(state),
        })
    }

    /// Returns the table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the table configuration.
    #[must_use]
    pub fn config(&self) -> TableConfig {
        self.config
    }

    /// Returns whether the table rejects writes.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Returns the number of items (the head).
    #[must_use]
    pub fn items(&self) -> u64 {
        self.state.read().items
    }

    /// Returns the first visible item (the virtual tail).
    #[must_use]
    pub fn tail(&self) -> u64 {
        self.state.read().item_hidden
    }

    /// Returns the first physically stored item (the actual tail).
    #[must_use]
    pub fn actual_tail(&self) -> u64 {
        self.state.read().item_offset
    }

    /// Returns whether `item` is readable.
    #[must_use]
    pub fn has(&self, item: u64) -> bool {
        self.state.read().is_visible(item)
    }

    /// Describes the table's current state.
    ///
    /// # Errors
    ///
    /// Returns an error if file sizes cannot be read.
    pub fn info(&self) -> CoreResult<TableInfo> {
        let state = self.state.read();
        Ok(TableInfo {
            name: self.name.clone(),
            compressed: self.config.compressed,
            prunable: self.config.prunable,
            items: state.items,
            tail: state.item_hidden,
            actual_tail: state.item_offset,
            tail_file: state.tail_id,
            head_file: state.head_id,
            head_bytes: state.head_bytes,
            flush_offset: state.metadata.flush_offset,
            size: Self::size_locked(&state)?,
        })
    }

    /// Reads one item.
    ///
    /// # Errors
    ///
    /// - [`CoreError::NotFound`] if `item` is below the tail or at/after the head
    /// - [`CoreError::CorruptItem`] if the stored bytes fail to decode
    pub fn retrieve(&self, item: u64) -> CoreResult<Vec<u8>> {
        let state = self.state.read();
        state.check_open()?;
        if !state.is_visible(item) {
            return Err(CoreError::not_found(&self.name, item));
        }
        self.read_item(&state, item)
    }

    /// Reads up to `count` consecutive items starting at `start`.
    ///
    /// Reading stops early once the decoded items would exceed `max_bytes`
    /// (0 means no limit), but the first item is always returned. The range
    /// is also cut short at the head.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if `start` is not readable.
    pub fn retrieve_items(&self, start: u64, count: u64, max_bytes: u64) -> CoreResult<Vec<Vec<u8>>> {
        let state = self.state.read();
        state.check_open()?;
        if !state.is_visible(start) {
            return Err(CoreError::not_found(&self.name, start));
        }

        let end = start.saturating_add(count).min(state.items);
        let mut items = Vec::new();
        let mut total = 0u64;
        for item in start..end {
            let value = self.read_item(&state, item)?;
            total += value.len() as u64;
            if max_bytes > 0 && total > max_bytes && !items.is_empty() {
                break;
            }
            items.push(value);
        }
        Ok(items)
    }

    /// Reads `length` bytes at `offset` within one item, without reading the
    /// rest of it.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidOperation`] on compressed tables, or if the
    ///   range runs past the end of the item
    /// - [`CoreError::NotFound`] if `item` is not readable
    pub fn retrieve_bytes(&self, item: u64, offset: u64, length: u64) -> CoreResult<Vec<u8>> {
        if self.codec.is_compressed() {
            return Err(CoreError::invalid_operation(format!(
                "partial reads are not supported on compressed table {}",
                self.name
            )));
        }
        let state = self.state.read();
        state.check_open()?;
        if !state.is_visible(item) {
            return Err(CoreError::not_found(&self.name, item));
        }

        let (file, start, end) = self.item_bounds(&state, item)?;
        let size = end - start;
        if offset.checked_add(length).map_or(true, |stop| stop > size) {
            return Err(CoreError::invalid_operation(format!(
                "range {offset}+{length} exceeds item {item} of table {} ({size} bytes)",
                self.name
            )));
        }
        let bytes = state
            .data_file(&self.name, file)?
            .read_at(start + offset, length as usize)?;
        self.stats.record_read(length);
        Ok(bytes)
    }

    fn item_bounds(&self, state: &TableState, item: u64) -> CoreResult<(u32, u64, u64)> {
        let rel = item - state.item_offset;
        let raw = state
            .index
            .read_at(rel * ENTRY_SIZE, 2 * ENTRY_SIZE as usize)?;
        let start = IndexEntry::decode(&raw[..ENTRY_SIZE as usize]);
        let end = IndexEntry::decode(&raw[ENTRY_SIZE as usize..]);
        IndexEntry::bounds(start, end, rel == 0).ok_or_else(|| CoreError::CorruptItem {
            table: self.name.clone(),
            item,
            message: format!(
                "index offsets go backwards ({} > {})",
                start.offset, end.offset
            ),
        })
    }

    fn read_item(&self, state: &TableState, item: u64) -> CoreResult<Vec<u8>> {
        let (file, start, end) = self.item_bounds(state, item)?;
        let stored = state
            .data_file(&self.name, file)?
            .read_at(start, (end - start) as usize)?;
        self.stats.record_read(end - start);
        self.codec
            .decode(stored)
            .map_err(|message| CoreError::CorruptItem {
                table: self.name.clone(),
                item,
                message,
            })
    }

    /// Starts a batch of appends.
    ///
    /// Blocks while another batch on this table is open.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReadOnly`] or [`CoreError::Closed`].
    pub fn batch(&self) -> CoreResult<TableBatch<'_>> {
        TableBatch::new(self)
    }

    /// Serializes `value` and appends it as item `item`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::OutOfOrder`] if `item` is not the head, or an
    /// encoding or I/O error.
    pub fn append<T: Serialize + ?Sized>(&self, item: u64, value: &T) -> CoreResult<()> {
        let mut batch = self.batch()?;
        batch.append(item, value)?;
        batch.commit()
    }

    /// Appends pre-encoded bytes as item `item`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::OutOfOrder`] if `item` is not the head, or an
    /// I/O error.
    pub fn append_raw(&self, item: u64, blob: &[u8]) -> CoreResult<()> {
        let mut batch = self.batch()?;
        batch.append_raw(item, blob)?;
        batch.commit()
    }

    /// Discards every item at or after `items`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TruncationBelowTail`] if `items` is below the
    /// virtual tail.
    pub fn truncate_head(&self, items: u64) -> CoreResult<()> {
        self.check_writable()?;
        let _writer = self.writer.lock();
        let mut state = self.state.write();
        state.check_open()?;

        let existing = state.items;
        if existing <= items {
            return Ok(());
        }
        if items < state.item_hidden {
            return Err(CoreError::TruncationBelowTail {
                table: self.name.clone(),
                items,
                tail: state.item_hidden,
            });
        }
        if existing - items > 1 {
            warn!(table = %self.name, items, limit = existing, "Truncating freezer table");
        } else {
            debug!(table = %self.name, items, limit = existing, "Truncating freezer table");
        }

        let length = items - state.item_offset;
        let index_size = (length + 1) * ENTRY_SIZE;
        state.index.truncate(index_size)?;
        state.index.sync()?;
        if state.metadata.flush_offset > index_size {
            state.metadata.flush_offset = index_size;
            self.write_metadata(&state.metadata)?;
        }

        let expected = if length == 0 {
            IndexEntry::new(state.tail_id, 0)
        } else {
            state.read_entry(length)?
        };
        if expected.file != state.head_id {
            let doomed: Vec<u32> = state
                .files
                .range(expected.file + 1..)
                .map(|(id, _)| *id)
                .collect();
            for id in doomed {
                state.files.remove(&id);
                self.volume.remove(&self.data_file_name(id))?;
            }
            state.head_id = expected.file;
            self.volume.sync_dir()?;
        }

        let head_bytes = u64::from(expected.offset);
        state.head_file_mut(&self.name)?.truncate(head_bytes)?;
        state.head_bytes = head_bytes;
        state.items = items;
        self.stats.record_head_truncation();
        Ok(())
    }

    /// Hides every item before `tail` without deleting any bytes.
    ///
    /// The new tail is persisted in the metadata. Lowering the tail is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TruncationAboveHead`] if `tail` is past the head.
    pub fn truncate_tail(&self, tail: u64) -> CoreResult<()> {
        self.check_writable()?;
        let _writer = self.writer.lock();
        let mut state = self.state.write();
        state.check_open()?;
        self.raise_tail(&mut state, tail)
    }

    fn raise_tail(&self, state: &mut TableState, tail: u64) -> CoreResult<()> {
        if tail <= state.item_hidden {
            return Ok(());
        }
        if tail > state.items {
            return Err(CoreError::TruncationAboveHead {
                table: self.name.clone(),
                tail,
                head: state.items,
            });
        }
        debug!(table = %self.name, tail, previous = state.item_hidden, "Hiding freezer items");
        state.item_hidden = tail;
        state.metadata.virtual_tail = tail;
        self.write_metadata(&state.metadata)?;
        self.stats.record_tail_truncation();
        Ok(())
    }

    /// Hides every item before `tail` and deletes the data files that hold
    /// only hidden items.
    ///
    /// The visible tail becomes `tail`, but the actual tail is file-aligned:
    /// it moves to the first item of the data file holding `tail` (or to
    /// the head once every item is pruned), so hidden items sharing that
    /// file stay on disk. Repeating a prune at the same tail is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TruncationAboveHead`] if `tail` is past the head.
    pub fn prune(&self, tail: u64) -> CoreResult<()> {
        self.check_writable()?;
        let _writer = self.writer.lock();
        let mut state = self.state.write();
        state.check_open()?;
        self.raise_tail(&mut state, tail)?;

        if tail <= state.item_offset {
            return Ok(());
        }
        let new_tail_id = if tail == state.items {
            state.head_id
        } else {
            state.read_entry(tail - state.item_offset + 1)?.file
        };
        if new_tail_id == state.tail_id {
            return Ok(());
        }

        // Walk back to the first item stored in the new tail file.
        let mut first = tail;
        while first > state.item_offset
            && state.read_entry(first - state.item_offset)?.file == new_tail_id
        {
            first -= 1;
        }
        let sentinel_item = u32::try_from(first).map_err(|_| {
            CoreError::invalid_operation(format!(
                "tail {first} of table {} does not fit an index entry",
                self.name
            ))
        })?;

        self.sync_locked(&mut state)?;

        let keep_from = (first - state.item_offset + 1) * ENTRY_SIZE;
        let index_size = state.index.size()?;
        let mut content = Vec::with_capacity((index_size - keep_from + ENTRY_SIZE) as usize);
        IndexEntry::new(new_tail_id, sentinel_item).encode_into(&mut content);
        content.extend_from_slice(
            &state
                .index
                .read_at(keep_from, (index_size - keep_from) as usize)?,
        );
        let index_name = self.index_file_name();
        self.volume.write_atomic(&index_name, &content)?;
        state.index = self.volume.open(&index_name)?;

        let doomed: Vec<u32> = state
            .files
            .range(..new_tail_id)
            .map(|(id, _)| *id)
            .collect();
        for id in &doomed {
            state.files.remove(id);
            self.volume.remove(&self.data_file_name(*id))?;
        }
        self.volume.sync_dir()?;

        state.tail_id = new_tail_id;
        state.item_offset = first;
        state.metadata.flush_offset = content.len() as u64;
        self.write_metadata(&state.metadata)?;
        self.stats.record_pruned_files(doomed.len() as u64);

        info!(
            table = %self.name,
            tail,
            actual_tail = first,
            files = doomed.len(),
            "Pruned freezer table"
        );
        Ok(())
    }

    /// Makes all committed items durable and records the flush offset.
    ///
    /// # Errors
    ///
    /// Returns an error if a sync fails.
    pub fn sync(&self) -> CoreResult<()> {
        let mut state = self.state.write();
        state.check_open()?;
        self.sync_locked(&mut state)
    }

    fn sync_locked(&self, state: &mut TableState) -> CoreResult<()> {
        if self.read_only || state.closed {
            return Ok(());
        }
        state.head_file_mut(&self.name)?.sync()?;
        state.index.sync()?;
        let size = state.index.size()?;
        if state.metadata.flush_offset != size {
            state.metadata.flush_offset = size;
            self.write_metadata(&state.metadata)?;
        }
        Ok(())
    }

    /// Returns the total size of the data files and the index file.
    ///
    /// # Errors
    ///
    /// Returns an error if a size cannot be read.
    pub fn size(&self) -> CoreResult<u64> {
        let state = self.state.read();
        Self::size_locked(&state)
    }

    fn size_locked(state: &TableState) -> CoreResult<u64> {
        let mut total = state.index.size()?;
        for file in state.files.values() {
            total += file.size()?;
        }
        Ok(total)
    }

    /// Syncs (when writable) and releases all file handles.
    ///
    /// Later operations fail with [`CoreError::Closed`]. Closing twice is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns the sync error, if any; the table is closed regardless.
    pub fn close(&self) -> CoreResult<()> {
        let mut state = self.state.write();
        if state.closed {
            return Ok(());
        }
        let result = self.sync_locked(&mut state);
        state.closed = true;
        state.files.clear();
        result
    }

    /// Opens the next data file and makes it the head.
    ///
    /// The finished head file is synced first.
    fn advance_head(&self) -> CoreResult<u32> {
        let mut state = self.state.write();
        state.check_open()?;
        self.sync_locked(&mut state)?;

        let next = state.head_id.checked_add(1).ok_or_else(|| {
            CoreError::invalid_operation(format!("table {} ran out of file numbers", self.name))
        })?;
        let mut file = self.volume.open(&self.data_file_name(next))?;
        if file.size()? > 0 {
            file.truncate(0)?;
        }
        state.files.insert(next, file);
        state.head_id = next;
        state.head_bytes = 0;
        self.volume.sync_dir()?;

        debug!(table = %self.name, file = next, "Opened new head file");
        Ok(next)
    }

    fn check_writable(&self) -> CoreResult<()> {
        if self.read_only {
            Err(CoreError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn write_metadata(&self, metadata: &TableMetadata) -> CoreResult<()> {
        self.volume
            .write_atomic(&meta_file_name(&self.name), &metadata.encode())?;
        Ok(())
    }

    fn index_file_name(&self) -> String {
        index_file_name(&self.name, self.config.compressed)
    }

    fn data_file_name(&self, id: u32) -> String {
        data_file_name(&self.name, self.config.compressed, id)
    }
}
