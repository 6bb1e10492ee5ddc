//! Opening a table and reconciling its files after a crash.
//!
//! Appends write data before index entries and only record a flush offset
//! after both are synced, so a crash can leave:
//!
//! - a partial trailing index entry
//! - index entries past the flush offset whose data never reached disk
//! - index entries pointing past the end of the head data file
//! - data bytes past the last index entry
//! - data files outside the range named by the index
//!
//! [`Repairer::load`] fixes each of these in that order.

use super::index::{IndexEntry, ENTRY_SIZE};
use super::metadata::{TableMetadata, LEGACY_VERSION, META_VERSION};
use super::{data_file_name, index_file_name, meta_file_name, TableState};
use crate::error::{CoreError, CoreResult};
use ancientdb_storage::{StorageBackend, StorageError, Volume};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Entries validated per index read.
const CHECK_CHUNK_ENTRIES: u64 = 64 * 1024;

pub(super) struct Repairer<'a> {
    volume: &'a dyn Volume,
    name: &'a str,
    compressed: bool,
    read_only: bool,
    repaired: bool,
    persist_metadata: bool,
}

impl<'a> Repairer<'a> {
    pub(super) fn new(volume: &'a dyn Volume, name: &'a str, compressed: bool, read_only: bool) -> Self {
        Self {
            volume,
            name,
            compressed,
            read_only,
            repaired: false,
            persist_metadata: false,
        }
    }

    /// Records that a repair is needed, failing on read-only tables.
    fn fix(&mut self, problem: &str) -> CoreResult<()> {
        if self.read_only {
            return Err(CoreError::corruption(
                self.name,
                format!("{problem}; repair needs write access"),
            ));
        }
        self.repaired = true;
        Ok(())
    }

    fn open_file(&self, name: &str) -> CoreResult<Box<dyn StorageBackend>> {
        match self.volume.open(name) {
            Ok(file) => Ok(file),
            Err(StorageError::NotFound(_)) => Err(CoreError::corruption(
                self.name,
                format!("missing file {name}"),
            )),
            Err(err) => Err(err.into()),
        }
    }

    /// Opens data file `id`, which the index says holds items.
    ///
    /// Unlike the head file it is never recreated: a missing one is
    /// corruption no repair can undo.
    fn open_data_file(&self, id: u32) -> CoreResult<Box<dyn StorageBackend>> {
        let name = data_file_name(self.name, self.compressed, id);
        if !self.volume.exists(&name)? {
            return Err(CoreError::corruption(
                self.name,
                format!("missing data file {id}"),
            ));
        }
        self.open_file(&name)
    }

    /// Loads the table state, repairing it on the way.
    ///
    /// Returns the state and whether any repair was made.
    pub(super) fn load(mut self) -> CoreResult<(TableState, bool)> {
        let index_name = index_file_name(self.name, self.compressed);
        let mut index = self.open_file(&index_name)?;
        let mut size = index.size()?;

        let fresh = size == 0;
        if fresh {
            if self.read_only {
                return Err(CoreError::corruption(self.name, "index file is empty"));
            }
            index.append(&IndexEntry::default().encode())?;
            index.sync()?;
            size = ENTRY_SIZE;
        }

        let (mut metadata, version) = self.load_metadata()?;

        if size % ENTRY_SIZE != 0 {
            self.fix("partial index entry")?;
            let trimmed = size - size % ENTRY_SIZE;
            warn!(table = %self.name, size, trimmed, "Trimming partial index entry");
            index.truncate(trimmed)?;
            size = trimmed;
            if size == 0 {
                index.append(&IndexEntry::default().encode())?;
                size = ENTRY_SIZE;
            }
        }

        let valid = self.check_index(index.as_ref(), size)?;
        if valid < size {
            self.fix("invalid index entries")?;
            warn!(table = %self.name, size, valid, "Truncating invalid index entries");
            index.truncate(valid)?;
            size = valid;
        }

        if version < META_VERSION {
            if fresh {
                debug!(table = %self.name, "Created freezer table");
            } else {
                info!(table = %self.name, from = version, to = META_VERSION, "Upgrading table metadata");
            }
            metadata.flush_offset = size;
            self.persist_metadata = true;
        } else {
            let flush = metadata.flush_offset.max(ENTRY_SIZE);
            if size > flush {
                self.fix("index entries past the flush offset")?;
                warn!(
                    table = %self.name,
                    size,
                    flush_offset = flush,
                    "Dropping unflushed index entries"
                );
                index.truncate(flush)?;
                size = flush;
            } else if size < flush {
                warn!(
                    table = %self.name,
                    size,
                    flush_offset = flush,
                    "Rewinding flush offset to index end"
                );
                self.persist_metadata = true;
            }
            metadata.flush_offset = size;
        }

        let sentinel = IndexEntry::decode(&index.read_at(0, ENTRY_SIZE as usize)?);
        let tail_id = sentinel.file;
        let item_offset = u64::from(sentinel.offset);
        if version == LEGACY_VERSION {
            metadata.virtual_tail = item_offset;
        }
        if metadata.virtual_tail < item_offset {
            debug!(
                table = %self.name,
                virtual_tail = metadata.virtual_tail,
                actual_tail = item_offset,
                "Raising virtual tail to actual tail"
            );
            metadata.virtual_tail = item_offset;
            self.persist_metadata = true;
        }

        // Bring the last index entry and the head file into agreement.
        let mut entries = size / ENTRY_SIZE;
        let mut last = last_entry(index.as_ref(), entries, tail_id)?;
        let mut head = self.open_file(&data_file_name(self.name, self.compressed, last.file))?;
        let mut head_size = head.size()?;
        loop {
            let expected = u64::from(last.offset);
            if expected == head_size {
                break;
            }
            if expected < head_size {
                self.fix("data past the last index entry")?;
                warn!(
                    table = %self.name,
                    file = last.file,
                    indexed = expected,
                    stored = head_size,
                    "Truncating dangling head data"
                );
                head.truncate(expected)?;
                head_size = expected;
            } else {
                self.fix("index entries past the end of the data")?;
                warn!(
                    table = %self.name,
                    indexed = expected,
                    stored = head_size,
                    "Truncating dangling index entry"
                );
                entries -= 1;
                size = entries * ENTRY_SIZE;
                index.truncate(size)?;
                metadata.flush_offset = metadata.flush_offset.min(size);
                self.persist_metadata = true;

                let previous = last_entry(index.as_ref(), entries, tail_id)?;
                if previous.file != last.file {
                    head = self.open_data_file(previous.file)?;
                    head_size = head.size()?;
                }
                last = previous;
            }
        }

        let head_id = last.file;
        let items = item_offset + entries - 1;
        if metadata.virtual_tail > items {
            warn!(
                table = %self.name,
                virtual_tail = metadata.virtual_tail,
                items,
                "Clamping virtual tail to head"
            );
            metadata.virtual_tail = items;
            self.persist_metadata = true;
        }

        if !self.read_only {
            self.remove_stray_files(tail_id, head_id)?;
        }

        let mut files = BTreeMap::new();
        for id in tail_id..head_id {
            files.insert(id, self.open_data_file(id)?);
        }
        files.insert(head_id, head);

        if !self.read_only {
            if self.repaired {
                index.sync()?;
                if let Some(file) = files.get_mut(&head_id) {
                    file.sync()?;
                }
            }
            if self.persist_metadata || self.repaired {
                self.volume
                    .write_atomic(&meta_file_name(self.name), &metadata.encode())?;
            }
        }

        let state = TableState {
            index,
            files,
            head_id,
            tail_id,
            head_bytes: head_size,
            items,
            item_offset,
            item_hidden: metadata.virtual_tail,
            metadata,
            closed: false,
        };
        Ok((state, self.repaired))
    }

    fn load_metadata(&self) -> CoreResult<(TableMetadata, u16)> {
        match self.volume.read(&meta_file_name(self.name))? {
            Some(bytes) => TableMetadata::decode(self.name, &bytes),
            None => Ok((TableMetadata::default(), LEGACY_VERSION)),
        }
    }

    /// Returns the length of the valid prefix of the index.
    ///
    /// The first real entry must stay in the sentinel's file; each later
    /// entry must follow its predecessor (see [`IndexEntry::follows`]).
    fn check_index(&self, index: &dyn StorageBackend, size: u64) -> CoreResult<u64> {
        let sentinel = IndexEntry::decode(&index.read_at(0, ENTRY_SIZE as usize)?);
        let mut prev: Option<IndexEntry> = None;
        let mut offset = ENTRY_SIZE;
        while offset < size {
            let len = (size - offset).min(CHECK_CHUNK_ENTRIES * ENTRY_SIZE);
            let chunk = index.read_at(offset, len as usize)?;
            for raw in chunk.chunks_exact(ENTRY_SIZE as usize) {
                let entry = IndexEntry::decode(raw);
                let valid = match prev {
                    None => entry.file == sentinel.file,
                    Some(prev) => entry.follows(&prev),
                };
                if !valid {
                    warn!(
                        table = %self.name,
                        position = offset / ENTRY_SIZE,
                        file = entry.file,
                        offset = entry.offset,
                        "Invalid index entry"
                    );
                    return Ok(offset);
                }
                prev = Some(entry);
                offset += ENTRY_SIZE;
            }
        }
        Ok(size)
    }

    /// Deletes data files outside `tail_id..=head_id`.
    fn remove_stray_files(&mut self, tail_id: u32, head_id: u32) -> CoreResult<()> {
        let ext = if self.compressed { ".cdat" } else { ".rdat" };
        let prefix = format!("{}.", self.name);
        let mut removed = false;
        for file in self.volume.list()? {
            let Some(id) = file
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(ext))
                .and_then(|number| number.parse::<u32>().ok())
            else {
                continue;
            };
            if id < tail_id || id > head_id {
                warn!(table = %self.name, file = %file, "Removing stray data file");
                self.volume.remove(&file)?;
                self.repaired = true;
                removed = true;
            }
        }
        if removed {
            self.volume.sync_dir()?;
        }
        Ok(())
    }
}

/// Returns the last entry of an index holding `entries` entries.
///
/// An index holding only the sentinel ends at offset 0 of the tail file.
fn last_entry(index: &dyn StorageBackend, entries: u64, tail_id: u32) -> CoreResult<IndexEntry> {
    if entries <= 1 {
        return Ok(IndexEntry::new(tail_id, 0));
    }
    let raw = index.read_at((entries - 1) * ENTRY_SIZE, ENTRY_SIZE as usize)?;
    Ok(IndexEntry::decode(&raw))
}
