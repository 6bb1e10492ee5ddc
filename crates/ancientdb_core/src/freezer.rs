//! The freezer: a set of tables sharing one commit boundary.
//!
//! Every table of a freezer holds the same number of items. Writes go
//! through [`AncientWriter::modify_ancients`], which either advances every
//! table or rolls all of them back, and the common item count is published
//! only after all tables committed. Readers never see items beyond it.
//!
//! ```rust,ignore
//! use ancientdb_core::{AncientReader, AncientWriter, Freezer, FreezerConfig, TableConfig};
//!
//! let tables = [("headers", TableConfig::new()), ("hashes", TableConfig::new().compressed(false))];
//! let freezer = Freezer::open(path, &tables, FreezerConfig::new())?;
//! freezer.modify_ancients(&mut |batch| {
//!     batch.append_raw("headers", 0, b"header")?;
//!     batch.append_raw("hashes", 0, b"hash")
//! })?;
//! assert_eq!(freezer.ancients()?, 1);
//! ```

use crate::batch::AncientBatch;
use crate::config::{FreezerConfig, TableConfig};
use crate::error::{CoreError, CoreResult};
use crate::stats::FreezerStats;
use crate::store::{AncientReader, AncientWriter};
use crate::table::{FreezerTable, TableInfo};
use ancientdb_storage::{DirVolume, MemoryVolume, StorageError, Volume};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A multi-table append-only store.
pub struct Freezer {
    datadir: Option<PathBuf>,
    read_only: bool,
    tables: BTreeMap<String, FreezerTable>,
    /// Number of items frozen in every table.
    frozen: AtomicU64,
    /// First readable item of the prunable tables.
    tail: AtomicU64,
    /// Held exclusively by writers, shared by `read_ancients`.
    write_lock: RwLock<()>,
    stats: Arc<FreezerStats>,
    closed: AtomicBool,
}

impl fmt::Debug for Freezer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Freezer")
            .field("datadir", &self.datadir)
            .field("read_only", &self.read_only)
            .field("tables", &self.tables.keys().collect::<Vec<_>>())
            .field("frozen", &self.frozen.load(Ordering::Relaxed))
            .field("tail", &self.tail.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Freezer {
    /// Opens the freezer in directory `path` with the given tables.
    ///
    /// Writable freezers lock the directory exclusively; read-only ones
    /// share the lock with other readers.
    ///
    /// # Errors
    ///
    /// - [`CoreError::DatabaseLocked`] if another process holds the lock
    /// - [`CoreError::Corruption`] if the tables cannot be reconciled
    /// - an I/O error if the directory is missing and may not be created
    pub fn open(path: &Path, tables: &[(&str, TableConfig)], config: FreezerConfig) -> CoreResult<Self> {
        if !config.read_only && !config.create_if_missing && !path.is_dir() {
            return Err(CoreError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("freezer directory {} does not exist", path.display()),
            )));
        }
        let opened = if config.read_only {
            DirVolume::open_read_only(path)
        } else {
            DirVolume::open(path)
        };
        let volume = opened.map_err(|err| match err {
            StorageError::Locked(_) => CoreError::DatabaseLocked,
            other => CoreError::Storage(other),
        })?;

        let freezer = Self::open_with_volume(Arc::new(volume), tables, config)?;
        info!(
            path = %path.display(),
            items = freezer.frozen.load(Ordering::Relaxed),
            tail = freezer.tail.load(Ordering::Relaxed),
            read_only = freezer.read_only,
            "Opened ancient store"
        );
        Ok(freezer)
    }

    /// Opens an ephemeral freezer kept entirely in memory.
    ///
    /// # Errors
    ///
    /// Returns an error if a table cannot be created.
    pub fn open_in_memory(tables: &[(&str, TableConfig)], config: FreezerConfig) -> CoreResult<Self> {
        Self::open_with_volume(Arc::new(MemoryVolume::new()), tables, config.read_only(false))
    }

    /// Opens a freezer over an arbitrary volume.
    ///
    /// # Errors
    ///
    /// Returns an error if a table cannot be opened or the tables cannot be
    /// reconciled.
    pub fn open_with_volume(
        volume: Arc<dyn Volume>,
        tables: &[(&str, TableConfig)],
        config: FreezerConfig,
    ) -> CoreResult<Self> {
        let stats = config
            .stats
            .clone()
            .unwrap_or_else(|| Arc::new(FreezerStats::new()));
        let read_only = config.read_only || volume.is_read_only();

        let mut opened = BTreeMap::new();
        for &(name, table_config) in tables {
            let table = FreezerTable::open(
                Arc::clone(&volume),
                name,
                table_config,
                &config,
                Arc::clone(&stats),
            )?;
            opened.insert(name.to_string(), table);
        }

        let freezer = Self {
            datadir: volume.location().map(Path::to_path_buf),
            read_only,
            tables: opened,
            frozen: AtomicU64::new(0),
            tail: AtomicU64::new(0),
            write_lock: RwLock::new(()),
            stats,
            closed: AtomicBool::new(false),
        };
        freezer.repair()?;
        Ok(freezer)
    }

    /// Brings every table to the same head and prunable tail.
    fn repair(&self) -> CoreResult<()> {
        let head = self
            .tables
            .values()
            .map(FreezerTable::items)
            .min()
            .unwrap_or(0);
        let tail = self
            .tables
            .values()
            .filter(|table| table.config().prunable)
            .map(FreezerTable::tail)
            .max()
            .unwrap_or(0);
        if tail > head {
            return Err(CoreError::corruption(
                "freezer",
                format!("tail {tail} is above head {head}"),
            ));
        }

        for table in self.tables.values() {
            let items = table.items();
            if items != head {
                if self.read_only {
                    return Err(CoreError::corruption(
                        table.name(),
                        format!("table holds {items} items, freezer holds {head}"),
                    ));
                }
                warn!(table = %table.name(), items, head, "Truncating table to freezer head");
                table.truncate_head(head)?;
            }
            if table.config().prunable && table.tail() != tail {
                if self.read_only {
                    return Err(CoreError::corruption(
                        table.name(),
                        format!("table tail {} differs from freezer tail {tail}", table.tail()),
                    ));
                }
                warn!(table = %table.name(), tail = table.tail(), freezer_tail = tail, "Raising table tail");
                table.truncate_tail(tail)?;
            }
        }

        self.frozen.store(head, Ordering::Release);
        self.tail.store(tail, Ordering::Release);
        Ok(())
    }

    /// Returns the directory of a disk-backed freezer.
    #[must_use]
    pub fn datadir(&self) -> Option<&Path> {
        self.datadir.as_deref()
    }

    /// Returns whether the freezer rejects writes.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Returns the counters this freezer reports into.
    #[must_use]
    pub fn stats(&self) -> &Arc<FreezerStats> {
        &self.stats
    }

    /// Returns the table names, sorted.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Describes every table.
    ///
    /// # Errors
    ///
    /// Returns an error if file sizes cannot be read.
    pub fn table_info(&self) -> CoreResult<Vec<TableInfo>> {
        self.tables.values().map(FreezerTable::info).collect()
    }

    fn table(&self, kind: &str) -> CoreResult<&FreezerTable> {
        self.tables
            .get(kind)
            .ok_or_else(|| CoreError::unknown_table(kind))
    }

    fn check_writable(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CoreError::Closed);
        }
        if self.read_only {
            return Err(CoreError::ReadOnly);
        }
        Ok(())
    }

    fn check_frozen(&self, kind: &str, number: u64) -> CoreResult<()> {
        if number >= self.frozen.load(Ordering::Acquire) {
            return Err(CoreError::not_found(kind, number));
        }
        Ok(())
    }

    /// Deletes the data files of every prunable table that only hold items
    /// before the current tail.
    ///
    /// # Errors
    ///
    /// Returns the first table error.
    pub fn prune(&self) -> CoreResult<()> {
        self.check_writable()?;
        let _guard = self.write_lock.write();
        let tail = self.tail.load(Ordering::Acquire);
        for table in self.tables.values().filter(|table| table.config().prunable) {
            table.prune(tail)?;
        }
        Ok(())
    }

    /// Syncs and closes every table. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first table error; every table is closed regardless.
    pub fn close(&self) -> CoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _guard = self.write_lock.write();
        let mut first_error = None;
        for table in self.tables.values() {
            if let Err(err) = table.close() {
                warn!(table = %table.name(), error = %err, "Failed to close table");
                first_error.get_or_insert(err);
            }
        }
        debug!(datadir = ?self.datadir, "Closed ancient store");
        first_error.map_or(Ok(()), Err)
    }
}

impl AncientReader for Freezer {
    fn has_ancient(&self, kind: &str, number: u64) -> CoreResult<bool> {
        let Some(table) = self.tables.get(kind) else {
            return Ok(false);
        };
        Ok(number < self.frozen.load(Ordering::Acquire) && table.has(number))
    }

    fn ancient(&self, kind: &str, number: u64) -> CoreResult<Vec<u8>> {
        let table = self.table(kind)?;
        self.check_frozen(kind, number)?;
        table.retrieve(number)
    }

    fn ancient_range(
        &self,
        kind: &str,
        start: u64,
        count: u64,
        max_bytes: u64,
    ) -> CoreResult<Vec<Vec<u8>>> {
        let table = self.table(kind)?;
        self.check_frozen(kind, start)?;
        let count = count.min(self.frozen.load(Ordering::Acquire).saturating_sub(start));
        table.retrieve_items(start, count, max_bytes)
    }

    fn ancient_bytes(&self, kind: &str, number: u64, offset: u64, length: u64) -> CoreResult<Vec<u8>> {
        let table = self.table(kind)?;
        self.check_frozen(kind, number)?;
        table.retrieve_bytes(number, offset, length)
    }

    fn ancients(&self) -> CoreResult<u64> {
        Ok(self.frozen.load(Ordering::Acquire))
    }

    fn tail(&self) -> CoreResult<u64> {
        Ok(self.tail.load(Ordering::Acquire))
    }

    fn ancient_size(&self, kind: &str) -> CoreResult<u64> {
        self.table(kind)?.size()
    }

    fn read_ancients(&self, f: &mut dyn FnMut(&dyn AncientReader) -> CoreResult<()>) -> CoreResult<()> {
        let _guard = self.write_lock.read();
        f(self)
    }
}

impl AncientWriter for Freezer {
    fn modify_ancients(&self, f: &mut dyn FnMut(&mut AncientBatch<'_>) -> CoreResult<()>) -> CoreResult<u64> {
        self.check_writable()?;
        let _guard = self.write_lock.write();
        let prev = self.frozen.load(Ordering::Acquire);

        let result = AncientBatch::new(&self.tables).and_then(|mut batch| {
            f(&mut batch)?;
            batch.commit()
        });

        match result {
            Ok((items, written)) => {
                self.frozen.store(items, Ordering::Release);
                Ok(written)
            }
            Err(err) => {
                self.stats.record_batch_abort();
                warn!(items = prev, error = %err, "Rolling back ancient batch");
                for table in self.tables.values() {
                    if let Err(rollback) = table.truncate_head(prev) {
                        return Err(CoreError::RollbackFailed {
                            table: table.name().to_string(),
                            source: Box::new(rollback),
                        });
                    }
                }
                Err(err)
            }
        }
    }

    fn truncate_head(&self, items: u64) -> CoreResult<u64> {
        self.check_writable()?;
        let _guard = self.write_lock.write();
        let old = self.frozen.load(Ordering::Acquire);
        if old <= items {
            return Ok(old);
        }
        let tail = self.tail.load(Ordering::Acquire);
        if items < tail {
            return Err(CoreError::TruncationBelowTail {
                table: "freezer".to_string(),
                items,
                tail,
            });
        }
        for table in self.tables.values() {
            table.truncate_head(items)?;
        }
        self.frozen.store(items, Ordering::Release);
        Ok(old)
    }

    fn truncate_tail(&self, tail: u64) -> CoreResult<u64> {
        self.check_writable()?;
        let _guard = self.write_lock.write();
        let old = self.tail.load(Ordering::Acquire);
        if old >= tail {
            return Ok(old);
        }
        let head = self.frozen.load(Ordering::Acquire);
        if tail > head {
            return Err(CoreError::TruncationAboveHead {
                table: "freezer".to_string(),
                tail,
                head,
            });
        }
        for table in self.tables.values().filter(|table| table.config().prunable) {
            table.truncate_tail(tail)?;
        }
        self.tail.store(tail, Ordering::Release);
        Ok(old)
    }

    fn sync_ancient(&self) -> CoreResult<()> {
        if self.read_only {
            return Ok(());
        }
        let _guard = self.write_lock.write();
        let mut first_error = None;
        for table in self.tables.values() {
            if let Err(err) = table.sync() {
                warn!(table = %table.name(), error = %err, "Failed to sync table");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for Freezer {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "Failed to close ancient store");
        }
    }
}
