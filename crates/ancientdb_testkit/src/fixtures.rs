//! Freezer fixtures.
//!
//! Provides temporary freezers and deterministic item contents so that
//! tests can write blocks and check them back without bookkeeping.

use ancientdb_core::{
    AncientReader, AncientWriter, CoreResult, Freezer, FreezerConfig, TableConfig,
};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Compressed header table of the test layout.
pub const HEADERS: &str = "headers";
/// Uncompressed hash table of the test layout.
pub const HASHES: &str = "hashes";
/// Prunable body table of the test layout.
pub const BODIES: &str = "bodies";

/// The table layout used by fixtures: one compressed table, one
/// uncompressed table and one prunable table.
#[must_use]
pub fn test_tables() -> Vec<(&'static str, TableConfig)> {
    vec![
        (HEADERS, TableConfig::new()),
        (HASHES, TableConfig::new().compressed(false)),
        (BODIES, TableConfig::new().prunable(true)),
    ]
}

/// Returns the contents fixtures store as item `number` of `table`.
///
/// The bytes depend on both the table and the number, so an item read
/// from the wrong table or position never matches.
#[must_use]
pub fn item_bytes(table: &str, number: u64, size: usize) -> Vec<u8> {
    let seed = table
        .bytes()
        .fold(number.wrapping_mul(31), |acc, b| acc.wrapping_mul(131).wrapping_add(u64::from(b)));
    (0..size as u64)
        .map(|i| (seed.wrapping_add(i) % 251) as u8)
        .collect()
}

/// Appends items `from..from + count` to every named table in one batch.
///
/// # Errors
///
/// Returns the batch error.
pub fn fill_tables(
    store: &dyn AncientWriter,
    tables: &[&str],
    from: u64,
    count: u64,
    size: usize,
) -> CoreResult<u64> {
    store.modify_ancients(&mut |batch| {
        for number in from..from + count {
            for table in tables {
                batch.append_raw(table, number, &item_bytes(table, number, size))?;
            }
        }
        Ok(())
    })
}

/// Appends items `from..from + count` to the tables of [`test_tables`].
///
/// # Errors
///
/// Returns the batch error.
pub fn fill_blocks(store: &dyn AncientWriter, from: u64, count: u64, size: usize) -> CoreResult<u64> {
    fill_tables(store, &[HEADERS, HASHES, BODIES], from, count, size)
}

/// Checks that every item in `range` of every named table holds the
/// contents [`fill_tables`] wrote.
///
/// # Errors
///
/// Returns a description of the first mismatch or read error.
pub fn verify_tables(
    store: &dyn AncientReader,
    tables: &[&str],
    range: Range<u64>,
    size: usize,
) -> Result<(), String> {
    for number in range {
        for table in tables {
            let item = store
                .ancient(table, number)
                .map_err(|e| format!("{table}[{number}]: {e}"))?;
            if item != item_bytes(table, number, size) {
                return Err(format!("{table}[{number}]: contents differ"));
            }
        }
    }
    Ok(())
}

/// A disk-backed freezer in a temporary directory.
///
/// The directory is removed when the fixture is dropped.
pub struct TestFreezer {
    freezer: Option<Freezer>,
    tables: Vec<(&'static str, TableConfig)>,
    config: FreezerConfig,
    path: PathBuf,
    _temp_dir: TempDir,
}

impl TestFreezer {
    /// Creates a freezer with the [`test_tables`] layout.
    pub fn new() -> Self {
        Self::with_tables(test_tables(), FreezerConfig::new())
    }

    /// Creates a freezer with the given layout and configuration.
    pub fn with_tables(tables: Vec<(&'static str, TableConfig)>, config: FreezerConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("ancient");
        let freezer =
            Freezer::open(&path, &tables, config.clone()).expect("Failed to open freezer");
        Self {
            freezer: Some(freezer),
            tables,
            config,
            path,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the freezer directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Closes the freezer, releasing its directory lock.
    pub fn close(&mut self) {
        if let Some(freezer) = self.freezer.take() {
            freezer.close().expect("Failed to close freezer");
        }
    }

    /// Closes and reopens the freezer, running repair.
    ///
    /// # Errors
    ///
    /// Returns the open error; the fixture stays closed in that case.
    pub fn reopen(&mut self) -> CoreResult<()> {
        let config = self.config.clone();
        self.reopen_with(config)
    }

    /// Closes and reopens the freezer with a different configuration.
    ///
    /// # Errors
    ///
    /// Returns the open error; the fixture stays closed in that case.
    pub fn reopen_with(&mut self, config: FreezerConfig) -> CoreResult<()> {
        self.close();
        self.freezer = Some(Freezer::open(&self.path, &self.tables, config)?);
        Ok(())
    }
}

impl Default for TestFreezer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestFreezer {
    type Target = Freezer;

    fn deref(&self) -> &Self::Target {
        self.freezer.as_ref().expect("Freezer is closed")
    }
}

/// Opens an in-memory freezer with the [`test_tables`] layout.
pub fn memory_freezer() -> Freezer {
    Freezer::open_in_memory(&test_tables(), FreezerConfig::new())
        .expect("Failed to open in-memory freezer")
}

/// Runs a test with a temporary disk-backed freezer.
///
/// # Example
///
/// ```rust,ignore
/// use ancientdb_testkit::with_temp_freezer;
///
/// #[test]
/// fn my_test() {
///     with_temp_freezer(|freezer| {
///         fill_blocks(freezer, 0, 4, 32).unwrap();
///     });
/// }
/// ```
pub fn with_temp_freezer<F, R>(f: F) -> R
where
    F: FnOnce(&Freezer) -> R,
{
    let fixture = TestFreezer::new();
    f(&fixture)
}

/// Runs a test with an in-memory freezer.
pub fn with_memory_freezer<F, R>(f: F) -> R
where
    F: FnOnce(&Freezer) -> R,
{
    let freezer = memory_freezer();
    f(&freezer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_bytes_are_distinct() {
        assert_eq!(item_bytes(HEADERS, 3, 16), item_bytes(HEADERS, 3, 16));
        assert_ne!(item_bytes(HEADERS, 3, 16), item_bytes(HEADERS, 4, 16));
        assert_ne!(item_bytes(HEADERS, 3, 16), item_bytes(BODIES, 3, 16));
        assert!(item_bytes(HASHES, 0, 0).is_empty());
    }

    #[test]
    fn fill_and_verify_in_memory() {
        with_memory_freezer(|freezer| {
            fill_blocks(freezer, 0, 8, 40).unwrap();
            assert_eq!(freezer.ancients().unwrap(), 8);
            verify_tables(freezer, &[HEADERS, HASHES, BODIES], 0..8, 40).unwrap();
            assert!(verify_tables(freezer, &[HEADERS], 0..8, 41).is_err());
        });
    }

    #[test]
    fn reopen_keeps_items() {
        let mut fixture = TestFreezer::new();
        fill_blocks(&*fixture, 0, 5, 64).unwrap();
        fixture.reopen().unwrap();
        assert_eq!(fixture.ancients().unwrap(), 5);
        verify_tables(&*fixture, &[HEADERS, HASHES, BODIES], 0..5, 64).unwrap();
    }

    #[test]
    fn with_temp_freezer_is_disk_backed() {
        with_temp_freezer(|freezer| {
            assert!(freezer.datadir().is_some());
        });
    }
}
