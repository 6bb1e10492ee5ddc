//! Crash recovery testing.
//!
//! Each [`CrashPoint`] leaves a freezer directory in the state a crash at
//! that point would, then reopens it and checks what survived.
//!
//! ## Test Strategy
//!
//! 1. **Torn batch** - some tables committed, one torn mid-write, no rollback
//! 2. **Torn index entry** - a partial entry at the end of an index
//! 3. **Unsynced index entry** - an entry past the recorded flush offset
//! 4. **Lost data tail** - the end of a data file never reached disk
//! 5. **Interrupted reset** - a crash between any two reset steps
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ancientdb_testkit::crash::{CrashPoint, CrashRecoveryHarness};
//!
//! let mut harness = CrashRecoveryHarness::new()?;
//! let result = harness.run(CrashPoint::TornBatch);
//! assert!(result.passed, "{:?}", result.error);
//! ```

use crate::faults::{FaultyVolume, Faults};
use crate::fixtures::{fill_blocks, test_tables, verify_tables, BODIES, HASHES, HEADERS};
use ancientdb_core::{
    AncientReader, AncientWriter, Freezer, FreezerConfig, ResettableFreezer,
};
use ancientdb_storage::{DirVolume, Volume};
use std::fmt::Display;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

const ITEM_SIZE: usize = 64;
const COMMITTED: u64 = 10;
const ALL_TABLES: [&str; 3] = [HEADERS, HASHES, BODIES];

/// Points at which a crash can be simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// Crash after some tables committed a batch and another was torn.
    TornBatch,
    /// Crash while appending an index entry.
    TornIndexEntry,
    /// Crash after an index entry was written but before the table synced.
    UnsyncedIndexEntry,
    /// Crash that lost the last bytes of a data file.
    LostDataTail,
    /// Crash while the empty replacement freezer was being built.
    ResetWhileBuilding,
    /// Crash after the freezer was moved aside but before the replacement
    /// took its place.
    ResetBetweenRenames,
    /// Crash before the replaced freezer was deleted.
    ResetBeforeCleanup,
}

impl CrashPoint {
    /// Every crash point.
    pub const ALL: [CrashPoint; 7] = [
        CrashPoint::TornBatch,
        CrashPoint::TornIndexEntry,
        CrashPoint::UnsyncedIndexEntry,
        CrashPoint::LostDataTail,
        CrashPoint::ResetWhileBuilding,
        CrashPoint::ResetBetweenRenames,
        CrashPoint::ResetBeforeCleanup,
    ];

    /// Describes what the scenario checks.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::TornBatch => "Torn batch is cut back to the last common item",
            Self::TornIndexEntry => "Partial index entry is discarded",
            Self::UnsyncedIndexEntry => "Index entry past the flush offset is discarded",
            Self::LostDataTail => "Item with missing data is dropped from every table",
            Self::ResetWhileBuilding => "Reset interrupted while building keeps the original",
            Self::ResetBetweenRenames => "Reset interrupted between renames restores the original",
            Self::ResetBeforeCleanup => "Reset interrupted before cleanup keeps the empty freezer",
        }
    }
}

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Expected items after recovery.
    pub expected_items: u64,
    /// Actual items after recovery.
    pub actual_items: u64,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(description: &str, items: u64) -> Self {
        Self {
            passed: true,
            description: description.to_string(),
            expected_items: items,
            actual_items: items,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(description: &str, expected: u64, actual: u64, error: &str) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            expected_items: expected,
            actual_items: actual,
            error: Some(error.to_string()),
        }
    }
}

fn describe<E: Display>(err: E) -> String {
    err.to_string()
}

/// Test harness for crash recovery scenarios.
pub struct CrashRecoveryHarness {
    temp_dir: TempDir,
    /// Results of crash recovery tests.
    pub results: Vec<CrashRecoveryResult>,
}

impl CrashRecoveryHarness {
    /// Creates a harness working in a fresh temporary directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            temp_dir: TempDir::new()?,
            results: Vec::new(),
        })
    }

    /// Returns the directory a scenario works in.
    pub fn scenario_dir(&self, point: CrashPoint) -> PathBuf {
        self.temp_dir.path().join(format!("{point:?}")).join("chain")
    }

    /// Runs one scenario and records its result.
    pub fn run(&mut self, point: CrashPoint) -> CrashRecoveryResult {
        let dir = self.scenario_dir(point);
        let outcome = match point {
            CrashPoint::TornBatch => torn_batch(&dir),
            CrashPoint::TornIndexEntry => torn_index_entry(&dir),
            CrashPoint::UnsyncedIndexEntry => unsynced_index_entry(&dir),
            CrashPoint::LostDataTail => lost_data_tail(&dir),
            CrashPoint::ResetWhileBuilding
            | CrashPoint::ResetBetweenRenames
            | CrashPoint::ResetBeforeCleanup => interrupted_reset(&dir, point),
        };

        let description = point.description();
        let result = match outcome {
            Ok((expected, actual)) if expected == actual => {
                CrashRecoveryResult::pass(description, actual)
            }
            Ok((expected, actual)) => CrashRecoveryResult::fail(
                description,
                expected,
                actual,
                "item count differs after recovery",
            ),
            Err(error) => CrashRecoveryResult::fail(description, 0, 0, &error),
        };
        self.results.push(result.clone());
        result
    }

    /// Runs every scenario.
    pub fn run_all(&mut self) -> Vec<CrashRecoveryResult> {
        CrashPoint::ALL.iter().map(|&point| self.run(point)).collect()
    }

    /// Returns whether every recorded scenario passed.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|result| result.passed)
    }

    /// Prints a summary of the recorded results.
    pub fn print_summary(&self) {
        println!("\n=== Crash Recovery ===");
        for result in &self.results {
            let status = if result.passed { "PASS" } else { "FAIL" };
            println!(
                "[{status}] {} (expected {}, got {})",
                result.description, result.expected_items, result.actual_items
            );
            if let Some(error) = &result.error {
                println!("       {error}");
            }
        }
    }
}

fn open(dir: &Path) -> Result<Freezer, String> {
    Freezer::open(dir, &test_tables(), FreezerConfig::new()).map_err(describe)
}

/// Writes the committed items and closes the freezer.
fn populate(dir: &Path) -> Result<(), String> {
    let freezer = open(dir)?;
    fill_blocks(&freezer, 0, COMMITTED, ITEM_SIZE).map_err(describe)?;
    freezer.close().map_err(describe)
}

/// Reopens `dir`, checks the surviving items and that the freezer still
/// accepts appends. Returns the surviving item count.
fn recover(dir: &Path) -> Result<u64, String> {
    let freezer = open(dir)?;
    let items = freezer.ancients().map_err(describe)?;
    verify_tables(&freezer, &ALL_TABLES, 0..items, ITEM_SIZE)?;
    fill_blocks(&freezer, items, 2, ITEM_SIZE).map_err(describe)?;
    Ok(items)
}

fn append_to(path: &Path, bytes: &[u8]) -> Result<(), String> {
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(describe)?;
    file.write_all(bytes).map_err(describe)?;
    file.sync_all().map_err(describe)
}

fn torn_batch(dir: &Path) -> Result<(u64, u64), String> {
    let faults = Arc::new(Faults::new());
    {
        let inner: Arc<dyn Volume> = Arc::new(DirVolume::open(dir).map_err(describe)?);
        let volume: Arc<dyn Volume> = Arc::new(FaultyVolume::new(inner, Arc::clone(&faults)));
        let freezer = Freezer::open_with_volume(volume, &test_tables(), FreezerConfig::new())
            .map_err(describe)?;
        fill_blocks(&freezer, 0, COMMITTED, ITEM_SIZE).map_err(describe)?;
        freezer.sync_ancient().map_err(describe)?;

        // Tables commit in name order, so bodies and hashes land in full
        // before headers is torn. Failing truncations stop the rollback.
        faults.set_target("headers.");
        faults.crash_after(30);
        faults.set_fail_truncate(true);
        if fill_blocks(&freezer, COMMITTED, 5, ITEM_SIZE).is_ok() {
            return Err("batch succeeded despite the injected crash".to_string());
        }
        if !faults.has_crashed() {
            return Err("injected crash never fired".to_string());
        }
    }
    Ok((COMMITTED, recover(dir)?))
}

fn torn_index_entry(dir: &Path) -> Result<(u64, u64), String> {
    populate(dir)?;
    append_to(&dir.join("hashes.ridx"), &[0, 0, 0])?;
    Ok((COMMITTED, recover(dir)?))
}

fn unsynced_index_entry(dir: &Path) -> Result<(u64, u64), String> {
    populate(dir)?;
    let mut entry = Vec::new();
    entry.extend_from_slice(&0u32.to_be_bytes());
    entry.extend_from_slice(&u32::MAX.to_be_bytes());
    append_to(&dir.join("hashes.ridx"), &entry)?;
    Ok((COMMITTED, recover(dir)?))
}

fn lost_data_tail(dir: &Path) -> Result<(u64, u64), String> {
    populate(dir)?;
    let data = dir.join("hashes.0000.rdat");
    let file = OpenOptions::new().write(true).open(&data).map_err(describe)?;
    let len = file.metadata().map_err(describe)?.len();
    file.set_len(len - 1).map_err(describe)?;
    file.sync_all().map_err(describe)?;
    Ok((COMMITTED - 1, recover(dir)?))
}

fn sibling(dir: &Path, suffix: &str) -> PathBuf {
    let name = dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.with_file_name(format!("{name}{suffix}"))
}

fn interrupted_reset(dir: &Path, point: CrashPoint) -> Result<(u64, u64), String> {
    populate(dir)?;
    let tmp = sibling(dir, ".tmp.0");
    let old = sibling(dir, ".old.0");
    open(&tmp)?.close().map_err(describe)?;

    let expected = match point {
        CrashPoint::ResetWhileBuilding => COMMITTED,
        CrashPoint::ResetBetweenRenames => {
            fs::rename(dir, &old).map_err(describe)?;
            COMMITTED
        }
        _ => {
            fs::rename(dir, &old).map_err(describe)?;
            fs::rename(&tmp, dir).map_err(describe)?;
            0
        }
    };

    let store = ResettableFreezer::open(dir, &test_tables(), FreezerConfig::new())
        .map_err(describe)?;
    let items = store.ancients().map_err(describe)?;
    store.close().map_err(describe)?;
    if tmp.exists() || old.exists() {
        return Err("reset leftovers were not cleaned up".to_string());
    }
    Ok((expected, recover(dir).map(|_| items)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_crash_point_recovers() {
        let mut harness = CrashRecoveryHarness::new().unwrap();
        let results = harness.run_all();
        assert_eq!(results.len(), CrashPoint::ALL.len());
        for result in &results {
            assert!(result.passed, "{}: {:?}", result.description, result.error);
        }
        assert!(harness.all_passed());
    }

    #[test]
    fn results_are_recorded() {
        let mut harness = CrashRecoveryHarness::new().unwrap();
        let result = harness.run(CrashPoint::TornIndexEntry);
        assert!(result.passed, "{:?}", result.error);
        assert_eq!(result.actual_items, COMMITTED);
        assert_eq!(harness.results.len(), 1);
    }
}
