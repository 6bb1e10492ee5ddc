//! A freezer that can be wiped atomically.
//!
//! ## Reset
//!
//! ```text
//! 1. close <dir>
//! 2. build an empty freezer in <dir>.tmp.<n>, close it
//! 3. rename <dir>         -> <dir>.old.<n>
//! 4. rename <dir>.tmp.<n> -> <dir>
//! 5. remove <dir>.old.<n>
//! 6. open <dir>
//! ```
//!
//! A crash between any two steps leaves either the original freezer or the
//! empty one. [`ResettableFreezer::open`] resolves the leftovers:
//!
//! | found on open             | meaning                    | action                   |
//! |---------------------------|----------------------------|--------------------------|
//! | `<dir>.tmp.*`             | crashed during step 2 or 3 | delete it                |
//! | `<dir>.old.*` and `<dir>` | crashed before step 5      | delete the old copy      |
//! | `<dir>.old.*` only        | crashed between 3 and 4    | rename old back to `<dir>` |

use crate::batch::AncientBatch;
use crate::config::{FreezerConfig, TableConfig};
use crate::error::{CoreError, CoreResult};
use crate::freezer::Freezer;
use crate::store::{AncientReader, AncientWriter};
use crate::table::TableInfo;
use parking_lot::RwLock;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

const TMP_SUFFIX: &str = ".tmp.";
const OLD_SUFFIX: &str = ".old.";

/// A [`Freezer`] wrapper adding [`reset`](Self::reset).
///
/// Every ancient-store call runs against the active freezer under the
/// wrapper's read lock; a reset takes the write lock and swaps the freezer
/// out.
#[derive(Debug)]
pub struct ResettableFreezer {
    datadir: PathBuf,
    tables: Vec<(String, TableConfig)>,
    config: FreezerConfig,
    freezer: RwLock<Option<Freezer>>,
    generation: AtomicU64,
}

impl ResettableFreezer {
    /// Opens the freezer at `path`, first resolving any interrupted reset.
    ///
    /// # Errors
    ///
    /// Returns an error if leftovers cannot be cleaned up or the freezer
    /// cannot be opened.
    pub fn open(path: &Path, tables: &[(&str, TableConfig)], config: FreezerConfig) -> CoreResult<Self> {
        if !config.read_only {
            cleanup(path)?;
        }
        let freezer = Freezer::open(path, tables, config.clone())?;
        Ok(Self {
            datadir: path.to_path_buf(),
            tables: tables
                .iter()
                .map(|&(name, table)| (name.to_string(), table))
                .collect(),
            config,
            freezer: RwLock::new(Some(freezer)),
            generation: AtomicU64::new(0),
        })
    }

    /// Returns the freezer directory.
    #[must_use]
    pub fn datadir(&self) -> &Path {
        &self.datadir
    }

    fn table_list(&self) -> Vec<(&str, TableConfig)> {
        self.tables
            .iter()
            .map(|(name, table)| (name.as_str(), *table))
            .collect()
    }

    fn with<T>(&self, f: impl FnOnce(&Freezer) -> CoreResult<T>) -> CoreResult<T> {
        let guard = self.freezer.read();
        let freezer = guard.as_ref().ok_or(CoreError::Closed)?;
        f(freezer)
    }

    /// Deletes every item and starts over with empty tables.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReadOnly`] for read-only freezers, or an I/O
    /// error from one of the steps. After a failure the wrapper stays
    /// closed; reopening resolves whatever state the directory was left in.
    pub fn reset(&self) -> CoreResult<()> {
        if self.config.read_only {
            return Err(CoreError::ReadOnly);
        }
        let mut guard = self.freezer.write();
        if let Some(freezer) = guard.take() {
            freezer.close()?;
        }

        let n = self.generation.fetch_add(1, Ordering::Relaxed);
        let tmp = sibling(&self.datadir, TMP_SUFFIX, n)?;
        let old = sibling(&self.datadir, OLD_SUFFIX, n)?;
        remove_dir_if_exists(&tmp)?;
        remove_dir_if_exists(&old)?;

        let fresh = self.config.clone().create_if_missing(true);
        Freezer::open(&tmp, &self.table_list(), fresh)?.close()?;
        fs::rename(&self.datadir, &old)?;
        fs::rename(&tmp, &self.datadir)?;
        sync_parent(&self.datadir)?;
        fs::remove_dir_all(&old)?;

        *guard = Some(Freezer::open(
            &self.datadir,
            &self.table_list(),
            self.config.clone(),
        )?);
        info!(datadir = %self.datadir.display(), "Reset ancient store");
        Ok(())
    }

    /// Prunes the active freezer, see [`Freezer::prune`].
    ///
    /// # Errors
    ///
    /// Returns the freezer's error.
    pub fn prune(&self) -> CoreResult<()> {
        self.with(Freezer::prune)
    }

    /// Describes every table of the active freezer.
    ///
    /// # Errors
    ///
    /// Returns the freezer's error.
    pub fn table_info(&self) -> CoreResult<Vec<TableInfo>> {
        self.with(Freezer::table_info)
    }

    /// Closes the active freezer. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the freezer's close error.
    pub fn close(&self) -> CoreResult<()> {
        match self.freezer.write().take() {
            Some(freezer) => freezer.close(),
            None => Ok(()),
        }
    }
}

impl AncientReader for ResettableFreezer {
    fn has_ancient(&self, kind: &str, number: u64) -> CoreResult<bool> {
        self.with(|freezer| freezer.has_ancient(kind, number))
    }

    fn ancient(&self, kind: &str, number: u64) -> CoreResult<Vec<u8>> {
        self.with(|freezer| freezer.ancient(kind, number))
    }

    fn ancient_range(
        &self,
        kind: &str,
        start: u64,
        count: u64,
        max_bytes: u64,
    ) -> CoreResult<Vec<Vec<u8>>> {
        self.with(|freezer| freezer.ancient_range(kind, start, count, max_bytes))
    }

    fn ancient_bytes(&self, kind: &str, number: u64, offset: u64, length: u64) -> CoreResult<Vec<u8>> {
        self.with(|freezer| freezer.ancient_bytes(kind, number, offset, length))
    }

    fn ancients(&self) -> CoreResult<u64> {
        self.with(Freezer::ancients)
    }

    fn tail(&self) -> CoreResult<u64> {
        self.with(Freezer::tail)
    }

    fn ancient_size(&self, kind: &str) -> CoreResult<u64> {
        self.with(|freezer| freezer.ancient_size(kind))
    }

    fn read_ancients(&self, f: &mut dyn FnMut(&dyn AncientReader) -> CoreResult<()>) -> CoreResult<()> {
        self.with(|freezer| freezer.read_ancients(f))
    }
}

impl AncientWriter for ResettableFreezer {
    fn modify_ancients(&self, f: &mut dyn FnMut(&mut AncientBatch<'_>) -> CoreResult<()>) -> CoreResult<u64> {
        self.with(|freezer| freezer.modify_ancients(f))
    }

    fn truncate_head(&self, items: u64) -> CoreResult<u64> {
        self.with(|freezer| freezer.truncate_head(items))
    }

    fn truncate_tail(&self, tail: u64) -> CoreResult<u64> {
        self.with(|freezer| freezer.truncate_tail(tail))
    }

    fn sync_ancient(&self) -> CoreResult<()> {
        self.with(Freezer::sync_ancient)
    }
}

/// Returns `<dir><suffix><n>`.
fn sibling(dir: &Path, suffix: &str, n: u64) -> CoreResult<PathBuf> {
    let name = dir_name(dir)?;
    let mut sibling = name.to_os_string();
    sibling.push(format!("{suffix}{n}"));
    Ok(dir.with_file_name(sibling))
}

fn dir_name(dir: &Path) -> CoreResult<&std::ffi::OsStr> {
    dir.file_name().ok_or_else(|| {
        CoreError::invalid_operation(format!(
            "freezer path {} has no directory name",
            dir.display()
        ))
    })
}

fn parent_dir(dir: &Path) -> &Path {
    match dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn remove_dir_if_exists(path: &Path) -> CoreResult<()> {
    if path.exists() {
        fs::remove_dir_all(path)?;
    }
    Ok(())
}

/// Resolves the leftovers of an interrupted reset next to `dir`.
fn cleanup(dir: &Path) -> CoreResult<()> {
    let parent = parent_dir(dir);
    if !parent.is_dir() {
        return Ok(());
    }
    let name = dir_name(dir)?.to_string_lossy().into_owned();
    let tmp_prefix = format!("{name}{TMP_SUFFIX}");
    let old_prefix = format!("{name}{OLD_SUFFIX}");

    let mut leftovers: Vec<(OsString, PathBuf)> = Vec::new();
    for entry in fs::read_dir(parent)? {
        let entry = entry?;
        leftovers.push((entry.file_name(), entry.path()));
    }
    leftovers.sort();

    let mut changed = false;
    for (file_name, path) in leftovers {
        let file_name = file_name.to_string_lossy();
        if file_name.starts_with(&tmp_prefix) {
            warn!(path = %path.display(), "Removing unfinished freezer reset");
            fs::remove_dir_all(&path)?;
            changed = true;
        } else if file_name.starts_with(&old_prefix) {
            if dir.exists() {
                warn!(path = %path.display(), "Removing freezer replaced by reset");
                fs::remove_dir_all(&path)?;
            } else {
                warn!(path = %path.display(), "Restoring freezer from interrupted reset");
                fs::rename(&path, dir)?;
            }
            changed = true;
        }
    }
    if changed {
        sync_parent(dir)?;
    }
    Ok(())
}

/// Makes renames next to `dir` durable.
#[cfg(unix)]
fn sync_parent(dir: &Path) -> CoreResult<()> {
    fs::File::open(parent_dir(dir))?.sync_all()?;
    Ok(())
}

/// Directory fsync is unavailable on Windows; NTFS journals renames.
#[cfg(not(unix))]
fn sync_parent(_dir: &Path) -> CoreResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn tables() -> Vec<(&'static str, TableConfig)> {
        vec![
            ("data", TableConfig::new().compressed(false)),
            ("extra", TableConfig::new().prunable(true)),
        ]
    }

    fn fill(store: &dyn AncientWriter, count: u64) {
        store
            .modify_ancients(&mut |batch| {
                for number in 0..count {
                    batch.append_raw("data", number, &[number as u8; 32])?;
                    batch.append_raw("extra", number, b"x")?;
                }
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn reset_empties_the_store() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("chain");
        let store = ResettableFreezer::open(&path, &tables(), FreezerConfig::new()).unwrap();
        fill(&store, 4);
        assert_eq!(store.ancients().unwrap(), 4);

        store.reset().unwrap();
        assert_eq!(store.ancients().unwrap(), 0);
        assert!(store.ancient("data", 0).unwrap_err().is_not_found());

        // Leftover directories are gone and the store is usable.
        let names: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![OsString::from("chain")]);
        fill(&store, 2);
        assert_eq!(store.ancients().unwrap(), 2);

        store.reset().unwrap();
        assert_eq!(store.ancients().unwrap(), 0);
    }

    #[test]
    fn reset_survives_reopen() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("chain");
        {
            let store = ResettableFreezer::open(&path, &tables(), FreezerConfig::new()).unwrap();
            fill(&store, 3);
            store.reset().unwrap();
            store.close().unwrap();
        }
        let store = ResettableFreezer::open(&path, &tables(), FreezerConfig::new()).unwrap();
        assert_eq!(store.ancients().unwrap(), 0);
    }

    /// Builds a populated freezer at `path` and a fresh one at `other`.
    fn populated_and_fresh(path: &Path, other: &Path) {
        let store = ResettableFreezer::open(path, &tables(), FreezerConfig::new()).unwrap();
        fill(&store, 5);
        store.close().unwrap();
        Freezer::open(other, &tables(), FreezerConfig::new())
            .unwrap()
            .close()
            .unwrap();
    }

    #[test]
    fn crash_while_building_keeps_original() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("chain");
        let tmp = temp.path().join("chain.tmp.0");
        populated_and_fresh(&path, &tmp);

        let store = ResettableFreezer::open(&path, &tables(), FreezerConfig::new()).unwrap();
        assert_eq!(store.ancients().unwrap(), 5);
        assert!(!tmp.exists());
    }

    #[test]
    fn crash_between_renames_restores_original() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("chain");
        let tmp = temp.path().join("chain.tmp.0");
        let old = temp.path().join("chain.old.0");
        populated_and_fresh(&path, &tmp);
        fs::rename(&path, &old).unwrap();

        let store = ResettableFreezer::open(&path, &tables(), FreezerConfig::new()).unwrap();
        assert_eq!(store.ancients().unwrap(), 5);
        assert!(!old.exists());
        assert!(!tmp.exists());
    }

    #[test]
    fn crash_before_removing_old_keeps_reset() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("chain");
        let tmp = temp.path().join("chain.tmp.0");
        let old = temp.path().join("chain.old.0");
        populated_and_fresh(&path, &tmp);
        fs::rename(&path, &old).unwrap();
        fs::rename(&tmp, &path).unwrap();

        let store = ResettableFreezer::open(&path, &tables(), FreezerConfig::new()).unwrap();
        assert_eq!(store.ancients().unwrap(), 0);
        assert!(!old.exists());
    }

    #[test]
    fn closed_wrapper_reports_closed() {
        let temp = tempdir().unwrap();
        let store =
            ResettableFreezer::open(&temp.path().join("chain"), &tables(), FreezerConfig::new())
                .unwrap();
        store.close().unwrap();
        store.close().unwrap();
        assert!(matches!(store.ancients(), Err(CoreError::Closed)));
    }

    #[test]
    fn read_only_wrapper_cannot_reset() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("chain");
        ResettableFreezer::open(&path, &tables(), FreezerConfig::new())
            .unwrap()
            .close()
            .unwrap();

        let store =
            ResettableFreezer::open(&path, &tables(), FreezerConfig::new().read_only(true)).unwrap();
        assert!(matches!(store.reset(), Err(CoreError::ReadOnly)));
    }

    #[test]
    fn sibling_names() {
        let dir = Path::new("/data/ancient/chain");
        assert_eq!(
            sibling(dir, TMP_SUFFIX, 3).unwrap(),
            PathBuf::from("/data/ancient/chain.tmp.3")
        );
        assert!(sibling(Path::new("/"), OLD_SUFFIX, 0).is_err());
    }
}
