//! Truncate command implementations.

use super::open_writable;
use ancientdb_core::{AncientReader, AncientWriter};
use std::path::Path;
use tracing::info;

/// Discards every item at or after `items`.
pub fn run_head(path: &Path, items: u64) -> Result<(), Box<dyn std::error::Error>> {
    let freezer = open_writable(path)?;
    let previous = freezer.truncate_head(items)?;
    freezer.sync_ancient()?;
    let current = freezer.ancients()?;
    freezer.close()?;

    info!(previous, current, "Truncated freezer head");
    println!("Items: {} -> {}", previous, current);
    Ok(())
}

/// Hides every item of the prunable tables before `tail`, then deletes the
/// data files left without visible items if `prune` is set.
pub fn run_tail(path: &Path, tail: u64, prune: bool) -> Result<(), Box<dyn std::error::Error>> {
    let freezer = open_writable(path)?;
    let previous = freezer.truncate_tail(tail)?;
    if prune {
        freezer.prune()?;
    }
    freezer.sync_ancient()?;
    let current = freezer.tail()?;
    freezer.close()?;

    info!(previous, current, prune, "Truncated freezer tail");
    println!("Tail: {} -> {}", previous, current);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::open_read_only;
    use crate::commands::tests::chain_dir;

    #[test]
    fn head_truncation_persists() {
        let temp = chain_dir(8);
        run_head(temp.path(), 5).unwrap();

        let freezer = open_read_only(temp.path()).unwrap();
        assert_eq!(freezer.ancients().unwrap(), 5);
        assert!(freezer.ancient("headers", 5).unwrap_err().is_not_found());
        assert_eq!(freezer.ancient("headers", 4).unwrap(), vec![4u8; 40]);
    }

    #[test]
    fn tail_truncation_hides_prunable_tables() {
        let temp = chain_dir(8);
        run_tail(temp.path(), 3, true).unwrap();

        let freezer = open_read_only(temp.path()).unwrap();
        assert_eq!(freezer.tail().unwrap(), 3);
        assert!(freezer.ancient("bodies", 2).unwrap_err().is_not_found());
        assert_eq!(freezer.ancient("bodies", 3).unwrap(), vec![3u8; 64]);
        assert_eq!(freezer.ancient("headers", 0).unwrap(), vec![0u8; 40]);
    }

    #[test]
    fn tail_above_head_fails() {
        let temp = chain_dir(2);
        assert!(run_tail(temp.path(), 9, false).is_err());
    }
}
