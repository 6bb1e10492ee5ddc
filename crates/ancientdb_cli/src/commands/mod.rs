//! CLI command implementations.
//!
//! Commands do not know a freezer's table layout up front. They discover it
//! from the index files in the directory: chain tables get their usual
//! settings, any other table is opened non-prunable with the compression
//! its index extension names.

pub mod dump;
pub mod inspect;
pub mod reset;
pub mod truncate;
pub mod verify;

use ancientdb_core::chain::chain_table_config;
use ancientdb_core::table::parse_index_file_name;
use ancientdb_core::{Freezer, FreezerConfig, ResettableFreezer, TableConfig};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Tables found in a freezer directory, sorted by name.
pub type TableLayout = Vec<(String, TableConfig)>;

/// Lists the tables of the freezer at `path`.
pub fn discover_tables(path: &Path) -> Result<TableLayout, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No freezer found at {:?}", path).into());
    }

    let mut tables = TableLayout::new();
    for entry in fs::read_dir(path)? {
        let file = entry?.file_name();
        let Some((name, compressed)) = file.to_str().and_then(parse_index_file_name) else {
            continue;
        };
        let config = chain_table_config(name)
            .unwrap_or_default()
            .compressed(compressed);
        debug!(table = name, compressed, "Discovered table");
        tables.push((name.to_string(), config));
    }

    if tables.is_empty() {
        return Err(format!("No freezer tables found at {:?}", path).into());
    }
    tables.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(tables)
}

fn borrowed(tables: &TableLayout) -> Vec<(&str, TableConfig)> {
    tables
        .iter()
        .map(|(name, config)| (name.as_str(), *config))
        .collect()
}

/// Opens the freezer at `path` for reading.
pub fn open_read_only(path: &Path) -> Result<Freezer, Box<dyn std::error::Error>> {
    let tables = discover_tables(path)?;
    let config = FreezerConfig::new().read_only(true);
    Ok(Freezer::open(path, &borrowed(&tables), config)?)
}

/// Opens the freezer at `path` for maintenance.
pub fn open_writable(path: &Path) -> Result<ResettableFreezer, Box<dyn std::error::Error>> {
    let tables = discover_tables(path)?;
    let config = FreezerConfig::new().create_if_missing(false);
    Ok(ResettableFreezer::open(path, &borrowed(&tables), config)?)
}

/// Formats a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ancientdb_core::chain::CHAIN_TABLES;
    use ancientdb_core::AncientWriter;
    use tempfile::TempDir;

    /// Writes a chain freezer with `blocks` blocks into a fresh directory.
    pub(crate) fn chain_dir(blocks: u64) -> TempDir {
        let temp = TempDir::new().unwrap();
        let freezer = Freezer::open(temp.path(), &CHAIN_TABLES, FreezerConfig::new()).unwrap();
        for number in 0..blocks {
            let byte = number as u8;
            freezer
                .append_ancient(number, &[byte; 32], &[byte; 40], &[byte; 64], &[byte; 16], &[byte; 2])
                .unwrap();
        }
        freezer.close().unwrap();
        drop(freezer);
        temp
    }

    #[test]
    fn discovers_chain_tables() {
        let temp = chain_dir(1);
        let tables = discover_tables(temp.path()).unwrap();
        let names: Vec<_> = tables.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["bodies", "diffs", "hashes", "headers", "receipts"]);

        let bodies = tables[0].1;
        assert!(bodies.compressed);
        assert!(bodies.prunable);
        let hashes = tables[2].1;
        assert!(!hashes.compressed);
        assert!(!hashes.prunable);
    }

    #[test]
    fn unknown_tables_keep_their_compression() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("custom.ridx"), [0u8; 8]).unwrap();
        fs::write(temp.path().join("notes.txt"), b"ignored").unwrap();

        let tables = discover_tables(temp.path()).unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].0, "custom");
        assert!(!tables[0].1.compressed);
        assert!(!tables[0].1.prunable);
    }

    #[test]
    fn empty_directory_is_rejected() {
        let temp = TempDir::new().unwrap();
        assert!(discover_tables(temp.path()).is_err());
        assert!(discover_tables(&temp.path().join("missing")).is_err());
    }

    #[test]
    fn sizes_are_humanized() {
        assert_eq!(format_size(512), "512");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
