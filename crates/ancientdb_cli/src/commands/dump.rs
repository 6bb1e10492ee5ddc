//! Dump command implementation.

use super::open_read_only;
use ancientdb_core::{AncientReader, Freezer};
use std::fmt::Write;
use std::path::Path;

/// Bytes of an item shown before the rest is elided.
const PREVIEW_BYTES: usize = 64;

/// One dumped item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpedItem {
    /// Item number.
    pub number: u64,
    /// Item contents.
    pub data: Vec<u8>,
}

/// Reads up to `count` items of `table`, starting at `from` or the table's
/// tail.
pub fn dump_items(
    freezer: &Freezer,
    table: &str,
    from: Option<u64>,
    count: u64,
) -> Result<Vec<DumpedItem>, Box<dyn std::error::Error>> {
    let info = freezer
        .table_info()?
        .into_iter()
        .find(|info| info.name == table)
        .ok_or_else(|| format!("Unknown table: {table}"))?;
    let start = from.unwrap_or(info.tail);
    if count == 0 {
        return Ok(Vec::new());
    }

    let items = freezer.ancient_range(table, start, count, 0)?;
    Ok(items
        .into_iter()
        .zip(start..)
        .map(|(data, number)| DumpedItem { number, data })
        .collect())
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    table: &str,
    from: Option<u64>,
    count: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let freezer = open_read_only(path)?;
    let items = dump_items(&freezer, table, from, count)?;

    println!("Table {} ({} items)", table, items.len());
    for item in &items {
        println!("  #{} ({} bytes) {}", item.number, item.data.len(), preview(&item.data));
    }
    Ok(())
}

fn preview(data: &[u8]) -> String {
    let mut out = String::with_capacity(PREVIEW_BYTES * 2 + 3);
    for byte in data.iter().take(PREVIEW_BYTES) {
        let _ = write!(out, "{:02x}", byte);
    }
    if data.len() > PREVIEW_BYTES {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::chain_dir;

    #[test]
    fn dumps_from_tail_by_default() {
        let temp = chain_dir(6);
        let freezer = open_read_only(temp.path()).unwrap();
        let items = dump_items(&freezer, "headers", None, 3).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].number, 0);
        assert_eq!(items[2].data, vec![2u8; 40]);
    }

    #[test]
    fn stops_at_the_head() {
        let temp = chain_dir(6);
        let freezer = open_read_only(temp.path()).unwrap();
        let items = dump_items(&freezer, "hashes", Some(4), 10).unwrap();
        let numbers: Vec<_> = items.iter().map(|item| item.number).collect();
        assert_eq!(numbers, [4, 5]);
    }

    #[test]
    fn rejects_bad_requests() {
        let temp = chain_dir(2);
        let freezer = open_read_only(temp.path()).unwrap();
        assert!(dump_items(&freezer, "trie", None, 1).is_err());
        assert!(dump_items(&freezer, "headers", Some(2), 1).is_err());
        assert!(dump_items(&freezer, "headers", Some(0), 0).unwrap().is_empty());
    }

    #[test]
    fn previews_are_hex_and_elided() {
        assert_eq!(preview(&[0xab, 0x01]), "ab01");
        let long = preview(&[0u8; 100]);
        assert!(long.ends_with("..."));
        assert_eq!(long.len(), PREVIEW_BYTES * 2 + 3);
    }
}
