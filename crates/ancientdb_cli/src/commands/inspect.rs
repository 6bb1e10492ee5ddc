//! Inspect command implementation.

use super::{format_size, open_read_only};
use ancientdb_core::{AncientReader, TableInfo};
use serde::Serialize;
use std::path::Path;

/// Freezer inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Freezer path.
    pub path: String,
    /// Number of frozen items.
    pub items: u64,
    /// First readable item of the prunable tables.
    pub tail: u64,
    /// Total size of every table in bytes.
    pub total_size: u64,
    /// Per-table details.
    pub tables: Vec<TableInfo>,
}

/// Collects the inspection result for the freezer at `path`.
pub fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let freezer = open_read_only(path)?;
    let tables = freezer.table_info()?;
    Ok(InspectResult {
        path: path.display().to_string(),
        items: freezer.ancients()?,
        tail: freezer.tail()?,
        total_size: tables.iter().map(|table| table.size).sum(),
        tables,
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        "text" => print_text_output(&result),
        other => return Err(format!("Unknown output format: {other}").into()),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("ancientdb Freezer Inspection");
    println!("============================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Items:      {}", result.items);
    println!("Tail:       {}", result.tail);
    println!("Total size: {} bytes", format_size(result.total_size));
    println!();
    println!("Tables:");
    for table in &result.tables {
        let mut flags = Vec::new();
        if table.compressed {
            flags.push("compressed");
        }
        if table.prunable {
            flags.push("prunable");
        }
        println!("  {} [{}]", table.name, flags.join(", "));
        println!(
            "    items {}..{} (stored from {})",
            table.tail, table.items, table.actual_tail
        );
        println!(
            "    files {}..={}, head file {} bytes",
            table.tail_file,
            table.head_file,
            format_size(table.head_bytes)
        );
        println!("    size {} bytes", format_size(table.size));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::chain_dir;

    #[test]
    fn reports_every_table() {
        let temp = chain_dir(4);
        let result = inspect(temp.path()).unwrap();
        assert_eq!(result.items, 4);
        assert_eq!(result.tail, 0);
        assert_eq!(result.tables.len(), 5);
        assert!(result.tables.iter().all(|table| table.items == 4));
        assert_eq!(
            result.total_size,
            result.tables.iter().map(|table| table.size).sum::<u64>()
        );
    }

    #[test]
    fn serializes_to_json() {
        let temp = chain_dir(2);
        let result = inspect(temp.path()).unwrap();
        let json: serde_json::Value = serde_json::to_value(&result).unwrap();
        assert_eq!(json["items"], 2);
        assert_eq!(json["tables"][0]["name"], "bodies");
        assert_eq!(json["tables"][0]["prunable"], true);
    }

    #[test]
    fn rejects_unknown_format() {
        let temp = chain_dir(1);
        assert!(run(temp.path(), "yaml").is_err());
    }
}
