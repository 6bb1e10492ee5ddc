//! Verify command implementation.

use super::open_read_only;
use ancientdb_core::{AncientReader, Freezer};
use std::path::Path;
use tracing::debug;

/// Errors listed per table before the rest are only counted.
const MAX_REPORTED_ERRORS: usize = 10;

/// Verification result of one table.
#[derive(Debug)]
pub struct VerifyResult {
    /// Table name.
    pub table: String,
    /// Number of items checked.
    pub items_checked: u64,
    /// Number of readable items.
    pub valid_items: u64,
    /// Number of unreadable items.
    pub corrupt_items: u64,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            items_checked: 0,
            valid_items: 0,
            corrupt_items: 0,
            errors: Vec::new(),
        }
    }

    /// Returns whether the table passed.
    pub fn is_ok(&self) -> bool {
        self.corrupt_items == 0 && self.errors.is_empty()
    }
}

/// Reads every visible item of every table of `freezer`.
pub fn verify_freezer(freezer: &Freezer) -> Result<Vec<VerifyResult>, Box<dyn std::error::Error>> {
    let frozen = freezer.ancients()?;
    let mut results = Vec::new();

    for info in freezer.table_info()? {
        let mut result = VerifyResult::new(&info.name);
        if info.items != frozen {
            result.errors.push(format!(
                "table holds {} items, freezer holds {}",
                info.items, frozen
            ));
        }
        debug!(table = %info.name, from = info.tail, to = frozen, "Verifying table");

        for number in info.tail..frozen {
            result.items_checked += 1;
            match freezer.ancient(&info.name, number) {
                Ok(_) => result.valid_items += 1,
                Err(err) => {
                    result.corrupt_items += 1;
                    if result.errors.len() < MAX_REPORTED_ERRORS {
                        result.errors.push(format!("item {}: {}", number, err));
                    }
                }
            }
        }
        results.push(result);
    }

    Ok(results)
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying freezer at {:?}", path);
    println!();

    let freezer = open_read_only(path)?;
    let results = verify_freezer(&freezer)?;
    for result in &results {
        print_result(result);
    }

    println!();
    if results.iter().all(VerifyResult::is_ok) {
        println!("✓ Freezer verification passed");
        Ok(())
    } else {
        println!("✗ Freezer verification failed");
        Err("Verification failed".into())
    }
}

fn print_result(result: &VerifyResult) {
    let status = if result.is_ok() { "✓" } else { "✗" };
    println!(
        "  {} {}: {} items checked, {} valid, {} corrupt",
        status, result.table, result.items_checked, result.valid_items, result.corrupt_items
    );
    for error in &result.errors {
        println!("      {}", error);
    }
    let hidden = result.corrupt_items.saturating_sub(result.errors.len() as u64);
    if hidden > 0 {
        println!("      ... and {} more", hidden);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::chain_dir;

    #[test]
    fn healthy_freezer_passes() {
        let temp = chain_dir(5);
        let freezer = open_read_only(temp.path()).unwrap();
        let results = verify_freezer(&freezer).unwrap();
        assert_eq!(results.len(), 5);
        for result in &results {
            assert!(result.is_ok(), "{:?}", result);
            assert_eq!(result.items_checked, 5);
        }
        assert!(run(temp.path()).is_ok());
    }

    #[test]
    fn damaged_data_is_reported() {
        let temp = chain_dir(3);
        // Overwrite the compressed body data in place; sizes stay intact.
        let path = temp.path().join("bodies.0000.cdat");
        let len = std::fs::metadata(&path).unwrap().len();
        std::fs::write(&path, vec![0xFFu8; len as usize]).unwrap();

        let freezer = open_read_only(temp.path()).unwrap();
        let results = verify_freezer(&freezer).unwrap();
        let bodies = results.iter().find(|r| r.table == "bodies").unwrap();
        assert!(!bodies.is_ok());
        assert_eq!(bodies.corrupt_items, 3);
        assert!(results.iter().filter(|r| r.table != "bodies").all(VerifyResult::is_ok));
    }
}
