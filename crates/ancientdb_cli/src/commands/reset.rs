//! Reset command implementation.

use super::open_writable;
use std::path::Path;

/// Deletes every item of the freezer at `path`.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let freezer = open_writable(path)?;
    freezer.reset()?;
    freezer.close()?;
    println!("Reset freezer at {:?}", path);
    Ok(())
}
