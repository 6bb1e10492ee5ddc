//! Chain freezer layout.
//!
//! The chain freezer keeps five tables, all indexed by block number:
//!
//! | table      | content                  | compressed | prunable |
//! |------------|--------------------------|------------|----------|
//! | `headers`  | encoded block headers    | yes        | no       |
//! | `hashes`   | canonical block hashes   | no         | no       |
//! | `bodies`   | encoded block bodies     | yes        | yes      |
//! | `receipts` | encoded receipt lists    | yes        | yes      |
//! | `diffs`    | total difficulties       | no         | no       |

use crate::batch::AncientBatch;
use crate::config::{FreezerConfig, TableConfig};
use crate::error::CoreResult;
use crate::freezer::Freezer;
use crate::resettable::ResettableFreezer;
use std::path::{Path, PathBuf};
use tracing::info;

/// Sub-directory of the ancient root holding the chain freezer.
pub const CHAIN_FREEZER_NAME: &str = "chain";

/// Block header table.
pub const HEADER_TABLE: &str = "headers";
/// Canonical hash table.
pub const HASH_TABLE: &str = "hashes";
/// Block body table.
pub const BODIES_TABLE: &str = "bodies";
/// Receipt table.
pub const RECEIPT_TABLE: &str = "receipts";
/// Total difficulty table.
pub const DIFFICULTY_TABLE: &str = "diffs";

/// The chain tables and their settings.
pub const CHAIN_TABLES: [(&str, TableConfig); 5] = [
    (HEADER_TABLE, TableConfig::new()),
    (HASH_TABLE, TableConfig::new().compressed(false)),
    (BODIES_TABLE, TableConfig::new().prunable(true)),
    (RECEIPT_TABLE, TableConfig::new().prunable(true)),
    (DIFFICULTY_TABLE, TableConfig::new().compressed(false)),
];

/// Returns the settings of a chain table.
#[must_use]
pub fn chain_table_config(name: &str) -> Option<TableConfig> {
    CHAIN_TABLES
        .iter()
        .find(|(table, _)| *table == name)
        .map(|&(_, config)| config)
}

/// Resolves where the chain freezer of ancient root `ancient` lives.
///
/// New stores use `<ancient>/chain`. Older stores kept the chain freezer
/// directly in the ancient root; if the root exists but has no `chain`
/// sub-directory, the root itself is used.
#[must_use]
pub fn resolve_chain_freezer_dir(ancient: &Path) -> PathBuf {
    let freezer = ancient.join(CHAIN_FREEZER_NAME);
    if !freezer.exists() && ancient.exists() {
        info!(location = %ancient.display(), "Found legacy ancient chain path");
        return ancient.to_path_buf();
    }
    freezer
}

/// Opens the chain freezer below ancient root `ancient`.
///
/// # Errors
///
/// Returns the freezer's open error.
pub fn open_chain_freezer(ancient: &Path, config: FreezerConfig) -> CoreResult<ResettableFreezer> {
    ResettableFreezer::open(&resolve_chain_freezer_dir(ancient), &CHAIN_TABLES, config)
}

/// Opens an in-memory chain freezer, used when no ancient root is set.
///
/// # Errors
///
/// Returns an error if a table cannot be created.
pub fn open_memory_chain_freezer(config: FreezerConfig) -> CoreResult<Freezer> {
    Freezer::open_in_memory(&CHAIN_TABLES, config)
}

/// Stages one block in every chain table.
///
/// # Errors
///
/// Returns [`crate::CoreError::OutOfOrder`] if `number` is not the next
/// block, or [`crate::CoreError::UnknownTable`] if the batch lacks a chain
/// table.
pub fn write_block(
    batch: &mut AncientBatch<'_>,
    number: u64,
    hash: &[u8],
    header: &[u8],
    body: &[u8],
    receipts: &[u8],
    td: &[u8],
) -> CoreResult<()> {
    batch.append_raw(HASH_TABLE, number, hash)?;
    batch.append_raw(HEADER_TABLE, number, header)?;
    batch.append_raw(BODIES_TABLE, number, body)?;
    batch.append_raw(RECEIPT_TABLE, number, receipts)?;
    batch.append_raw(DIFFICULTY_TABLE, number, td)
}
