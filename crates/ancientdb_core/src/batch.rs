//! Multi-table write batches.

use crate::error::{CoreError, CoreResult};
use crate::table::{FreezerTable, TableBatch};
use serde::Serialize;
use std::collections::BTreeMap;

/// Appends staged against every table of a freezer at once.
///
/// Handed to the closure passed to
/// [`AncientWriter::modify_ancients`](crate::AncientWriter::modify_ancients).
/// Each table must receive the same item numbers; the freezer checks this
/// when the batch ends and rolls every table back otherwise.
pub struct AncientBatch<'a> {
    tables: BTreeMap<&'a str, TableBatch<'a>>,
}

impl<'a> AncientBatch<'a> {
    pub(crate) fn new(tables: &'a BTreeMap<String, FreezerTable>) -> CoreResult<Self> {
        let mut batches = BTreeMap::new();
        for (name, table) in tables {
            batches.insert(name.as_str(), table.batch()?);
        }
        Ok(Self { tables: batches })
    }

    /// Serializes `item` and appends it to table `kind` as item `number`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::UnknownTable`] if `kind` is not a table of the freezer
    /// - [`CoreError::OutOfOrder`] if `number` is not the table's next item
    pub fn append<T: Serialize + ?Sized>(&mut self, kind: &str, number: u64, item: &T) -> CoreResult<()> {
        self.table(kind)?.append(number, item)
    }

    /// Appends pre-encoded bytes to table `kind` as item `number`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::UnknownTable`] if `kind` is not a table of the freezer
    /// - [`CoreError::OutOfOrder`] if `number` is not the table's next item
    pub fn append_raw(&mut self, kind: &str, number: u64, item: &[u8]) -> CoreResult<()> {
        self.table(kind)?.append_raw(number, item)
    }

    fn table(&mut self, kind: &str) -> CoreResult<&mut TableBatch<'a>> {
        self.tables
            .get_mut(kind)
            .ok_or_else(|| CoreError::unknown_table(kind))
    }

    /// Commits every table batch and checks that they ended in lockstep.
    ///
    /// Returns the common item count and the bytes written.
    pub(crate) fn commit(mut self) -> CoreResult<(u64, u64)> {
        let mut written = 0;
        for batch in self.tables.values_mut() {
            batch.commit()?;
            written += batch.written_bytes();
        }

        let mut expected: Option<u64> = None;
        for (name, batch) in &self.tables {
            let items = batch.next_item();
            match expected {
                None => expected = Some(items),
                Some(expected) if expected != items => {
                    return Err(CoreError::TableMismatch {
                        table: (*name).to_string(),
                        items,
                        expected,
                    });
                }
                Some(_) => {}
            }
        }
        Ok((expected.unwrap_or(0), written))
    }
}
