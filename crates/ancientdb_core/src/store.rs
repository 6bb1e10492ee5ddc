//! The ancient-store interface.
//!
//! Callers address items by `(table name, item number)` only. Everything
//! about files, indexes and repair stays behind these traits, which are
//! implemented by [`crate::Freezer`] and [`crate::ResettableFreezer`].

use crate::batch::AncientBatch;
use crate::chain;
use crate::error::CoreResult;

/// Read access to an ancient store.
pub trait AncientReader: Send + Sync {
    /// Returns whether item `number` of table `kind` is readable.
    ///
    /// Unknown tables report `false`.
    fn has_ancient(&self, kind: &str, number: u64) -> CoreResult<bool>;

    /// Reads item `number` of table `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::NotFound`] if the item is outside the
    /// frozen range.
    fn ancient(&self, kind: &str, number: u64) -> CoreResult<Vec<u8>>;

    /// Reads up to `count` consecutive items starting at `start`.
    ///
    /// At least one item is returned; reading stops before the total size
    /// exceeds `max_bytes` (0 means no limit).
    fn ancient_range(
        &self,
        kind: &str,
        start: u64,
        count: u64,
        max_bytes: u64,
    ) -> CoreResult<Vec<Vec<u8>>>;

    /// Reads `length` bytes at `offset` within one item of an uncompressed
    /// table.
    fn ancient_bytes(&self, kind: &str, number: u64, offset: u64, length: u64) -> CoreResult<Vec<u8>>;

    /// Returns the number of frozen items.
    fn ancients(&self) -> CoreResult<u64>;

    /// Returns the first readable item of the prunable tables.
    fn tail(&self) -> CoreResult<u64>;

    /// Returns the on-disk size of table `kind`.
    fn ancient_size(&self, kind: &str) -> CoreResult<u64>;

    /// Runs `f` while no writer can modify the store.
    fn read_ancients(&self, f: &mut dyn FnMut(&dyn AncientReader) -> CoreResult<()>) -> CoreResult<()>;
}

/// Write access to an ancient store.
pub trait AncientWriter: Send + Sync {
    /// Runs `f` with a batch spanning every table and commits it atomically.
    ///
    /// Either every table advances to the same new item count or none
    /// advances at all. Returns the number of bytes written.
    fn modify_ancients(&self, f: &mut dyn FnMut(&mut AncientBatch<'_>) -> CoreResult<()>) -> CoreResult<u64>;

    /// Discards every item at or after `items`; returns the previous count.
    ///
    /// Fails with [`crate::CoreError::TruncationBelowTail`], before any
    /// table is touched, if `items` is below the tail.
    fn truncate_head(&self, items: u64) -> CoreResult<u64>;

    /// Hides every item of the prunable tables before `tail`; returns the
    /// previous tail.
    ///
    /// Fails with [`crate::CoreError::TruncationAboveHead`] if `tail` is past
    /// the number of frozen items.
    fn truncate_tail(&self, tail: u64) -> CoreResult<u64>;

    /// Makes every committed item durable.
    fn sync_ancient(&self) -> CoreResult<()>;

    /// Appends one block to the chain tables as raw, pre-encoded items.
    ///
    /// Returns the number of bytes written.
    #[allow(clippy::too_many_arguments)]
    fn append_ancient(
        &self,
        number: u64,
        hash: &[u8],
        header: &[u8],
        body: &[u8],
        receipts: &[u8],
        td: &[u8],
    ) -> CoreResult<u64> {
        self.modify_ancients(&mut |batch| {
            chain::write_block(batch, number, hash, header, body, receipts, td)
        })
    }
}

/// A store that can be both read and written.
pub trait AncientStore: AncientReader + AncientWriter {}

impl<T: AncientReader + AncientWriter> AncientStore for T {}
