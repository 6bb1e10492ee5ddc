//! Property-based test generators using proptest.
//!
//! Provides strategies for items, table settings and sequences of table
//! operations, plus a plain in-memory model the operations can be checked
//! against.

use ancientdb_core::TableConfig;
use proptest::prelude::*;

/// Strategy for item contents (arbitrary bytes, possibly empty).
pub fn item_strategy(max_size: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_size)
}

/// Strategy for a run of items.
pub fn items_strategy(max_items: usize, max_size: usize) -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(item_strategy(max_size), 0..max_items)
}

/// Strategy for table settings.
pub fn table_config_strategy() -> impl Strategy<Value = TableConfig> {
    (any::<bool>(), any::<bool>())
        .prop_map(|(compressed, prunable)| TableConfig::new().compressed(compressed).prunable(prunable))
}

/// Strategy for data file caps, from smaller than one item to roomy.
pub fn file_cap_strategy() -> impl Strategy<Value = u32> {
    prop_oneof![1u32..16, 16u32..256, 256u32..4096]
}

/// One operation on a single-table freezer.
#[derive(Debug, Clone)]
pub enum TableOp {
    /// Append items at the head.
    Append {
        /// Contents of the appended items.
        items: Vec<Vec<u8>>,
    },
    /// Keep only the first `keep` items (clamped to the tail).
    TruncateHead {
        /// Items to keep.
        keep: u64,
    },
    /// Hide items before `tail` (clamped to the head).
    TruncateTail {
        /// New tail.
        tail: u64,
    },
    /// Delete data files holding only hidden items.
    Prune,
    /// Close and reopen the freezer.
    Reopen,
}

/// Strategy for table operations.
pub fn table_op_strategy() -> impl Strategy<Value = TableOp> {
    prop_oneof![
        4 => items_strategy(6, 48).prop_map(|items| TableOp::Append { items }),
        1 => (0u64..40).prop_map(|keep| TableOp::TruncateHead { keep }),
        1 => (0u64..40).prop_map(|tail| TableOp::TruncateTail { tail }),
        1 => Just(TableOp::Prune),
        1 => Just(TableOp::Reopen),
    ]
}

/// Strategy for a sequence of operations.
pub fn table_op_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<TableOp>> {
    prop::collection::vec(table_op_strategy(), min_ops..max_ops)
}

/// The expected contents of a table.
///
/// Items below the tail are kept as `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableModel {
    items: Vec<Option<Vec<u8>>>,
    tail: u64,
}

impl TableModel {
    /// Creates an empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of items (the head).
    #[must_use]
    pub fn head(&self) -> u64 {
        self.items.len() as u64
    }

    /// Returns the first visible item.
    #[must_use]
    pub fn tail(&self) -> u64 {
        self.tail
    }

    /// Returns the visible contents of `number`.
    #[must_use]
    pub fn get(&self, number: u64) -> Option<&[u8]> {
        self.items
            .get(usize::try_from(number).ok()?)
            .and_then(|item| item.as_deref())
    }

    /// Appends items at the head.
    pub fn append(&mut self, items: &[Vec<u8>]) {
        self.items.extend(items.iter().cloned().map(Some));
    }

    /// Keeps `keep` items, never going below the tail. Returns the
    /// effective head.
    pub fn truncate_head(&mut self, keep: u64) -> u64 {
        let keep = keep.max(self.tail).min(self.head());
        self.items.truncate(keep as usize);
        keep
    }

    /// Raises the tail, never above the head. Returns the effective tail.
    pub fn truncate_tail(&mut self, tail: u64) -> u64 {
        let tail = tail.min(self.head());
        if tail > self.tail {
            for item in &mut self.items[self.tail as usize..tail as usize] {
                *item = None;
            }
            self.tail = tail;
        }
        self.tail
    }
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
