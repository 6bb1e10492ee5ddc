//! Freezer statistics.
//!
//! Counters are plain atomics owned by an [`Arc<FreezerStats>`]. A caller
//! that wants to export them injects its own instance through
//! [`crate::FreezerConfig::stats`]; otherwise every freezer gets a private
//! one. There is no process-wide registry.
//!
//! ```rust,ignore
//! let stats = Arc::new(FreezerStats::new());
//! let freezer = Freezer::open(path, tables, FreezerConfig::new().stats(Arc::clone(&stats)))?;
//! // ...
//! println!("bytes written: {}", stats.snapshot().write_bytes);
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for reads, writes and maintenance work.
///
/// All counters are monotonically increasing and can be read while
/// operations are in progress.
#[derive(Debug, Default)]
pub struct FreezerStats {
    reads: AtomicU64,
    read_bytes: AtomicU64,
    writes: AtomicU64,
    write_bytes: AtomicU64,
    head_truncations: AtomicU64,
    tail_truncations: AtomicU64,
    pruned_files: AtomicU64,
    repairs: AtomicU64,
    batches_aborted: AtomicU64,
}

impl FreezerStats {
    /// Creates a new stats instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_read(&self, bytes: u64) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.read_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self, items: u64, bytes: u64) {
        self.writes.fetch_add(items, Ordering::Relaxed);
        self.write_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_head_truncation(&self) {
        self.head_truncations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_tail_truncation(&self) {
        self.tail_truncations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pruned_files(&self, files: u64) {
        self.pruned_files.fetch_add(files, Ordering::Relaxed);
    }

    pub(crate) fn record_repair(&self) {
        self.repairs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_batch_abort(&self) {
        self.batches_aborted.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            read_bytes: self.read_bytes.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            write_bytes: self.write_bytes.load(Ordering::Relaxed),
            head_truncations: self.head_truncations.load(Ordering::Relaxed),
            tail_truncations: self.tail_truncations.load(Ordering::Relaxed),
            pruned_files: self.pruned_files.load(Ordering::Relaxed),
            repairs: self.repairs.load(Ordering::Relaxed),
            batches_aborted: self.batches_aborted.load(Ordering::Relaxed),
        }
    }
}

/// A snapshot of [`FreezerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Items read.
    pub reads: u64,
    /// Bytes read from data files.
    pub read_bytes: u64,
    /// Items written.
    pub writes: u64,
    /// Bytes written to data files.
    pub write_bytes: u64,
    /// Head truncations that removed items.
    pub head_truncations: u64,
    /// Tail truncations that hid items.
    pub tail_truncations: u64,
    /// Data files deleted by pruning.
    pub pruned_files: u64,
    /// Repairs performed while opening tables.
    pub repairs: u64,
    /// Batches rolled back.
    pub batches_aborted: u64,
}
