//! Freezer and table configuration.

use crate::stats::FreezerStats;
use std::sync::Arc;

/// Default cap on a single data file (2 GB).
pub const DEFAULT_MAX_TABLE_SIZE: u32 = 2_000_000_000;

/// Default size of the in-memory staging buffer of a table batch (2 MiB).
pub const DEFAULT_BATCH_BUFFER_LIMIT: usize = 2 * 1024 * 1024;

/// Per-table settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableConfig {
    /// Whether items are zstd-compressed on disk.
    pub compressed: bool,
    /// Whether tail truncation applies to this table.
    pub prunable: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            compressed: true,
            prunable: false,
        }
    }
}

impl TableConfig {
    /// A compressed, non-prunable table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            compressed: true,
            prunable: false,
        }
    }

    /// Sets whether items are compressed.
    #[must_use]
    pub const fn compressed(mut self, value: bool) -> Self {
        self.compressed = value;
        self
    }

    /// Sets whether the table takes part in tail truncation.
    #[must_use]
    pub const fn prunable(mut self, value: bool) -> Self {
        self.prunable = value;
        self
    }
}

/// Configuration for opening a freezer.
#[derive(Debug, Clone)]
pub struct FreezerConfig {
    /// Whether to create the freezer directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Open every table read-only; writes fail with `ReadOnly`.
    pub read_only: bool,

    /// Maximum size of a single data file before rotation.
    pub max_table_size: u32,

    /// Staged bytes after which a table batch writes to disk.
    pub batch_buffer_limit: usize,

    /// Counters shared with the caller, if injected.
    pub stats: Option<Arc<FreezerStats>>,
}

impl Default for FreezerConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            read_only: false,
            max_table_size: DEFAULT_MAX_TABLE_SIZE,
            batch_buffer_limit: DEFAULT_BATCH_BUFFER_LIMIT,
            stats: None,
        }
    }
}

impl FreezerConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets read-only mode.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets the data file cap.
    #[must_use]
    pub const fn max_table_size(mut self, size: u32) -> Self {
        self.max_table_size = size;
        self
    }

    /// Sets the batch staging buffer limit.
    #[must_use]
    pub const fn batch_buffer_limit(mut self, limit: usize) -> Self {
        self.batch_buffer_limit = limit;
        self
    }

    /// Injects the counters the freezer reports into.
    #[must_use]
    pub fn stats(mut self, stats: Arc<FreezerStats>) -> Self {
        self.stats = Some(stats);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = FreezerConfig::default();
        assert!(config.create_if_missing);
        assert!(!config.read_only);
        assert_eq!(config.max_table_size, DEFAULT_MAX_TABLE_SIZE);
        assert!(config.stats.is_none());
    }

    #[test]
    fn builder_pattern() {
        let stats = Arc::new(FreezerStats::new());
        let config = FreezerConfig::new()
            .read_only(true)
            .max_table_size(2048)
            .batch_buffer_limit(64)
            .stats(Arc::clone(&stats));

        assert!(config.read_only);
        assert_eq!(config.max_table_size, 2048);
        assert_eq!(config.batch_buffer_limit, 64);
        assert!(config.stats.is_some());
    }

    #[test]
    fn table_config_defaults_to_compressed() {
        let config = TableConfig::default();
        assert!(config.compressed);
        assert!(!config.prunable);
        assert_eq!(config, TableConfig::new());

        let hashes = TableConfig::new().compressed(false);
        assert!(!hashes.compressed);
    }
}
