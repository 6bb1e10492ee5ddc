//! Error types for the ancient store.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in ancient store operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] ancientdb_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The requested item is outside the table's visible range.
    #[error("item {item} not found in table {table}")]
    NotFound {
        /// The table that was read.
        table: String,
        /// The requested item number.
        item: u64,
    },

    /// The named table is not part of this freezer.
    #[error("unknown table: {name}")]
    UnknownTable {
        /// Name of the table.
        name: String,
    },

    /// An append did not target the next item number.
    #[error("out-of-order append to table {table}: expected item {expected}, got {got}")]
    OutOfOrder {
        /// The table being appended to.
        table: String,
        /// The item number the table expected next.
        expected: u64,
        /// The item number the caller supplied.
        got: u64,
    },

    /// A head truncation would cut into the tail.
    #[error("truncation of table {table} to {items} items is below the tail {tail}")]
    TruncationBelowTail {
        /// The table being truncated.
        table: String,
        /// The requested item count.
        items: u64,
        /// The current tail.
        tail: u64,
    },

    /// A tail truncation would pass the head.
    #[error("tail truncation of table {table} to {tail} is above the head {head}")]
    TruncationAboveHead {
        /// The table being truncated.
        table: String,
        /// The requested tail.
        tail: u64,
        /// The current head.
        head: u64,
    },

    /// Tables diverged during a batch commit.
    #[error("table {table} is at item {items}, but other tables are at {expected}")]
    TableMismatch {
        /// The diverging table.
        table: String,
        /// The item count of the diverging table.
        items: u64,
        /// The item count the other tables reached.
        expected: u64,
    },

    /// Rolling a failed batch back failed as well.
    #[error("failed to roll back table {table}: {source}")]
    RollbackFailed {
        /// The table that could not be rolled back.
        table: String,
        /// The rollback error.
        #[source]
        source: Box<CoreError>,
    },

    /// A table's files are corrupted beyond automatic repair.
    #[error("table {table} is corrupted: {message}")]
    Corruption {
        /// The affected table (or the freezer directory).
        table: String,
        /// Description of the corruption.
        message: String,
    },

    /// A stored item failed to decode.
    #[error("item {item} of table {table} is corrupted: {message}")]
    CorruptItem {
        /// The table that was read.
        table: String,
        /// The item number.
        item: u64,
        /// Description of the failure.
        message: String,
    },

    /// Table metadata carries a version with no upgrade path.
    #[error("table {table} has incompatible metadata version {version}")]
    IncompatibleVersion {
        /// The affected table.
        table: String,
        /// The version found on disk.
        version: u16,
    },

    /// Serializing an item failed.
    #[error("failed to encode item: {message}")]
    Encode {
        /// Description of the failure.
        message: String,
    },

    /// Deserializing an item failed.
    #[error("failed to decode item: {message}")]
    Decode {
        /// Description of the failure.
        message: String,
    },

    /// A write was attempted on a read-only store.
    #[error("ancient store is read-only")]
    ReadOnly,

    /// The store has been closed.
    #[error("ancient store is closed")]
    Closed,

    /// Another process holds the freezer directory lock.
    #[error("freezer locked: another process has exclusive access")]
    DatabaseLocked,

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a not-found error.
    pub fn not_found(table: impl Into<String>, item: u64) -> Self {
        Self::NotFound {
            table: table.into(),
            item,
        }
    }

    /// Creates a corruption error.
    pub fn corruption(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corruption {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Creates an unknown table error.
    pub fn unknown_table(name: impl Into<String>) -> Self {
        Self::UnknownTable { name: name.into() }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns whether this is a [`CoreError::NotFound`].
    ///
    /// Callers use this to tell "not frozen (yet)" apart from real failures.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<ciborium::ser::Error<io::Error>> for CoreError {
    fn from(err: ciborium::ser::Error<io::Error>) -> Self {
        Self::Encode {
            message: err.to_string(),
        }
    }
}

impl From<ciborium::de::Error<io::Error>> for CoreError {
    fn from(err: ciborium::de::Error<io::Error>) -> Self {
        Self::Decode {
            message: err.to_string(),
        }
    }
}
