//! # ancientdb Core
//!
//! Append-only ancient store for immutable blockchain data.
//!
//! A [`Freezer`] keeps several [`FreezerTable`]s in lockstep: item `n` of
//! every table belongs to block `n`. Items are only ever appended at the
//! head or hidden and pruned at the tail, and every open repairs whatever a
//! crash left behind.
//!
//! This crate provides:
//! - Table files: compressed data files, a fixed-width index and versioned
//!   metadata
//! - Multi-table batches committed all-or-nothing
//! - A resettable freezer that can be wiped atomically
//! - The chain table layout
//! - A flat append-only key-value file for bulk exports
//!
//! ## Example
//!
//! ```rust
//! use ancientdb_core::{AncientReader, AncientWriter, Freezer, FreezerConfig, TableConfig};
//!
//! let tables = [("headers", TableConfig::new()), ("hashes", TableConfig::new().compressed(false))];
//! let freezer = Freezer::open_in_memory(&tables, FreezerConfig::new()).unwrap();
//! freezer
//!     .modify_ancients(&mut |batch| {
//!         batch.append_raw("headers", 0, b"genesis header")?;
//!         batch.append_raw("hashes", 0, &[0u8; 32])
//!     })
//!     .unwrap();
//! assert_eq!(freezer.ancients().unwrap(), 1);
//! assert_eq!(freezer.ancient("headers", 0).unwrap(), b"genesis header");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
pub mod chain;
mod codec;
mod config;
mod error;
mod flat;
mod freezer;
mod resettable;
mod stats;
mod store;
pub mod table;

pub use batch::AncientBatch;
pub use codec::{decode_item, encode_value, ItemCodec};
pub use config::{FreezerConfig, TableConfig, DEFAULT_BATCH_BUFFER_LIMIT, DEFAULT_MAX_TABLE_SIZE};
pub use error::{CoreError, CoreResult};
pub use flat::{FlatBatch, FlatDatabase, FlatIter};
pub use freezer::Freezer;
pub use resettable::ResettableFreezer;
pub use stats::{FreezerStats, StatsSnapshot};
pub use store::{AncientReader, AncientStore, AncientWriter};
pub use table::{FreezerTable, TableBatch, TableInfo};

/// Version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
