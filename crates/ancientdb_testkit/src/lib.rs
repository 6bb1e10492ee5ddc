//! # ancientdb Testkit
//!
//! Test utilities for ancientdb.
//!
//! This crate provides:
//! - Freezer fixtures in temporary directories or memory
//! - A fault-injecting volume for failure and crash tests
//! - Property-based test generators using proptest
//! - Crash scenarios for interrupted writes and resets
//! - Concurrent reader/writer stress runs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ancientdb_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_freezer() {
//!     with_temp_freezer(|freezer| {
//!         fill_blocks(freezer, 0, 10, 64).unwrap();
//!         assert_eq!(freezer.ancients().unwrap(), 10);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
    pub use ancientdb_core::{AncientReader, AncientWriter};
}

pub use crash::*;
pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
