//! # ancientdb Storage
//!
//! Storage backends and file namespaces for ancientdb.
//!
//! Freezer tables see their files only through [`StorageBackend`], an
//! append-only byte store, and find them by name through a [`Volume`]. The
//! index, data and metadata formats all live in `ancientdb_core`; nothing
//! here knows about them.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral storage
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Available Volumes
//!
//! - [`MemoryVolume`] - Named in-memory backends
//! - [`DirVolume`] - A locked directory on disk
//!
//! ## Example
//!
//! ```rust
//! use ancientdb_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod volume;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use volume::{DirVolume, MemoryVolume, Volume, LOCK_FILE};
