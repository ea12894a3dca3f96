//! # Silt Storage
//!
//! Persistent source trait and implementations for the Silt engine.
//!
//! This crate provides the lowest-level storage abstraction: a **pair of
//! append-only byte streams** (data and log) plus an atomic swap used by
//! compaction. Sources are opaque byte stores; the engine above owns all
//! format interpretation.
//!
//! ## Design Principles
//!
//! - Sources expose plain stream operations (read, append, truncate, flush)
//! - No knowledge of commit batches, keys, or length prefixes
//! - One coarse mutex above the source serializes all mutation
//!
//! ## Available Sources
//!
//! - [`MemorySource`] - For testing and ephemeral stores
//! - [`FileSource`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use silt_storage::{shared, MemorySource};
//!
//! let source = shared(MemorySource::new());
//! let mut guard = source.lock();
//! let offset = guard.data_append(b"hello world").unwrap();
//! let data = guard.data_read(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod source;

pub use error::{StorageError, StorageResult};
pub use file::FileSource;
pub use memory::MemorySource;
pub use source::{shared, PersistentSource, SharedSource, TemporaryStream};
