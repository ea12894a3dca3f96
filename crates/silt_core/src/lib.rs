//! # Silt Core
//!
//! Transactional key-value engine with structured keys.
//!
//! A [`Store`] multiplexes any number of keyed dictionaries onto one
//! append-only data/log stream pair from [`silt_storage`]. Writes are
//! staged per transaction with first-writer-wins conflict handling and
//! become durable as one checksummed log batch per commit. On startup the
//! log is replayed to rebuild the in-memory indexes, discarding at most a
//! torn trailing batch. Space held by overwritten and deleted values is
//! reclaimed by compaction, which rewrites live data into a fresh stream
//! pair and swaps it in atomically.
//!
//! Keys are semi-structured values ([`Key`]) ordered by a structural
//! comparator; an object key carrying a subset of another key's fields
//! compares equal to it, which is what makes prefix-style range scans
//! over composite keys work.
//!
//! ```
//! use silt_core::{Key, Store, TransactionId};
//! use silt_storage::{shared, MemorySource};
//!
//! # fn main() -> silt_core::CoreResult<()> {
//! let mut store = Store::new(shared(MemorySource::new()));
//! let documents = store.register_dictionary();
//! store.recover()?;
//!
//! let tx = TransactionId::new();
//! store.put(documents, tx, Key::from("users/1"), br#"{"active":true}"#)?;
//! assert!(store.get(documents, tx, &Key::from("users/1"))?.is_some());
//! store.commit(tx)?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod dictionary;
mod error;
mod key;
mod log;
mod store;
mod types;

pub use bytes::Bytes;
pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use key::Key;
pub use store::{CompactionStats, RecoveryStats, Store};
pub use types::{DictionaryId, TransactionId};
