//! Test fixtures and store helpers.
//!
//! Provides convenience functions for setting up test stores over memory
//! and file sources.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use silt_core::{DictionaryId, Store};
use silt_storage::{shared, FileSource, MemorySource, SharedSource};
use tempfile::TempDir;

/// Initializes test logging from `RUST_LOG`. Safe to call from every
/// test; only the first call installs the subscriber.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A recovered test store with one dictionary and automatic cleanup.
pub struct TestStore {
    /// The store under test.
    pub store: Store,
    /// Id of the pre-registered dictionary.
    pub dictionary: DictionaryId,
    source: SharedSource,
    /// Kept alive so the directory outlives the store; dropping it deletes
    /// the files.
    _temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates a store over a fresh in-memory source.
    pub fn memory() -> Self {
        let source = shared(MemorySource::new());
        let mut store = Store::new(Arc::clone(&source));
        let dictionary = store.register_dictionary();
        store.recover().expect("failed to recover in-memory store");
        Self {
            store,
            dictionary,
            source,
            _temp_dir: None,
        }
    }

    /// Creates a store over a file source in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let file_source =
            FileSource::open(&temp_dir.path().join("store")).expect("failed to open file source");
        let source = shared(file_source);
        let mut store = Store::new(Arc::clone(&source));
        let dictionary = store.register_dictionary();
        store.recover().expect("failed to recover file store");
        Self {
            store,
            dictionary,
            source,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Handle to the shared source backing the store.
    pub fn source(&self) -> SharedSource {
        Arc::clone(&self.source)
    }
}

impl Deref for TestStore {
    type Target = Store;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

impl DerefMut for TestStore {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.store
    }
}

/// Runs `test` against a fresh in-memory store.
pub fn with_memory_store<F: FnOnce(&TestStore)>(test: F) {
    let fixture = TestStore::memory();
    test(&fixture);
}

/// Runs `test` against a fresh file-backed store.
pub fn with_file_store<F: FnOnce(&TestStore)>(test: F) {
    let fixture = TestStore::file();
    test(&fixture);
}
