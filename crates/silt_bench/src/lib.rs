//! Benchmark utilities.

use rand::Rng;
use silt_core::{DictionaryId, Key, Store, TransactionId};
use silt_storage::{shared, MemorySource};

/// Generate random value bytes of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// A store over a fresh in-memory source with one dictionary registered.
pub fn memory_store() -> (Store, DictionaryId) {
    let mut store = Store::new(shared(MemorySource::new()));
    let dictionary = store.register_dictionary();
    (store, dictionary)
}

/// Commit `count` integer-keyed values of `payload_size` bytes each.
pub fn populate(store: &Store, dictionary: DictionaryId, count: i64, payload_size: usize) {
    let tx = TransactionId::new();
    let data = random_data(payload_size);
    for n in 0..count {
        store.put(dictionary, tx, Key::Int(n), &data).unwrap();
    }
    store.commit(tx).unwrap();
}
