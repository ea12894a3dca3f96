//! Deterministic interleavings around the compaction stream swap.
//!
//! [`GatedSource`] wraps an in-memory source and parks the stream-pair
//! swap until a [`SwapGate`] releases it. The engine holds its source
//! lock across the whole compaction, so the pause opens a window in
//! which staging traffic that never touches the source (deletes,
//! rollbacks) runs while the rewrite snapshot is already taken, and in
//! which readers pile up on the source lock. Tests use the window to
//! pin down what a compaction racing live transactions must preserve.

use std::any::Any;
use std::sync::mpsc::{channel, Receiver, Sender};

use silt_storage::{MemorySource, PersistentSource, StorageResult, TemporaryStream};

/// Test-side handle to a [`GatedSource`]'s parked swap.
pub struct SwapGate {
    entered: Receiver<()>,
    release: Sender<()>,
}

impl SwapGate {
    /// Blocks until the source has entered a stream-pair swap.
    pub fn wait_for_swap(&self) {
        self.entered
            .recv()
            .expect("source dropped before reaching a swap");
    }

    /// Lets the parked swap proceed.
    pub fn release(&self) {
        let _ = self.release.send(());
    }
}

/// An in-memory source whose stream-pair swap parks until released.
///
/// Every swap parks until the gate releases it; once the [`SwapGate`]
/// is dropped, swaps pass straight through.
pub struct GatedSource {
    inner: MemorySource,
    entered: Sender<()>,
    release: Receiver<()>,
}

impl GatedSource {
    /// Creates a gated source and the gate controlling it.
    pub fn new() -> (Self, SwapGate) {
        let (entered_tx, entered_rx) = channel();
        let (release_tx, release_rx) = channel();
        let source = Self {
            inner: MemorySource::new(),
            entered: entered_tx,
            release: release_rx,
        };
        let gate = SwapGate {
            entered: entered_rx,
            release: release_tx,
        };
        (source, gate)
    }
}

impl PersistentSource for GatedSource {
    fn data_read(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.data_read(offset, len)
    }

    fn data_append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.inner.data_append(data)
    }

    fn data_len(&self) -> StorageResult<u64> {
        self.inner.data_len()
    }

    fn flush_data(&mut self) -> StorageResult<()> {
        self.inner.flush_data()
    }

    fn log_read(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.log_read(offset, len)
    }

    fn log_append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.inner.log_append(data)
    }

    fn log_len(&self) -> StorageResult<u64> {
        self.inner.log_len()
    }

    fn log_truncate(&mut self, new_len: u64) -> StorageResult<()> {
        self.inner.log_truncate(new_len)
    }

    fn flush_log(&mut self) -> StorageResult<()> {
        self.inner.flush_log()
    }

    fn create_temporary(&self) -> StorageResult<Box<dyn TemporaryStream>> {
        self.inner.create_temporary()
    }

    fn replace_atomically(
        &mut self,
        data: Box<dyn TemporaryStream>,
        log: Box<dyn TemporaryStream>,
    ) -> StorageResult<()> {
        let _ = self.entered.send(());
        let _ = self.release.recv();
        self.inner.replace_atomically(data, log)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use silt_core::{DictionaryId, Key, Store, TransactionId};
    use silt_storage::shared;

    use super::*;

    fn gated_store() -> (Arc<Store>, DictionaryId, SwapGate) {
        let (gated, gate) = GatedSource::new();
        let mut store = Store::new(shared(gated));
        let d = store.register_dictionary();
        store.recover().unwrap();
        (Arc::new(store), d, gate)
    }

    #[test]
    fn delete_staged_during_a_swap_survives_the_merge() {
        let (store, d, gate) = gated_store();

        let setup = TransactionId::new();
        assert!(store.put(d, setup, Key::Int(1), b"committed").unwrap());
        store.commit(setup).unwrap();

        // In flight across the compaction, with a put already staged so
        // the rewrite snapshots this transaction
        let tx = TransactionId::new();
        assert!(store.put(d, tx, Key::Int(2), b"staged").unwrap());

        let compactor = {
            let store = Arc::clone(&store);
            thread::spawn(move || store.compact().unwrap())
        };
        gate.wait_for_swap();
        // Deletes never touch the source, so this lands while the swap
        // is parked and the rewrite snapshot is already taken
        assert!(store.delete(d, tx, Key::Int(1)).unwrap());
        gate.release();
        compactor.join().expect("compaction thread panicked");

        assert_eq!(store.get(d, tx, &Key::Int(1)).unwrap(), None);

        store.commit(tx).unwrap();
        let reader = TransactionId::new();
        assert_eq!(store.get(d, reader, &Key::Int(1)).unwrap(), None);
        assert_eq!(
            store.get(d, reader, &Key::Int(2)).unwrap().as_deref(),
            Some(&b"staged"[..])
        );

        // Commit released the claim; the key is free again
        let next = TransactionId::new();
        assert!(store.put(d, next, Key::Int(1), b"reclaimed").unwrap());
    }

    #[test]
    fn rollback_during_a_swap_is_not_resurrected() {
        let (store, d, gate) = gated_store();

        let setup = TransactionId::new();
        assert!(store.put(d, setup, Key::Int(1), b"keep").unwrap());
        store.commit(setup).unwrap();

        let abandoned = TransactionId::new();
        assert!(store.put(d, abandoned, Key::Int(2), b"larger").unwrap());

        let compactor = {
            let store = Arc::clone(&store);
            thread::spawn(move || store.compact().unwrap())
        };
        gate.wait_for_swap();
        store.rollback(abandoned);
        gate.release();
        compactor.join().expect("compaction thread panicked");

        assert!(store
            .get(d, TransactionId::new(), &Key::Int(2))
            .unwrap()
            .is_none());

        // The first rewrite copied the blob before the rollback landed; a
        // second one must not carry it forward again
        drop(gate);
        let stats = store.compact().unwrap();
        let committed_only = 4 + b"keep".len() as u64;
        assert_eq!(stats.bytes_after, committed_only);

        let next = TransactionId::new();
        assert!(store.put(d, next, Key::Int(2), b"fresh").unwrap());
    }

    #[test]
    fn reader_blocked_across_a_swap_reads_the_moved_value() {
        let (store, d, gate) = gated_store();

        // Leading churn so the surviving value's offset moves in the swap
        let churn = TransactionId::new();
        assert!(store.put(d, churn, Key::Int(1), b"padding-bytes").unwrap());
        store.commit(churn).unwrap();
        let live = TransactionId::new();
        assert!(store.put(d, live, Key::Int(2), b"wanted").unwrap());
        store.commit(live).unwrap();
        let dropper = TransactionId::new();
        assert!(store.delete(d, dropper, Key::Int(1)).unwrap());
        store.commit(dropper).unwrap();

        let compactor = {
            let store = Arc::clone(&store);
            thread::spawn(move || store.compact().unwrap())
        };
        gate.wait_for_swap();

        // Not cached, so the read resolves the old offset and then
        // blocks on the source lock until the swap completes
        let reader = {
            let store = Arc::clone(&store);
            thread::spawn(move || store.get(d, TransactionId::new(), &Key::Int(2)))
        };
        thread::sleep(Duration::from_millis(50));
        gate.release();
        compactor.join().expect("compaction thread panicked");

        let value = reader.join().expect("reader thread panicked").unwrap();
        assert_eq!(value.as_deref(), Some(&b"wanted"[..]));

        // The entry cached by that read belongs to the fresh stream
        assert_eq!(
            store
                .get(d, TransactionId::new(), &Key::Int(2))
                .unwrap()
                .as_deref(),
            Some(&b"wanted"[..])
        );
    }
}
