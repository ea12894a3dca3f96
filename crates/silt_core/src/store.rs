//! The store coordinates every dictionary sharing one stream pair.
//!
//! All dictionaries append values to the same data stream and commit
//! through the same log, so one transaction can span dictionaries and
//! still become durable with a single log flush. The store owns recovery
//! (log replay into the committed indexes) and compaction (rewriting live
//! blobs into a fresh stream pair and swapping it in atomically).

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use silt_storage::SharedSource;

use crate::config::Config;
use crate::dictionary::PersistentDictionary;
use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::log::{self, BatchReadOutcome};
use crate::types::{DictionaryId, TransactionId};

/// Below this many items, compaction waits for 100% waste.
const SMALL_STORE_ITEMS: usize = 10_000;

/// Below this many items, compaction waits for 50% waste; past it, 10%.
const LARGE_STORE_ITEMS: usize = 100_000;

/// What recovery found in the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Whole batches replayed into the committed indexes.
    pub batches_replayed: usize,
    /// Commands those batches carried.
    pub commands_applied: usize,
    /// True when a torn trailing record was cut off.
    pub truncated: bool,
}

/// What a compaction rewrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Data-stream length before the rewrite.
    pub bytes_before: u64,
    /// Data-stream length after the swap.
    pub bytes_after: u64,
    /// Committed commands written to the fresh log.
    pub commands_rewritten: usize,
}

/// A transactional key-value store multiplexing dictionaries onto one
/// data/log stream pair.
///
/// Dictionaries are registered up front, then [`recover`](Store::recover)
/// replays the log before the store is used:
///
/// ```
/// use silt_core::{Key, Store, TransactionId};
/// use silt_storage::{shared, MemorySource};
///
/// # fn main() -> silt_core::CoreResult<()> {
/// let mut store = Store::new(shared(MemorySource::new()));
/// let documents = store.register_dictionary();
/// store.recover()?;
///
/// let tx = TransactionId::new();
/// store.put(documents, tx, Key::from("users/1"), b"{}")?;
/// store.commit(tx)?;
/// # Ok(())
/// # }
/// ```
pub struct Store {
    source: SharedSource,
    dictionaries: Vec<PersistentDictionary>,
    config: Config,
}

impl Store {
    /// Creates a store over `source` with the default configuration.
    #[must_use]
    pub fn new(source: SharedSource) -> Self {
        Self::with_config(source, Config::default())
    }

    /// Creates a store over `source` with an explicit configuration.
    #[must_use]
    pub fn with_config(source: SharedSource, config: Config) -> Self {
        Self {
            source,
            dictionaries: Vec::new(),
            config,
        }
    }

    /// Adds a dictionary and returns its id.
    ///
    /// Ids are assigned in registration order, so a store must register
    /// its dictionaries in the same order every run for logged commands
    /// to land in the right collections.
    pub fn register_dictionary(&mut self) -> DictionaryId {
        let id = DictionaryId::new(self.dictionaries.len() as u32);
        self.dictionaries.push(PersistentDictionary::new(
            id,
            Arc::clone(&self.source),
            self.config.cache_capacity,
        ));
        id
    }

    /// Replays the log into the committed indexes. Call once, after every
    /// dictionary is registered and before the store is used.
    ///
    /// Replay stops cleanly at end of log. A trailing record that is
    /// incomplete or fails its checksum is a torn leftover from a crash;
    /// the log is truncated at its start and replay stops there.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying streams fail, when a
    /// checksummed record cannot be decoded, or when a command names a
    /// dictionary that was never registered.
    pub fn recover(&mut self) -> CoreResult<RecoveryStats> {
        let mut source = self.source.lock();
        let mut stats = RecoveryStats::default();
        let mut offset = 0u64;

        loop {
            match log::read_batch(&**source, offset)? {
                BatchReadOutcome::Batch {
                    commands,
                    next_offset,
                } => {
                    for command in &commands {
                        self.dictionary(command.dictionary())?;
                    }
                    for command in &commands {
                        self.dictionary(command.dictionary())?
                            .apply(std::slice::from_ref(command));
                    }
                    stats.batches_replayed += 1;
                    stats.commands_applied += commands.len();
                    offset = next_offset;
                }
                BatchReadOutcome::EndOfLog => break,
                BatchReadOutcome::Torn => {
                    warn!(offset, "log tail is torn, truncating");
                    source.log_truncate(offset)?;
                    stats.truncated = true;
                    break;
                }
            }
        }

        info!(
            batches = stats.batches_replayed,
            commands = stats.commands_applied,
            truncated = stats.truncated,
            "recovery complete"
        );
        Ok(stats)
    }

    /// Stages an upsert of `key` in `dictionary` for `tx`.
    ///
    /// Returns `Ok(false)` without side effect when the key is currently
    /// staged by a different transaction.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown dictionary or a failed append.
    pub fn put(
        &self,
        dictionary: DictionaryId,
        tx: TransactionId,
        key: Key,
        value: &[u8],
    ) -> CoreResult<bool> {
        self.dictionary(dictionary)?.put(tx, Arc::new(key), value)
    }

    /// Stages a removal of `key` in `dictionary` for `tx`.
    ///
    /// Returns `Ok(false)` without side effect when the key is currently
    /// staged by a different transaction.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown dictionary.
    pub fn delete(
        &self,
        dictionary: DictionaryId,
        tx: TransactionId,
        key: Key,
    ) -> CoreResult<bool> {
        Ok(self.dictionary(dictionary)?.delete(tx, Arc::new(key)))
    }

    /// Reads `key` as seen by `tx`: the transaction's own staged writes
    /// first, then the committed state.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown dictionary or an unreadable value.
    pub fn get(
        &self,
        dictionary: DictionaryId,
        tx: TransactionId,
        key: &Key,
    ) -> CoreResult<Option<Bytes>> {
        self.dictionary(dictionary)?.get(tx, key)
    }

    /// Durably commits every dictionary's staged commands for `tx` as one
    /// batch.
    ///
    /// The data stream is flushed first so no logged command can point
    /// past the durable end of the data, then the batch is written to the
    /// log exactly once and the log is flushed. Only after that are the
    /// committed indexes updated and the transaction's staging released.
    ///
    /// # Errors
    ///
    /// Returns an error when a write or flush fails; staged state is left
    /// intact in that case.
    pub fn commit(&self, tx: TransactionId) -> CoreResult<()> {
        let mut source = self.source.lock();

        let mut batch = Vec::new();
        for dictionary in &self.dictionaries {
            batch.extend(dictionary.commands_to_commit(tx));
        }

        if self.config.sync_on_commit {
            source.flush_data()?;
        }
        source.log_append(&log::encode_batch(&batch))?;
        if self.config.sync_on_commit {
            source.flush_log()?;
        }

        for dictionary in &self.dictionaries {
            dictionary.complete_commit(tx);
        }

        debug!(tx = %tx, commands = batch.len(), "committed batch");
        Ok(())
    }

    /// Discards `tx`'s staged commands in every dictionary.
    ///
    /// Blobs the transaction already appended stay in the data stream as
    /// waste until a compaction rewrites them away.
    pub fn rollback(&self, tx: TransactionId) {
        for dictionary in &self.dictionaries {
            dictionary.rollback(tx);
        }
    }

    /// Rewrites all live data into a fresh stream pair and swaps it in.
    ///
    /// Committed entries and still-staged puts are both carried over, so
    /// in-flight transactions stay valid across the swap. The committed
    /// entries are logged as a single batch in the fresh log. Indexes and
    /// staged commands are pointed at the new offsets only after the swap
    /// succeeds, and every read cache is dropped first: offsets from the
    /// old stream are meaningless in the new one, and a stale entry must
    /// not survive into the moment refreshed offsets become visible.
    ///
    /// # Errors
    ///
    /// Returns an error when the rewrite or the swap fails; the live
    /// stream pair is untouched in that case.
    pub fn compact(&self) -> CoreResult<CompactionStats> {
        let mut source = self.source.lock();
        let bytes_before = source.data_len()?;

        let mut data_temp = source.create_temporary()?;
        let mut log_temp = source.create_temporary()?;

        let mut combined = Vec::new();
        let mut refreshed_per_dictionary = Vec::with_capacity(self.dictionaries.len());
        let mut staged_per_dictionary = Vec::with_capacity(self.dictionaries.len());
        for dictionary in &self.dictionaries {
            let refreshed = dictionary.copy_committed_data(&**source, &mut *data_temp)?;
            let staged = dictionary.copy_staged_data(&**source, &mut *data_temp)?;
            combined.extend_from_slice(&refreshed);
            refreshed_per_dictionary.push(refreshed);
            staged_per_dictionary.push(staged);
        }
        let commands_rewritten = combined.len();

        log_temp.append(&log::encode_batch(&combined))?;
        data_temp.flush()?;
        log_temp.flush()?;
        source.replace_atomically(data_temp, log_temp)?;

        for ((dictionary, refreshed), staged) in self
            .dictionaries
            .iter()
            .zip(refreshed_per_dictionary)
            .zip(staged_per_dictionary)
        {
            // The cache is emptied before any refreshed offset becomes
            // visible, so a stale entry under a numerically equal
            // old-stream offset cannot satisfy a lock-free hit. Misses
            // cannot repopulate it while this compaction holds the source.
            dictionary.clear_cache();
            dictionary.merge_compacted(&refreshed);
            dictionary.replace_staged(staged);
            dictionary.reset_waste();
        }

        let bytes_after = source.data_len()?;
        info!(
            bytes_before,
            bytes_after,
            commands = commands_rewritten,
            "compaction complete"
        );
        Ok(CompactionStats {
            bytes_before,
            bytes_after,
            commands_rewritten,
        })
    }

    /// Compacts when accumulated waste crosses the size-tiered threshold.
    /// Meant to be called from idle or maintenance moments.
    ///
    /// # Errors
    ///
    /// Returns an error when a required compaction fails.
    pub fn compact_if_needed(&self) -> CoreResult<Option<CompactionStats>> {
        if !self.compaction_required() {
            return Ok(None);
        }
        self.compact().map(Some)
    }

    /// Smallest committed key in `dictionary`.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown dictionary.
    pub fn first(&self, dictionary: DictionaryId) -> CoreResult<Option<Arc<Key>>> {
        Ok(self.dictionary(dictionary)?.first())
    }

    /// Largest committed key in `dictionary`.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown dictionary.
    pub fn last(&self, dictionary: DictionaryId) -> CoreResult<Option<Arc<Key>>> {
        Ok(self.dictionary(dictionary)?.last())
    }

    /// Committed keys in `dictionary` at or above `bound`, in key order.
    /// An object bound carrying a subset of fields matches any key that
    /// agrees on those fields.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown dictionary.
    pub fn greater_than_or_equal(
        &self,
        dictionary: DictionaryId,
        bound: &Key,
    ) -> CoreResult<Vec<Arc<Key>>> {
        Ok(self.dictionary(dictionary)?.greater_than_or_equal(bound))
    }

    /// Number of committed entries in `dictionary`.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown dictionary.
    pub fn item_count(&self, dictionary: DictionaryId) -> CoreResult<usize> {
        Ok(self.dictionary(dictionary)?.item_count())
    }

    /// Superseded or deleted entries in `dictionary` still occupying
    /// data-stream bytes.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown dictionary.
    pub fn waste_count(&self, dictionary: DictionaryId) -> CoreResult<usize> {
        Ok(self.dictionary(dictionary)?.waste_count())
    }

    fn compaction_required(&self) -> bool {
        let items: usize = self.dictionaries.iter().map(PersistentDictionary::item_count).sum();
        let waste: usize = self.dictionaries.iter().map(PersistentDictionary::waste_count).sum();
        waste_exceeds_threshold(items, waste)
    }

    fn dictionary(&self, id: DictionaryId) -> CoreResult<&PersistentDictionary> {
        self.dictionaries
            .get(id.as_u32() as usize)
            .ok_or(CoreError::UnknownDictionary { id: id.as_u32() })
    }
}

/// Size-tiered waste policy. A small store tolerates waste up to its item
/// count; the tolerated fraction shrinks to a half and then a tenth as the
/// store grows.
fn waste_exceeds_threshold(items: usize, waste: usize) -> bool {
    if items < SMALL_STORE_ITEMS {
        return waste > items;
    }
    if items < LARGE_STORE_ITEMS {
        return waste > items / 2;
    }
    waste > items / 10
}

#[cfg(test)]
mod tests {
    use silt_storage::{shared, FileSource, MemorySource, PersistentSource};
    use tempfile::tempdir;

    use super::*;

    fn memory_store(dictionaries: usize) -> (Store, Vec<DictionaryId>, SharedSource) {
        let source = shared(MemorySource::new());
        let mut store = Store::new(Arc::clone(&source));
        let ids = (0..dictionaries)
            .map(|_| store.register_dictionary())
            .collect();
        (store, ids, source)
    }

    fn snapshot(source: &SharedSource) -> (Vec<u8>, Vec<u8>) {
        let guard = source.lock();
        guard
            .as_any()
            .downcast_ref::<MemorySource>()
            .unwrap()
            .snapshot()
    }

    fn reopened(data: Vec<u8>, log: Vec<u8>, dictionaries: usize) -> (Store, Vec<DictionaryId>, RecoveryStats) {
        let source = shared(MemorySource::with_streams(data, log));
        let mut store = Store::new(source);
        let ids = (0..dictionaries)
            .map(|_| store.register_dictionary())
            .collect();
        let stats = store.recover().unwrap();
        (store, ids, stats)
    }

    #[test]
    fn fresh_store_recovers_cleanly() {
        let (mut store, _ids, _source) = memory_store(1);
        let stats = store.recover().unwrap();
        assert_eq!(stats, RecoveryStats::default());
    }

    #[test]
    fn overwrite_is_isolated_until_commit() {
        let (store, ids, _source) = memory_store(1);
        let d = ids[0];

        let t1 = TransactionId::new();
        assert!(store.put(d, t1, Key::from("a"), &[1, 2]).unwrap());
        assert!(store.put(d, t1, Key::from("b"), &[3, 4]).unwrap());
        store.commit(t1).unwrap();

        let t2 = TransactionId::new();
        assert!(store.put(d, t2, Key::from("a"), &[9, 9]).unwrap());

        let other = TransactionId::new();
        assert_eq!(
            store.get(d, t2, &Key::from("a")).unwrap().as_deref(),
            Some(&[9, 9][..])
        );
        assert_eq!(
            store.get(d, other, &Key::from("a")).unwrap().as_deref(),
            Some(&[1, 2][..])
        );

        store.commit(t2).unwrap();
        let any = TransactionId::new();
        assert_eq!(
            store.get(d, any, &Key::from("a")).unwrap().as_deref(),
            Some(&[9, 9][..])
        );
        assert_eq!(store.waste_count(d).unwrap(), 1);
    }

    #[test]
    fn conflicting_writers_fail_until_release() {
        let (store, ids, _source) = memory_store(1);
        let d = ids[0];
        let key = Key::from("contested");

        let a = TransactionId::new();
        let b = TransactionId::new();
        assert!(store.put(d, a, key.clone(), b"a").unwrap());
        assert!(!store.put(d, b, key.clone(), b"b").unwrap());
        assert!(!store.delete(d, b, key.clone()).unwrap());

        store.commit(a).unwrap();
        assert!(store.put(d, b, key.clone(), b"b").unwrap());
        store.rollback(b);

        let c = TransactionId::new();
        assert!(store.delete(d, c, key).unwrap());
    }

    #[test]
    fn commit_spans_dictionaries() {
        let (store, ids, _source) = memory_store(2);
        let tx = TransactionId::new();
        assert!(store.put(ids[0], tx, Key::Int(1), b"doc").unwrap());
        assert!(store.put(ids[1], tx, Key::Int(1), b"index").unwrap());
        store.commit(tx).unwrap();

        let reader = TransactionId::new();
        assert_eq!(
            store.get(ids[0], reader, &Key::Int(1)).unwrap().as_deref(),
            Some(&b"doc"[..])
        );
        assert_eq!(
            store.get(ids[1], reader, &Key::Int(1)).unwrap().as_deref(),
            Some(&b"index"[..])
        );
    }

    #[test]
    fn commit_writes_the_batch_exactly_once() {
        let (store, ids, source) = memory_store(1);
        let tx = TransactionId::new();
        assert!(store.put(ids[0], tx, Key::Int(1), b"v").unwrap());
        assert!(store.delete(ids[0], tx, Key::Int(2)).unwrap());
        store.commit(tx).unwrap();

        let guard = source.lock();
        let BatchReadOutcome::Batch {
            commands,
            next_offset,
        } = log::read_batch(&**guard, 0).unwrap()
        else {
            panic!("expected one batch");
        };
        assert_eq!(commands.len(), 2);
        assert_eq!(next_offset, guard.log_len().unwrap());
    }

    #[test]
    fn empty_commit_still_logs_a_batch() {
        let (store, _ids, source) = memory_store(1);
        store.commit(TransactionId::new()).unwrap();

        let (data, log_bytes) = snapshot(&source);
        assert!(data.is_empty());
        let (_store, _ids, stats) = reopened(data, log_bytes, 1);
        assert_eq!(stats.batches_replayed, 1);
        assert_eq!(stats.commands_applied, 0);
    }

    #[test]
    fn restart_replays_whole_batches() {
        let (store, ids, source) = memory_store(1);
        let d = ids[0];

        let t1 = TransactionId::new();
        assert!(store.put(d, t1, Key::Int(1), b"first").unwrap());
        store.commit(t1).unwrap();
        let t2 = TransactionId::new();
        assert!(store.put(d, t2, Key::Int(2), b"second").unwrap());
        store.commit(t2).unwrap();

        let (data, log_bytes) = snapshot(&source);
        let (store, ids, stats) = reopened(data, log_bytes, 1);
        assert_eq!(stats.batches_replayed, 2);
        assert_eq!(stats.commands_applied, 2);
        assert!(!stats.truncated);

        let reader = TransactionId::new();
        assert_eq!(
            store.get(ids[0], reader, &Key::Int(1)).unwrap().as_deref(),
            Some(&b"first"[..])
        );
        assert_eq!(
            store.get(ids[0], reader, &Key::Int(2)).unwrap().as_deref(),
            Some(&b"second"[..])
        );
    }

    #[test]
    fn torn_tail_loses_only_the_torn_batch() {
        let (store, ids, source) = memory_store(1);
        let d = ids[0];

        let t1 = TransactionId::new();
        assert!(store.put(d, t1, Key::Int(1), b"kept").unwrap());
        store.commit(t1).unwrap();
        let log_len_after_first = source.lock().log_len().unwrap();

        let t2 = TransactionId::new();
        assert!(store.put(d, t2, Key::Int(2), b"torn").unwrap());
        store.commit(t2).unwrap();

        let (data, log_bytes) = snapshot(&source);
        let cut = log_bytes.len() - 3;
        let (store, ids, stats) = reopened(data, log_bytes[..cut].to_vec(), 1);

        assert!(stats.truncated);
        assert_eq!(stats.batches_replayed, 1);
        assert!(cut as u64 > log_len_after_first);

        let reader = TransactionId::new();
        assert_eq!(
            store.get(ids[0], reader, &Key::Int(1)).unwrap().as_deref(),
            Some(&b"kept"[..])
        );
        assert_eq!(store.get(ids[0], reader, &Key::Int(2)).unwrap(), None);
        assert_eq!(store.item_count(ids[0]).unwrap(), 1);
    }

    #[test]
    fn torn_tail_is_removed_from_the_log() {
        let (store, ids, source) = memory_store(1);
        let tx = TransactionId::new();
        assert!(store.put(ids[0], tx, Key::Int(1), b"v").unwrap());
        store.commit(tx).unwrap();
        let whole_record_len = source.lock().log_len().unwrap();

        let (data, log_bytes) = snapshot(&source);
        let mut torn = log_bytes.clone();
        torn.extend_from_slice(&log_bytes[..7]);

        let reopened_source = shared(MemorySource::with_streams(data, torn));
        let mut store = Store::new(Arc::clone(&reopened_source));
        store.register_dictionary();
        let stats = store.recover().unwrap();

        assert!(stats.truncated);
        assert_eq!(
            reopened_source.lock().log_len().unwrap(),
            whole_record_len
        );
    }

    #[test]
    fn torn_batch_spanning_dictionaries_applies_nowhere() {
        let (store, ids, source) = memory_store(2);
        let tx = TransactionId::new();
        assert!(store.put(ids[0], tx, Key::Int(1), b"doc").unwrap());
        assert!(store.put(ids[1], tx, Key::Int(1), b"index").unwrap());
        store.commit(tx).unwrap();

        let (data, log_bytes) = snapshot(&source);
        let cut = log_bytes.len() / 2;
        let (store, ids, stats) = reopened(data, log_bytes[..cut].to_vec(), 2);

        assert!(stats.truncated);
        assert_eq!(stats.batches_replayed, 0);
        let reader = TransactionId::new();
        assert_eq!(store.get(ids[0], reader, &Key::Int(1)).unwrap(), None);
        assert_eq!(store.get(ids[1], reader, &Key::Int(1)).unwrap(), None);
    }

    #[test]
    fn replaying_a_command_for_an_unknown_dictionary_is_fatal() {
        let (store, ids, source) = memory_store(2);
        let tx = TransactionId::new();
        assert!(store.put(ids[1], tx, Key::Int(1), b"v").unwrap());
        store.commit(tx).unwrap();

        let (data, log_bytes) = snapshot(&source);
        let reopened_source = shared(MemorySource::with_streams(data, log_bytes));
        let mut store = Store::new(reopened_source);
        store.register_dictionary();

        let result = store.recover();
        assert!(matches!(
            result,
            Err(CoreError::UnknownDictionary { id: 1 })
        ));
    }

    #[test]
    fn rolled_back_data_is_absent_after_restart() {
        let (store, ids, source) = memory_store(1);
        let d = ids[0];

        let committed = TransactionId::new();
        assert!(store.put(d, committed, Key::Int(1), b"kept").unwrap());
        store.commit(committed).unwrap();

        let abandoned = TransactionId::new();
        assert!(store.put(d, abandoned, Key::Int(2), b"gone").unwrap());
        store.rollback(abandoned);

        let (data, log_bytes) = snapshot(&source);
        // The orphan frame is still in the data stream, but no logged
        // command references it
        assert!(data.len() > (4 + b"kept".len()));

        let (store, ids, _stats) = reopened(data, log_bytes, 1);
        let reader = TransactionId::new();
        assert_eq!(
            store.get(ids[0], reader, &Key::Int(1)).unwrap().as_deref(),
            Some(&b"kept"[..])
        );
        assert_eq!(store.get(ids[0], reader, &Key::Int(2)).unwrap(), None);
    }

    #[test]
    fn compaction_preserves_values_and_shrinks_the_stream() {
        let (store, ids, source) = memory_store(1);
        let d = ids[0];

        let setup = TransactionId::new();
        assert!(store.put(d, setup, Key::from("a"), b"alpha").unwrap());
        assert!(store.put(d, setup, Key::from("b"), b"beta-1").unwrap());
        assert!(store.put(d, setup, Key::from("c"), b"gamma").unwrap());
        store.commit(setup).unwrap();

        let churn = TransactionId::new();
        assert!(store.put(d, churn, Key::from("b"), b"beta-2").unwrap());
        assert!(store.delete(d, churn, Key::from("c")).unwrap());
        store.commit(churn).unwrap();

        let live = TransactionId::new();
        assert!(store.put(d, live, Key::from("d"), b"staged").unwrap());

        // Populate the cache so stale entries would be caught below
        let reader = TransactionId::new();
        assert_eq!(
            store.get(d, reader, &Key::from("a")).unwrap().as_deref(),
            Some(&b"alpha"[..])
        );

        let stats = store.compact().unwrap();
        assert!(stats.bytes_after < stats.bytes_before);
        assert_eq!(stats.commands_rewritten, 2);
        assert_eq!(store.waste_count(d).unwrap(), 0);

        assert_eq!(
            store.get(d, reader, &Key::from("a")).unwrap().as_deref(),
            Some(&b"alpha"[..])
        );
        assert_eq!(
            store.get(d, reader, &Key::from("b")).unwrap().as_deref(),
            Some(&b"beta-2"[..])
        );
        assert_eq!(store.get(d, reader, &Key::from("c")).unwrap(), None);

        // The in-flight transaction rides the swap and can still commit
        assert_eq!(
            store.get(d, live, &Key::from("d")).unwrap().as_deref(),
            Some(&b"staged"[..])
        );
        store.commit(live).unwrap();
        assert_eq!(
            store.get(d, reader, &Key::from("d")).unwrap().as_deref(),
            Some(&b"staged"[..])
        );

        // A restart from the compacted pair sees the same state
        let (data, log_bytes) = snapshot(&source);
        let (store, ids, _stats) = reopened(data, log_bytes, 1);
        assert_eq!(
            store
                .get(ids[0], TransactionId::new(), &Key::from("b"))
                .unwrap()
                .as_deref(),
            Some(&b"beta-2"[..])
        );
    }

    #[test]
    fn insert_and_remove_in_one_transaction_reclaims_everything() {
        let (store, ids, source) = memory_store(1);
        let d = ids[0];

        let tx = TransactionId::new();
        for n in 0..16 {
            assert!(store.put(d, tx, Key::Int(n), b"payload").unwrap());
        }
        for n in 0..16 {
            assert!(store.delete(d, tx, Key::Int(n)).unwrap());
        }
        let len_before_commit = source.lock().data_len().unwrap();
        store.commit(tx).unwrap();

        assert_eq!(store.item_count(d).unwrap(), 0);
        assert_eq!(store.waste_count(d).unwrap(), 16);

        store.compact().unwrap();
        let len_after = source.lock().data_len().unwrap();
        assert_eq!(len_after, 0);
        assert!(len_after < len_before_commit);
    }

    #[test]
    fn compact_if_needed_follows_the_waste_threshold() {
        let (store, ids, _source) = memory_store(1);
        let d = ids[0];

        assert!(store.compact_if_needed().unwrap().is_none());

        let tx = TransactionId::new();
        assert!(store.put(d, tx, Key::Int(1), b"v1").unwrap());
        store.commit(tx).unwrap();

        // One item, one waste: not yet over 100%
        let tx = TransactionId::new();
        assert!(store.put(d, tx, Key::Int(1), b"v2").unwrap());
        store.commit(tx).unwrap();
        assert!(store.compact_if_needed().unwrap().is_none());

        // Second overwrite pushes waste past the item count
        let tx = TransactionId::new();
        assert!(store.put(d, tx, Key::Int(1), b"v3").unwrap());
        store.commit(tx).unwrap();
        let stats = store.compact_if_needed().unwrap();
        assert!(stats.is_some());

        // Waste was reset by the compaction
        assert_eq!(store.waste_count(d).unwrap(), 0);
        assert!(store.compact_if_needed().unwrap().is_none());
    }

    #[test]
    fn waste_thresholds_scale_with_store_size() {
        assert!(!waste_exceeds_threshold(0, 0));
        assert!(waste_exceeds_threshold(0, 1));
        assert!(!waste_exceeds_threshold(9_999, 9_999));
        assert!(waste_exceeds_threshold(9_999, 10_000));
        assert!(!waste_exceeds_threshold(10_000, 5_000));
        assert!(waste_exceeds_threshold(10_000, 5_001));
        assert!(!waste_exceeds_threshold(100_000, 10_000));
        assert!(waste_exceeds_threshold(100_000, 10_001));
    }

    #[test]
    fn scans_and_counts_reject_unknown_dictionaries() {
        let (store, _ids, _source) = memory_store(1);
        let missing = DictionaryId::new(5);

        assert!(store.first(missing).is_err());
        assert!(store.last(missing).is_err());
        assert!(store.item_count(missing).is_err());
        assert!(store
            .get(missing, TransactionId::new(), &Key::Int(1))
            .is_err());
    }

    #[test]
    fn ordered_scans_work_through_the_store() {
        let (store, ids, _source) = memory_store(1);
        let d = ids[0];
        let tx = TransactionId::new();
        for n in [4, 2, 8] {
            assert!(store.put(d, tx, Key::Int(n), b"v").unwrap());
        }
        store.commit(tx).unwrap();

        assert_eq!(store.first(d).unwrap().as_deref(), Some(&Key::Int(2)));
        assert_eq!(store.last(d).unwrap().as_deref(), Some(&Key::Int(8)));
        assert_eq!(store.greater_than_or_equal(d, &Key::Int(4)).unwrap().len(), 2);
    }

    #[test]
    fn file_backed_store_survives_restart_and_compaction() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store");

        {
            let source = shared(FileSource::open(&path).unwrap());
            let mut store = Store::new(source);
            let d = store.register_dictionary();
            store.recover().unwrap();

            let tx = TransactionId::new();
            assert!(store.put(d, tx, Key::from("a"), b"one").unwrap());
            assert!(store.put(d, tx, Key::from("b"), b"two").unwrap());
            store.commit(tx).unwrap();

            let tx = TransactionId::new();
            assert!(store.put(d, tx, Key::from("a"), b"three").unwrap());
            store.commit(tx).unwrap();
        }

        {
            let source = shared(FileSource::open(&path).unwrap());
            let mut store = Store::new(Arc::clone(&source));
            let d = store.register_dictionary();
            let stats = store.recover().unwrap();
            assert_eq!(stats.batches_replayed, 2);

            let reader = TransactionId::new();
            assert_eq!(
                store.get(d, reader, &Key::from("a")).unwrap().as_deref(),
                Some(&b"three"[..])
            );

            let compaction = store.compact().unwrap();
            assert!(compaction.bytes_after < compaction.bytes_before);
            assert_eq!(
                store.get(d, reader, &Key::from("a")).unwrap().as_deref(),
                Some(&b"three"[..])
            );
        }

        {
            let source = shared(FileSource::open(&path).unwrap());
            let mut store = Store::new(source);
            let d = store.register_dictionary();
            let stats = store.recover().unwrap();
            assert_eq!(stats.batches_replayed, 1);
            assert!(!stats.truncated);

            let reader = TransactionId::new();
            assert_eq!(
                store.get(d, reader, &Key::from("a")).unwrap().as_deref(),
                Some(&b"three"[..])
            );
            assert_eq!(
                store.get(d, reader, &Key::from("b")).unwrap().as_deref(),
                Some(&b"two"[..])
            );
        }
    }

    #[test]
    fn unsynced_commits_still_apply_in_memory() {
        let source = shared(MemorySource::new());
        let mut store = Store::with_config(
            Arc::clone(&source),
            Config::default().sync_on_commit(false),
        );
        let d = store.register_dictionary();
        store.recover().unwrap();

        let tx = TransactionId::new();
        assert!(store.put(d, tx, Key::Int(1), b"v").unwrap());
        store.commit(tx).unwrap();

        assert_eq!(
            store
                .get(d, TransactionId::new(), &Key::Int(1))
                .unwrap()
                .as_deref(),
            Some(&b"v"[..])
        );
        // The batch record was still appended
        assert!(source.lock().log_len().unwrap() > 0);
    }
}
