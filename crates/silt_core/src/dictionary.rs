//! A single keyed collection inside the shared stream pair.
//!
//! Each dictionary keeps a committed index (hash map for point lookups plus
//! a key-ordered list for scans, updated in lockstep), per-transaction
//! staging state, a waste counter, and a read cache. Mutations are staged
//! per transaction and only reach the committed index when the store has
//! durably logged the batch. First writer wins: a key staged by one
//! transaction cannot be staged by another until commit or rollback.

use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use silt_storage::{PersistentSource, SharedSource, StorageError, TemporaryStream};

use crate::cache::ReadCache;
use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::log::Command;
use crate::types::{DictionaryId, TransactionId};

/// Size of the length prefix in front of every stored value.
const FRAME_HEADER: u64 = 4;

/// Largest value a length-prefixed frame can carry.
const MAX_VALUE_LEN: usize = u32::MAX as usize;

/// Location of a committed value inside the data stream.
///
/// The offset points at the raw value bytes, just past the frame's length
/// prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ValueRef {
    pub offset: u64,
    pub len: u32,
}

/// Committed key index. The hash map and the ordered list always hold the
/// same set of keys.
#[derive(Default)]
struct Index {
    by_key: HashMap<Arc<Key>, ValueRef>,
    ordered: Vec<Arc<Key>>,
}

impl Index {
    fn get(&self, key: &Key) -> Option<ValueRef> {
        self.by_key.get(key).copied()
    }

    /// Inserts or replaces an entry. Returns true when an existing entry
    /// was overwritten.
    fn upsert(&mut self, key: Arc<Key>, value: ValueRef) -> bool {
        match self.by_key.entry(key) {
            Entry::Occupied(mut entry) => {
                entry.insert(value);
                true
            }
            Entry::Vacant(entry) => {
                let position = self
                    .ordered
                    .partition_point(|stored| stored.cmp_structural(entry.key()) == Ordering::Less);
                self.ordered.insert(position, Arc::clone(entry.key()));
                entry.insert(value);
                false
            }
        }
    }

    fn remove(&mut self, key: &Key) {
        if self.by_key.remove(key).is_none() {
            return;
        }
        // Structurally equal keys sit in one contiguous band; find the one
        // that is exactly this key.
        let start = self
            .ordered
            .partition_point(|stored| stored.cmp_structural(key) == Ordering::Less);
        for position in start..self.ordered.len() {
            match self.ordered[position].cmp_structural(key) {
                Ordering::Greater => break,
                Ordering::Equal if self.ordered[position].as_ref() == key => {
                    self.ordered.remove(position);
                    break;
                }
                _ => {}
            }
        }
    }
}

/// Per-transaction staging state.
#[derive(Default)]
struct Staging {
    /// Key to the transaction that currently has it staged.
    owners: HashMap<Arc<Key>, TransactionId>,
    /// Transaction to its staged commands, in staging order.
    commands: HashMap<TransactionId, Vec<Command>>,
}

enum StagedLookup {
    Put(ValueRef),
    Deleted,
}

/// One keyed collection multiplexed onto the shared stream pair.
pub(crate) struct PersistentDictionary {
    id: DictionaryId,
    source: SharedSource,
    index: RwLock<Index>,
    staging: Mutex<Staging>,
    waste: AtomicUsize,
    cache: ReadCache,
}

impl PersistentDictionary {
    pub(crate) fn new(id: DictionaryId, source: SharedSource, cache_capacity: usize) -> Self {
        Self {
            id,
            source,
            index: RwLock::new(Index::default()),
            staging: Mutex::new(Staging::default()),
            waste: AtomicUsize::new(0),
            cache: ReadCache::new(cache_capacity),
        }
    }

    /// Stages an upsert of `key` for `tx`, appending the framed value to
    /// the data stream. Returns `Ok(false)` without side effect when the
    /// key is staged by a different transaction.
    pub(crate) fn put(&self, tx: TransactionId, key: Arc<Key>, value: &[u8]) -> CoreResult<bool> {
        if value.len() > MAX_VALUE_LEN {
            return Err(CoreError::invalid_operation(
                "value too large for a length-prefixed frame",
            ));
        }
        if !self.try_claim(&key, tx) {
            return Ok(false);
        }

        let appended = {
            let mut source = self.source.lock();
            source.data_append(&frame(value))
        };
        let frame_offset = match appended {
            Ok(offset) => offset,
            Err(error) => {
                self.release_unstaged_claim(&key, tx);
                return Err(error.into());
            }
        };

        self.stage(
            tx,
            Command::Put {
                dictionary: self.id,
                key,
                offset: frame_offset + FRAME_HEADER,
                len: value.len() as u32,
            },
        );
        Ok(true)
    }

    /// Stages a removal of `key` for `tx`. Returns false without side
    /// effect when the key is staged by a different transaction.
    pub(crate) fn delete(&self, tx: TransactionId, key: Arc<Key>) -> bool {
        if !self.try_claim(&key, tx) {
            return false;
        }
        self.stage(
            tx,
            Command::Delete {
                dictionary: self.id,
                key,
            },
        );
        true
    }

    /// Reads `key` as seen by `tx`: staged writes first, then the
    /// committed index.
    ///
    /// A cache hit takes no lock. On a miss the source lock is acquired
    /// and the key is resolved again under it: a compaction may have
    /// moved the value to a fresh offset while this reader waited, and a
    /// location resolved under the lock cannot move until the lock is
    /// released.
    pub(crate) fn get(&self, tx: TransactionId, key: &Key) -> CoreResult<Option<Bytes>> {
        let generation = self.cache.generation();
        let Some(value_ref) = self.resolve(tx, key) else {
            return Ok(None);
        };
        if let Some(hit) = self.cache.get(generation, value_ref.offset) {
            return Ok(Some(hit));
        }

        let source = self.source.lock();
        let generation = self.cache.generation();
        let Some(value_ref) = self.resolve(tx, key) else {
            return Ok(None);
        };
        if let Some(hit) = self.cache.get(generation, value_ref.offset) {
            return Ok(Some(hit));
        }
        let bytes = read_frame(&**source, value_ref)?;
        // Inserted before the source lock drops so the entry cannot land
        // in a later stream generation.
        self.cache.insert(value_ref.offset, bytes.clone());
        Ok(Some(bytes))
    }

    /// Returns a copy of `tx`'s staged commands, in staging order.
    pub(crate) fn commands_to_commit(&self, tx: TransactionId) -> Vec<Command> {
        self.staging
            .lock()
            .commands
            .get(&tx)
            .cloned()
            .unwrap_or_default()
    }

    /// Merges `tx`'s staged commands into the committed index and clears
    /// its staging state. Called only after the batch is durably logged.
    pub(crate) fn complete_commit(&self, tx: TransactionId) {
        let commands = {
            let staging = self.staging.lock();
            match staging.commands.get(&tx) {
                Some(commands) => commands.clone(),
                None => return,
            }
        };
        self.apply(&commands);
        self.clear_transaction(tx);
    }

    /// Discards `tx`'s staged commands and key ownership. Blobs already
    /// appended for this transaction stay in the data stream as orphans
    /// until a compaction rewrites the stream without them.
    pub(crate) fn rollback(&self, tx: TransactionId) {
        self.clear_transaction(tx);
    }

    /// Applies already-committed commands directly to the index. Used by
    /// commit completion and by log replay, which bypasses staging.
    pub(crate) fn apply(&self, commands: &[Command]) {
        let mut index = self.index.write();
        for command in commands {
            match command {
                Command::Put {
                    key, offset, len, ..
                } => {
                    let replaced = index.upsert(
                        Arc::clone(key),
                        ValueRef {
                            offset: *offset,
                            len: *len,
                        },
                    );
                    if replaced {
                        self.waste.fetch_add(1, AtomicOrdering::Relaxed);
                    }
                }
                Command::Delete { key, .. } => {
                    index.remove(key);
                    self.waste.fetch_add(1, AtomicOrdering::Relaxed);
                }
            }
        }
    }

    /// Rewrites every committed blob into `temp` and returns the refreshed
    /// put commands. The caller merges the new offsets back only after the
    /// stream swap succeeds, so a failed compaction leaves the index
    /// pointing into the live stream.
    pub(crate) fn copy_committed_data(
        &self,
        source: &dyn PersistentSource,
        temp: &mut dyn TemporaryStream,
    ) -> CoreResult<Vec<Command>> {
        let index = self.index.read();
        let mut refreshed = Vec::with_capacity(index.by_key.len());
        for (key, value_ref) in &index.by_key {
            let bytes = read_frame(source, *value_ref)?;
            let frame_offset = temp.append(&frame(&bytes))?;
            refreshed.push(Command::Put {
                dictionary: self.id,
                key: Arc::clone(key),
                offset: frame_offset + FRAME_HEADER,
                len: value_ref.len,
            });
        }
        Ok(refreshed)
    }

    /// Rewrites every staged put's blob into `temp` and returns the full
    /// rewritten command list per transaction, staging order preserved.
    /// Deletes are carried over untouched.
    pub(crate) fn copy_staged_data(
        &self,
        source: &dyn PersistentSource,
        temp: &mut dyn TemporaryStream,
    ) -> CoreResult<Vec<(TransactionId, Vec<Command>)>> {
        let staging = self.staging.lock();
        let mut rewritten = Vec::with_capacity(staging.commands.len());
        for (tx, commands) in &staging.commands {
            let mut fresh = Vec::with_capacity(commands.len());
            for command in commands {
                match command {
                    Command::Put {
                        dictionary,
                        key,
                        offset,
                        len,
                    } => {
                        let bytes = read_frame(
                            source,
                            ValueRef {
                                offset: *offset,
                                len: *len,
                            },
                        )?;
                        let frame_offset = temp.append(&frame(&bytes))?;
                        fresh.push(Command::Put {
                            dictionary: *dictionary,
                            key: Arc::clone(key),
                            offset: frame_offset + FRAME_HEADER,
                            len: *len,
                        });
                    }
                    Command::Delete { .. } => fresh.push(command.clone()),
                }
            }
            rewritten.push((*tx, fresh));
        }
        Ok(rewritten)
    }

    /// Points committed entries at their rewritten offsets after a
    /// successful stream swap.
    pub(crate) fn merge_compacted(&self, refreshed: &[Command]) {
        let mut index = self.index.write();
        for command in refreshed {
            if let Command::Put {
                key, offset, len, ..
            } = command
            {
                if let Some(slot) = index.by_key.get_mut(key.as_ref()) {
                    *slot = ValueRef {
                        offset: *offset,
                        len: *len,
                    };
                }
            }
        }
    }

    /// Points still-staged puts at their rewritten offsets after a
    /// successful stream swap.
    ///
    /// Staging can move on while the rewrite runs: a transaction may
    /// stage further deletes (puts block on the source lock the caller
    /// holds) or roll back entirely. Each rewritten command overwrites
    /// its snapshot position only; commands staged since the snapshot
    /// keep their place, and a transaction that vanished stays gone.
    pub(crate) fn replace_staged(&self, rewritten: Vec<(TransactionId, Vec<Command>)>) {
        let mut staging = self.staging.lock();
        for (tx, fresh) in rewritten {
            if let Some(current) = staging.commands.get_mut(&tx) {
                for (slot, refreshed) in current.iter_mut().zip(fresh) {
                    *slot = refreshed;
                }
            }
        }
    }

    pub(crate) fn clear_cache(&self) {
        self.cache.clear();
    }

    pub(crate) fn reset_waste(&self) {
        self.waste.store(0, AtomicOrdering::Relaxed);
    }

    /// Number of committed entries.
    pub(crate) fn item_count(&self) -> usize {
        self.index.read().by_key.len()
    }

    /// Number of superseded or deleted entries still occupying data-stream
    /// bytes.
    pub(crate) fn waste_count(&self) -> usize {
        self.waste.load(AtomicOrdering::Relaxed)
    }

    /// Smallest committed key.
    pub(crate) fn first(&self) -> Option<Arc<Key>> {
        self.index.read().ordered.first().cloned()
    }

    /// Largest committed key.
    pub(crate) fn last(&self) -> Option<Arc<Key>> {
        self.index.read().ordered.last().cloned()
    }

    /// Committed keys at or above `bound`, in order. A partial object
    /// bound matches any key agreeing on the bound's fields.
    pub(crate) fn greater_than_or_equal(&self, bound: &Key) -> Vec<Arc<Key>> {
        let index = self.index.read();
        let start = index
            .ordered
            .partition_point(|stored| bound.cmp_structural(stored) == Ordering::Greater);
        index.ordered[start..].to_vec()
    }

    /// Claims `key` for `tx`. Fails when a different transaction already
    /// has it staged.
    fn try_claim(&self, key: &Arc<Key>, tx: TransactionId) -> bool {
        let mut staging = self.staging.lock();
        match staging.owners.get(key.as_ref()) {
            Some(owner) if *owner != tx => false,
            Some(_) => true,
            None => {
                staging.owners.insert(Arc::clone(key), tx);
                true
            }
        }
    }

    /// Undoes a claim whose data append failed before a command was
    /// staged. A claim backed by an earlier command of the same
    /// transaction stays.
    fn release_unstaged_claim(&self, key: &Key, tx: TransactionId) {
        let mut staging = self.staging.lock();
        let staged = staging
            .commands
            .get(&tx)
            .is_some_and(|commands| commands.iter().any(|command| command.key().as_ref() == key));
        if !staged {
            staging.owners.remove(key);
        }
    }

    fn stage(&self, tx: TransactionId, command: Command) {
        let mut staging = self.staging.lock();
        staging.commands.entry(tx).or_default().push(command);
    }

    /// Most recent staged command for `key`, if `tx` owns it.
    fn staged_lookup(&self, tx: TransactionId, key: &Key) -> Option<StagedLookup> {
        let staging = self.staging.lock();
        if staging.owners.get(key) != Some(&tx) {
            return None;
        }
        let commands = staging.commands.get(&tx)?;
        for command in commands.iter().rev() {
            if command.key().as_ref() == key {
                return Some(match command {
                    Command::Put { offset, len, .. } => StagedLookup::Put(ValueRef {
                        offset: *offset,
                        len: *len,
                    }),
                    Command::Delete { .. } => StagedLookup::Deleted,
                });
            }
        }
        None
    }

    /// Resolves `key` to its value location as seen by `tx`: the most
    /// recent staged command wins, then the committed index. A staged
    /// delete and an absent key both resolve to `None`.
    fn resolve(&self, tx: TransactionId, key: &Key) -> Option<ValueRef> {
        match self.staged_lookup(tx, key) {
            Some(StagedLookup::Put(value_ref)) => Some(value_ref),
            Some(StagedLookup::Deleted) => None,
            None => self.index.read().get(key),
        }
    }

    fn clear_transaction(&self, tx: TransactionId) {
        let mut staging = self.staging.lock();
        let Some(commands) = staging.commands.remove(&tx) else {
            return;
        };
        for command in &commands {
            staging.owners.remove(command.key().as_ref());
        }
    }
}

/// Builds the on-disk frame for a value: length prefix plus raw bytes.
fn frame(value: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(FRAME_HEADER as usize + value.len());
    framed.extend_from_slice(&(value.len() as u32).to_le_bytes());
    framed.extend_from_slice(value);
    framed
}

fn read_frame(source: &dyn PersistentSource, value_ref: ValueRef) -> CoreResult<Bytes> {
    match source.data_read(value_ref.offset, value_ref.len as usize) {
        Ok(bytes) => Ok(Bytes::from(bytes)),
        Err(StorageError::ReadPastEnd { .. }) => Err(CoreError::data_corruption(
            "could not read complete value, the data stream is corrupt",
        )),
        Err(error) => Err(error.into()),
    }
}
