//! Offset-keyed cache of decoded value blobs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;

/// A bounded cache mapping data-stream offsets to value bytes.
///
/// Lookups never touch the source lock, which is what lets cache hits
/// bypass it entirely. When the cache reaches capacity it is cleared
/// wholesale rather than evicted entry by entry.
///
/// Offsets are only meaningful for one generation of the data stream, and
/// [`clear`](ReadCache::clear) starts a new generation whenever compaction
/// swaps in a fresh one. A lookup hands back the generation it observed
/// before resolving its offset; a hit from any other generation is
/// refused, since a numerically equal offset in a rewritten stream can
/// hold a different value.
#[derive(Debug)]
pub struct ReadCache {
    capacity: usize,
    generation: AtomicU64,
    entries: RwLock<HashMap<u64, Bytes>>,
}

impl ReadCache {
    /// Creates a cache holding at most `capacity` values.
    ///
    /// A capacity of zero disables caching entirely.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            generation: AtomicU64::new(0),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// The current stream generation. Read this before resolving an
    /// offset and pass it to [`get`](ReadCache::get).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Returns the cached value at `offset`, if present and `generation`
    /// is still current.
    pub fn get(&self, generation: u64, offset: u64) -> Option<Bytes> {
        let entries = self.entries.read();
        if self.generation.load(Ordering::SeqCst) != generation {
            return None;
        }
        entries.get(&offset).cloned()
    }

    /// Stores `value` under `offset`. The caller must hold the source
    /// lock, which pins the generation the offset belongs to.
    pub fn insert(&self, offset: u64, value: Bytes) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.write();
        if entries.len() >= self.capacity && !entries.contains_key(&offset) {
            // Capacity eviction stays within the generation: the stream
            // did not change, so surviving offsets remain valid.
            entries.clear();
        }
        entries.insert(offset, value);
    }

    /// Drops every cached entry and starts a new generation.
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        entries.clear();
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.read().len()
    }
}
