//! Persistent source trait definitions.

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::StorageResult;

/// A low-level persistent source for the Silt engine.
///
/// A source is a **pair of opaque byte streams**: a data stream holding
/// committed values and a log stream holding commit records. Both streams are
/// append-only; the engine owns all format interpretation, and sources do not
/// understand commit batches, length prefixes, or keys.
///
/// # Invariants
///
/// - `data_append` / `log_append` return the offset where the payload starts
/// - `data_read` / `log_read` return exactly the bytes previously written there
/// - `flush_data` / `flush_log` make all previously appended bytes durable
/// - `replace_atomically` installs a new stream pair as a single unit
///
/// # Implementors
///
/// - [`super::MemorySource`] - For testing and ephemeral stores
/// - [`super::FileSource`] - For persistent on-disk storage
pub trait PersistentSource: Send {
    /// Reads `len` bytes from the data stream starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range extends beyond the current data size
    /// or an I/O error occurs.
    fn data_read(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends bytes to the data stream, returning the offset written to.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn data_append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Returns the current size of the data stream in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn data_len(&self) -> StorageResult<u64>;

    /// Flushes the data stream to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush_data(&mut self) -> StorageResult<()>;

    /// Reads `len` bytes from the log stream starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range extends beyond the current log size
    /// or an I/O error occurs.
    fn log_read(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends bytes to the log stream, returning the offset written to.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn log_append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Returns the current size of the log stream in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn log_len(&self) -> StorageResult<u64>;

    /// Truncates the log stream to `new_len` bytes.
    ///
    /// Recovery uses this to discard a torn tail after a crash.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_len` is greater than the current log size
    /// or the truncation fails.
    fn log_truncate(&mut self, new_len: u64) -> StorageResult<()>;

    /// Flushes the log stream to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush_log(&mut self) -> StorageResult<()>;

    /// Creates an empty temporary stream tied to this source.
    ///
    /// Compaction writes the surviving data into temporaries and then hands
    /// them back through [`PersistentSource::replace_atomically`].
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary cannot be created.
    fn create_temporary(&self) -> StorageResult<Box<dyn TemporaryStream>>;

    /// Replaces the live stream pair with the given temporaries as one unit.
    ///
    /// After this returns successfully, reads observe the new streams and the
    /// old contents are gone. A failure leaves the previous pair intact.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TemporaryMismatch`] if a temporary was
    /// not created by this source, or an I/O error if the swap fails.
    fn replace_atomically(
        &mut self,
        data: Box<dyn TemporaryStream>,
        log: Box<dyn TemporaryStream>,
    ) -> StorageResult<()>;

    /// Returns the source as [`Any`], so callers holding a boxed source can
    /// downcast back to the concrete type.
    fn as_any(&self) -> &dyn Any;
}

/// An append-only scratch stream produced by [`PersistentSource::create_temporary`].
pub trait TemporaryStream: Send {
    /// Appends bytes to the stream, returning the offset written to.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Returns the current size of the stream in bytes.
    fn len(&self) -> u64;

    /// Returns `true` if nothing has been appended yet.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flushes buffered bytes down to the underlying medium.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Converts the stream into [`Any`] so the owning source can recover
    /// its concrete type during [`PersistentSource::replace_atomically`].
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

/// A persistent source behind the engine's single coarse lock.
///
/// All mutation of a source goes through this mutex. Holding the guard across
/// a whole commit or compaction is what makes those multi-step operations
/// atomic with respect to each other.
pub type SharedSource = Arc<Mutex<Box<dyn PersistentSource>>>;

/// Wraps a source in the shared handle the engine operates on.
pub fn shared(source: impl PersistentSource + 'static) -> SharedSource {
    Arc::new(Mutex::new(Box::new(source)))
}
