//! In-memory persistent source for testing.

use std::any::Any;

use crate::error::{StorageError, StorageResult};
use crate::source::{PersistentSource, TemporaryStream};

/// An in-memory persistent source.
///
/// Both streams live in plain byte buffers, which makes this source suitable
/// for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral stores that do not need to survive the process
///
/// The buffers can be extracted with [`MemorySource::snapshot`] and fed back
/// through [`MemorySource::with_streams`] to simulate a process restart.
///
/// # Example
///
/// ```rust
/// use silt_storage::{MemorySource, PersistentSource};
///
/// let mut source = MemorySource::new();
/// let offset = source.data_append(b"test data").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(source.data_len().unwrap(), 9);
/// ```
#[derive(Debug, Default)]
pub struct MemorySource {
    data: Vec<u8>,
    log: Vec<u8>,
}

impl MemorySource {
    /// Creates a new source with empty data and log streams.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a source with pre-existing stream contents.
    ///
    /// Useful for testing recovery scenarios.
    #[must_use]
    pub fn with_streams(data: Vec<u8>, log: Vec<u8>) -> Self {
        Self { data, log }
    }

    /// Returns a copy of the `(data, log)` stream contents.
    #[must_use]
    pub fn snapshot(&self) -> (Vec<u8>, Vec<u8>) {
        (self.data.clone(), self.log.clone())
    }
}

fn read_from(stream: &[u8], offset: u64, len: usize) -> StorageResult<Vec<u8>> {
    let size = stream.len() as u64;
    let start = offset as usize;
    let end = start.saturating_add(len);

    if offset > size || end > stream.len() {
        return Err(StorageError::ReadPastEnd { offset, len, size });
    }

    Ok(stream[start..end].to_vec())
}

fn append_to(stream: &mut Vec<u8>, data: &[u8]) -> u64 {
    let offset = stream.len() as u64;
    stream.extend_from_slice(data);
    offset
}

impl PersistentSource for MemorySource {
    fn data_read(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        read_from(&self.data, offset, len)
    }

    fn data_append(&mut self, data: &[u8]) -> StorageResult<u64> {
        Ok(append_to(&mut self.data, data))
    }

    fn data_len(&self) -> StorageResult<u64> {
        Ok(self.data.len() as u64)
    }

    fn flush_data(&mut self) -> StorageResult<()> {
        // Memory streams have no pending writes
        Ok(())
    }

    fn log_read(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        read_from(&self.log, offset, len)
    }

    fn log_append(&mut self, data: &[u8]) -> StorageResult<u64> {
        Ok(append_to(&mut self.log, data))
    }

    fn log_len(&self) -> StorageResult<u64> {
        Ok(self.log.len() as u64)
    }

    fn log_truncate(&mut self, new_len: u64) -> StorageResult<()> {
        let current = self.log.len() as u64;
        if new_len > current {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate log to {} which is greater than current size {}",
                    new_len, current
                ),
            )));
        }

        self.log.truncate(new_len as usize);
        Ok(())
    }

    fn flush_log(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn create_temporary(&self) -> StorageResult<Box<dyn TemporaryStream>> {
        Ok(Box::new(MemoryTempStream::default()))
    }

    fn replace_atomically(
        &mut self,
        data: Box<dyn TemporaryStream>,
        log: Box<dyn TemporaryStream>,
    ) -> StorageResult<()> {
        let data = data
            .into_any()
            .downcast::<MemoryTempStream>()
            .map_err(|_| StorageError::TemporaryMismatch)?;
        let log = log
            .into_any()
            .downcast::<MemoryTempStream>()
            .map_err(|_| StorageError::TemporaryMismatch)?;

        self.data = data.bytes;
        self.log = log.bytes;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Default)]
struct MemoryTempStream {
    bytes: Vec<u8>,
}

impl TemporaryStream for MemoryTempStream {
    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        Ok(append_to(&mut self.bytes, data))
    }

    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}
