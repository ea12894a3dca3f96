//! Crash injection for durability tests.
//!
//! [`CrashSource`] wraps an in-memory source and can be told to "crash"
//! partway through a log append: a prefix of the record reaches the
//! stream, the rest is lost, and every later mutation fails. Tests then
//! rebuild a fresh source from the surviving bytes and drive recovery,
//! the same shape a real process death leaves behind.

use std::any::Any;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use silt_storage::{
    MemorySource, PersistentSource, StorageError, StorageResult, TemporaryStream,
};

/// Shared knobs controlling when a [`CrashSource`] dies.
#[derive(Debug)]
pub struct CrashControls {
    crash_after_log_bytes: AtomicUsize,
    log_bytes_written: AtomicUsize,
    fail_on_flush: AtomicBool,
    crashed: AtomicBool,
}

impl CrashControls {
    fn new() -> Self {
        Self {
            crash_after_log_bytes: AtomicUsize::new(usize::MAX),
            log_bytes_written: AtomicUsize::new(0),
            fail_on_flush: AtomicBool::new(false),
            crashed: AtomicBool::new(false),
        }
    }

    /// Crash once total log output would exceed `bytes`. The append that
    /// crosses the threshold is torn: its prefix reaches the stream.
    pub fn crash_after_log_bytes(&self, bytes: usize) {
        self.crash_after_log_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Makes every flush fail until turned off again. Unlike a crash
    /// this is transient; the next commit attempt may succeed.
    pub fn fail_on_flush(&self, fail: bool) {
        self.fail_on_flush.store(fail, Ordering::SeqCst);
    }

    /// True once a simulated crash has happened.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Total bytes successfully appended to the log so far.
    pub fn log_bytes_written(&self) -> usize {
        self.log_bytes_written.load(Ordering::SeqCst)
    }
}

/// An in-memory source that can crash mid-append.
pub struct CrashSource {
    inner: MemorySource,
    controls: Arc<CrashControls>,
}

impl CrashSource {
    /// Creates a crashable source and the controls driving it.
    pub fn new() -> (Self, Arc<CrashControls>) {
        let controls = Arc::new(CrashControls::new());
        let source = Self {
            inner: MemorySource::new(),
            controls: Arc::clone(&controls),
        };
        (source, controls)
    }

    /// Copies of the surviving data and log bytes, as a disk would hold
    /// them after the crash.
    pub fn snapshot(&self) -> (Vec<u8>, Vec<u8>) {
        self.inner.snapshot()
    }

    fn check_alive(&self) -> StorageResult<()> {
        if self.controls.crashed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    fn check_flush(&self) -> StorageResult<()> {
        self.check_alive()?;
        if self.controls.fail_on_flush.load(Ordering::SeqCst) {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                "simulated flush failure",
            )));
        }
        Ok(())
    }
}

impl PersistentSource for CrashSource {
    fn data_read(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.data_read(offset, len)
    }

    fn data_append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.check_alive()?;
        self.inner.data_append(data)
    }

    fn data_len(&self) -> StorageResult<u64> {
        self.inner.data_len()
    }

    fn flush_data(&mut self) -> StorageResult<()> {
        self.check_flush()?;
        self.inner.flush_data()
    }

    fn log_read(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.log_read(offset, len)
    }

    fn log_append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.check_alive()?;

        let crash_after = self.controls.crash_after_log_bytes.load(Ordering::SeqCst);
        let written = self.controls.log_bytes_written.load(Ordering::SeqCst);
        if written + data.len() > crash_after {
            let surviving = crash_after.saturating_sub(written);
            if surviving > 0 {
                self.inner.log_append(&data[..surviving])?;
            }
            self.controls
                .log_bytes_written
                .store(crash_after, Ordering::SeqCst);
            self.controls.crashed.store(true, Ordering::SeqCst);
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                "simulated crash during partial log write",
            )));
        }

        let offset = self.inner.log_append(data)?;
        self.controls
            .log_bytes_written
            .fetch_add(data.len(), Ordering::SeqCst);
        Ok(offset)
    }

    fn log_len(&self) -> StorageResult<u64> {
        self.inner.log_len()
    }

    fn log_truncate(&mut self, new_len: u64) -> StorageResult<()> {
        self.check_alive()?;
        self.inner.log_truncate(new_len)
    }

    fn flush_log(&mut self) -> StorageResult<()> {
        self.check_flush()?;
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
        self.check_alive()?;
        self.inner.replace_atomically(data, log)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
