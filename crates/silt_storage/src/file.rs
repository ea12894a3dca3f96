//! File-backed persistent source.
//!
//! Directory layout:
//!
//! ```text
//! <store>/
//! ├─ LOCK        # Advisory lock for single-writer access
//! ├─ data.silt   # Committed values
//! ├─ log.silt    # Commit records
//! └─ tmp-*.silt  # In-flight compaction output
//! ```
//!
//! The LOCK file ensures only one process can write to the store at a time.

use std::any::Any;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::source::{PersistentSource, TemporaryStream};

const LOCK_FILE: &str = "LOCK";
const DATA_FILE: &str = "data.silt";
const LOG_FILE: &str = "log.silt";
const TEMP_PREFIX: &str = "tmp-";

/// A file-backed persistent source.
///
/// Each stream lives in its own file under the store directory, and data
/// survives process restarts.
///
/// # Durability
///
/// - `flush_data` / `flush_log` call `File::sync_all`, so a successful
///   flush means the bytes are on disk
/// - `replace_atomically` syncs the temporaries, renames them over the live
///   files, and fsyncs the directory
///
/// # Example
///
/// ```no_run
/// use silt_storage::{FileSource, PersistentSource};
/// use std::path::Path;
///
/// let mut source = FileSource::open(Path::new("/var/lib/myapp/store")).unwrap();
/// let offset = source.data_append(b"persistent data").unwrap();
/// source.flush_data().unwrap();
/// ```
#[derive(Debug)]
pub struct FileSource {
    dir: PathBuf,
    _lock: File,
    data: FileStream,
    log: FileStream,
}

impl FileSource {
    /// Opens a store directory, creating it if it does not exist.
    ///
    /// Acquires an exclusive advisory lock on the directory and sweeps any
    /// temporary files left behind by an interrupted compaction.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another process holds the lock,
    /// or an I/O error if the directory or files cannot be opened.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;

        let lock_path = dir.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        // Non-blocking: a held lock means another live process owns the store
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(dir.display().to_string()));
        }

        remove_stale_temporaries(dir)?;

        let data = FileStream::open(&dir.join(DATA_FILE))?;
        let log = FileStream::open(&dir.join(LOG_FILE))?;

        Ok(Self {
            dir: dir.to_path_buf(),
            _lock: lock_file,
            data,
            log,
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl PersistentSource for FileSource {
    fn data_read(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.data.read_at(offset, len)
    }

    fn data_append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.data.append(data)
    }

    fn data_len(&self) -> StorageResult<u64> {
        Ok(self.data.len())
    }

    fn flush_data(&mut self) -> StorageResult<()> {
        self.data.sync()
    }

    fn log_read(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.log.read_at(offset, len)
    }

    fn log_append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.log.append(data)
    }

    fn log_len(&self) -> StorageResult<u64> {
        Ok(self.log.len())
    }

    fn log_truncate(&mut self, new_len: u64) -> StorageResult<()> {
        self.log.truncate(new_len)
    }

    fn flush_log(&mut self) -> StorageResult<()> {
        self.log.sync()
    }

    fn create_temporary(&self) -> StorageResult<Box<dyn TemporaryStream>> {
        let path = self
            .dir
            .join(format!("{}{}.silt", TEMP_PREFIX, Uuid::new_v4()));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        Ok(Box::new(FileTempStream {
            path,
            file,
            size: 0,
        }))
    }

    fn replace_atomically(
        &mut self,
        data: Box<dyn TemporaryStream>,
        log: Box<dyn TemporaryStream>,
    ) -> StorageResult<()> {
        let data = data
            .into_any()
            .downcast::<FileTempStream>()
            .map_err(|_| StorageError::TemporaryMismatch)?;
        let log = log
            .into_any()
            .downcast::<FileTempStream>()
            .map_err(|_| StorageError::TemporaryMismatch)?;

        // Both temps hit disk before either rename, so a completed swap
        // never exposes unsynced bytes.
        let FileTempStream {
            path: data_path,
            file: data_file,
            ..
        } = *data;
        data_file.sync_all()?;
        drop(data_file);

        let FileTempStream {
            path: log_path,
            file: log_file,
            ..
        } = *log;
        log_file.sync_all()?;
        drop(log_file);

        fs::rename(&data_path, self.dir.join(DATA_FILE))?;
        fs::rename(&log_path, self.dir.join(LOG_FILE))?;
        sync_directory(&self.dir)?;

        self.data = FileStream::open(&self.dir.join(DATA_FILE))?;
        self.log = FileStream::open(&self.dir.join(LOG_FILE))?;

        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// One append-only stream backed by a file.
#[derive(Debug)]
struct FileStream {
    file: RwLock<File>,
    size: RwLock<u64>,
}

impl FileStream {
    fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let size = file.metadata()?.len();

        Ok(Self {
            file: RwLock::new(file),
            size: RwLock::new(size),
        })
    }

    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn append(&self, data: &[u8]) -> StorageResult<u64> {
        if data.is_empty() {
            return Ok(*self.size.read());
        }

        let mut file = self.file.write();
        let mut size = self.size.write();

        let offset = *size;
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        *size += data.len() as u64;

        Ok(offset)
    }

    fn len(&self) -> u64 {
        *self.size.read()
    }

    fn sync(&self) -> StorageResult<()> {
        let file = self.file.write();
        file.sync_all()?;
        Ok(())
    }

    fn truncate(&self, new_len: u64) -> StorageResult<()> {
        let file = self.file.write();
        let mut size = self.size.write();

        if new_len > *size {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate to {} which is greater than current size {}",
                    new_len, *size
                ),
            )));
        }

        file.set_len(new_len)?;
        file.sync_all()?;
        *size = new_len;

        Ok(())
    }
}

#[derive(Debug)]
struct FileTempStream {
    path: PathBuf,
    file: File,
    size: u64,
}

impl TemporaryStream for FileTempStream {
    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.size;
        self.file.write_all(data)?;
        self.size += data.len() as u64;
        Ok(offset)
    }

    fn len(&self) -> u64 {
        self.size
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.flush()?;
        Ok(())
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

fn remove_stale_temporaries(dir: &Path) -> StorageResult<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

/// Fsyncs the store directory so renames survive a crash.
///
/// Windows NTFS journals metadata on its own, so the explicit fsync is
/// Unix-only.
#[cfg(unix)]
fn sync_directory(dir: &Path) -> StorageResult<()> {
    let handle = File::open(dir)?;
    handle.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> StorageResult<()> {
    Ok(())
}
