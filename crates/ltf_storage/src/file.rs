//! File-based storage backend for persistent storage.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-based storage device.
///
/// The file is sized to the device capacity when created; reads of ranges
/// that were never written return zeroes.
///
/// # Durability
///
/// - `flush()` calls `File::flush()` to push data to the OS
/// - `sync()` calls `File::sync_all()` to ensure data is on disk
///
/// # Example
///
/// ```no_run
/// use ltf_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut device = FileBackend::create(Path::new("mirror0.ltf"), 1 << 20).unwrap();
/// device.write_at(4096, b"persistent data").unwrap();
/// device.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: Mutex<File>,
    capacity: u64,
}

impl FileBackend {
    /// Opens or creates a device file of exactly `capacity` bytes.
    ///
    /// An existing smaller file is extended with zeroes; an existing larger
    /// file keeps its contents but only `capacity` bytes are addressable.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, created or resized.
    pub fn create(path: &Path, capacity: u64) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if file.metadata()?.len() < capacity {
            file.set_len(capacity)?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            capacity,
        })
    }

    /// Opens an existing device file; its length is the capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let capacity = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            capacity,
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        if StorageError::out_of_bounds(offset, len, self.capacity) {
            return Err(StorageError::ReadPastEnd {
                offset,
                len,
                capacity: self.capacity,
            });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        if StorageError::out_of_bounds(offset, data.len(), self.capacity) {
            return Err(StorageError::WritePastEnd {
                offset,
                len: data.len(),
                capacity: self.capacity,
            });
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.lock().flush()?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        let mut file = self.file.lock();
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }
}
