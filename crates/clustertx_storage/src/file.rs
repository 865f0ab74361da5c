//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A storage backend over one slot file.
///
/// The file length is the stored size; nothing is cached, so a file
/// rewritten by another handle is seen as it is on disk.
///
/// # Durability
///
/// - `flush()` pushes buffered data to the OS
/// - `sync()` calls `File::sync_all()` so contents and length are on disk
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileBackend {
    /// Opens a slot file, creating it empty if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    /// Opens an existing slot file for reading only.
    ///
    /// Nothing is created; writes through the returned backend fail with
    /// an I/O error.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    /// Returns the path of the slot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn len_of(file: &File) -> StorageResult<u64> {
        Ok(file.metadata()?.len())
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut file = self.file.lock();
        let size = Self::len_of(&file)?;
        if offset.saturating_add(len as u64) > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        let mut data = vec![0u8; len];
        if len > 0 {
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut data)?;
        }
        Ok(data)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let file = self.file.get_mut();
        let offset = file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(self.file.get_mut().flush()?)
    }

    fn size(&self) -> StorageResult<u64> {
        Self::len_of(&self.file.lock())
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(self.file.get_mut().sync_all()?)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let file = self.file.get_mut();
        let size = Self::len_of(file)?;
        if new_size > size {
            return Err(StorageError::TruncatePastEnd {
                requested: new_size,
                size,
            });
        }
        file.set_len(new_size)?;
        Ok(())
    }
}
