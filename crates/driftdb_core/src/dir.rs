//! Store directory management.
//!
//! This module handles the file system layout of a file-backed store:
//!
//! ```text
//! <store_path>/
//! ├─ STORE            # Latest committed image (snapshot + outbox)
//! └─ WRITE.LOCK       # Advisory lock held for the duration of a write
//! ```
//!
//! Any number of processes may read the directory. Writers serialize on
//! `WRITE.LOCK`, so exactly one process commits at a time.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

const STORE_FILE: &str = "STORE";
const STORE_TEMP: &str = "STORE.tmp";
const LOCK_FILE: &str = "WRITE.LOCK";

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A store directory on disk.
#[derive(Debug)]
pub(crate) struct StoreDir {
    path: PathBuf,
}

/// Exclusive cross-process writer lock. Released on drop.
#[derive(Debug)]
pub(crate) struct FileWriteLock {
    file: File,
}

impl Drop for FileWriteLock {
    fn drop(&mut self) {
        if let Err(error) = FileExt::unlock(&self.file) {
            tracing::warn!(%error, "failed to release store write lock");
        }
    }
}

impl StoreDir {
    /// Opens or creates a store directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - The path exists but is not a directory
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::configuration(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::configuration(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Returns the directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn image_path(&self) -> PathBuf {
        self.path.join(STORE_FILE)
    }

    /// Acquires the writer lock, waiting up to `timeout` (forever if `None`).
    pub fn lock_writer(&self, timeout: Option<Duration>) -> CoreResult<FileWriteLock> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.path.join(LOCK_FILE))?;

        match timeout {
            None => file.lock_exclusive()?,
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while file.try_lock_exclusive().is_err() {
                    if Instant::now() >= deadline {
                        return Err(CoreError::WriteLockTimeout);
                    }
                    thread::sleep(LOCK_POLL_INTERVAL);
                }
            }
        }
        Ok(FileWriteLock { file })
    }

    /// Reads the store image, or `None` for a fresh directory.
    pub fn read_image(&self) -> CoreResult<Option<Vec<u8>>> {
        let mut file = match File::open(self.image_path()) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        if data.is_empty() {
            return Ok(None);
        }
        Ok(Some(data))
    }

    /// Writes the store image atomically.
    ///
    /// Uses write-then-rename for crash safety:
    /// 1. Write to a temporary file
    /// 2. Sync the temporary file (if `sync`)
    /// 3. Rename it over STORE
    /// 4. Fsync the directory (if `sync`)
    pub fn write_image(&self, data: &[u8], sync: bool) -> CoreResult<()> {
        let temp_path = self.path.join(STORE_TEMP);

        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        if sync {
            file.sync_all()?;
        }
        drop(file);

        fs::rename(&temp_path, self.image_path())?;

        if sync {
            self.sync_directory()?;
        }
        Ok(())
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> CoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> CoreResult<()> {
        // NTFS journals metadata; directory handles cannot be fsynced.
        Ok(())
    }
}
