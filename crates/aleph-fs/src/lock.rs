// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs4::fs_std::FileExt;

use crate::FsError;

/// How long to sleep between acquisition attempts.  Lock holders do
/// millisecond-scale work, so a short fixed interval beats backoff here.
const RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// An advisory whole-file exclusive lock.
///
/// The lock is released when the guard is dropped, and by the OS when the
/// owning process exits regardless of state.  Advisory means every writer
/// must opt in; aleph's stores all funnel through these guards.
#[derive(Debug)]
pub struct ExclusiveLock {
    file: File,
    path: PathBuf,
}

impl ExclusiveLock {
    /// Acquire the lock on `path`, creating the file if needed.
    ///
    /// Retries until `timeout` has elapsed, then fails with
    /// [`FsError::LockContended`].
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, FsError> {
        let file = open_lock_file(path)?;
        let deadline = Instant::now() + timeout;
        loop {
            // Call through the trait: std::fs::File grew inherent locking
            // methods with different signatures, and inherent methods win.
            if FileExt::try_lock_exclusive(&file)? {
                return Ok(Self {
                    file,
                    path: path.to_path_buf(),
                });
            }
            if Instant::now() >= deadline {
                return Err(FsError::LockContended(path.to_path_buf()));
            }
            std::thread::sleep(RETRY_INTERVAL);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ExclusiveLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Shared flavour of [`ExclusiveLock`], for multi-reader sections such as
/// the channel subscriber fold during a broadcast.
#[derive(Debug)]
pub struct SharedLock {
    file: File,
    path: PathBuf,
}

impl SharedLock {
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, FsError> {
        let file = open_lock_file(path)?;
        let deadline = Instant::now() + timeout;
        loop {
            if FileExt::try_lock_shared(&file)? {
                return Ok(Self {
                    file,
                    path: path.to_path_buf(),
                });
            }
            if Instant::now() >= deadline {
                return Err(FsError::LockContended(path.to_path_buf()));
            }
            std::thread::sleep(RETRY_INTERVAL);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SharedLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn open_lock_file(path: &Path) -> Result<File, FsError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)?)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
