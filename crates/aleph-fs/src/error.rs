// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    /// Rename crossed a filesystem boundary.  Atomic replacement is only
    /// guaranteed within one filesystem, so this is surfaced distinctly
    /// instead of being retried.
    #[error("atomic rename from {from} to {to} crosses filesystems")]
    CrossDevice { from: PathBuf, to: PathBuf },

    #[error("lock on {0} still contended after timeout")]
    LockContended(PathBuf),

    #[error("watch error on {path}: {message}")]
    Watch { path: PathBuf, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
