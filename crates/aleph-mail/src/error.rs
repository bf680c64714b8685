// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("malformed message file {path}: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("message summary exceeds {max} characters")]
    SummaryTooLong { max: usize },

    #[error("unknown priority: {0}")]
    UnknownPriority(String),

    #[error(transparent)]
    Fs(#[from] aleph_fs::FsError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
