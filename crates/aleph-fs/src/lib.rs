// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Filesystem primitives shared by every aleph subsystem.
//!
//! Everything in the coordination fabric — inboxes, channels, the task
//! board, the agent registry — is plain files under the aleph home
//! directory, written by many processes at once.  This crate provides the
//! four building blocks that make that safe:
//!
//! * [`atomic_write`] — tmp-file + fsync + rename, so readers never see a
//!   torn file.
//! * [`ExclusiveLock`] / [`SharedLock`] — advisory whole-file locks with a
//!   bounded acquisition timeout.  The OS drops them when the process dies.
//! * [`watch_dir`] — a "something changed, go look" notification source.
//! * [`ulid`] — lexicographically sortable message ids.

mod atomic;
mod error;
mod lock;
mod retry;
mod ulid;
mod watch;

pub use atomic::atomic_write;
pub use error::FsError;
pub use lock::{ExclusiveLock, SharedLock};
pub use retry::with_retries;
pub use ulid::ulid;
pub use watch::{watch_dir, DirWatcher, WatchOptions};
