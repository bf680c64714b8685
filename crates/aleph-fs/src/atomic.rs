// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::FsError;

/// Write `bytes` to `path` such that concurrent readers see either the old
/// content or the new content, never a mix.
///
/// The data goes to a sibling temp file (`<name>.tmp.<pid>.<nonce>`), is
/// fsynced, and is then renamed over the target.  Rename is atomic on a
/// local filesystem; a rename that would cross filesystems fails with
/// [`FsError::CrossDevice`].
///
/// The parent directory is created on demand.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), FsError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    let tmp = parent.join(format!(
        "{file_name}.tmp.{}.{}",
        std::process::id(),
        &nonce[..8]
    ));

    let result = (|| -> Result<(), FsError> {
        let mut f = File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        drop(f);

        fs::rename(&tmp, path).map_err(|e| {
            if is_cross_device(&e) {
                FsError::CrossDevice {
                    from: tmp.clone(),
                    to: path.to_path_buf(),
                }
            } else {
                FsError::Io(e)
            }
        })
    })();

    if result.is_err() {
        // Leave no temp droppings behind on failure.
        let _ = fs::remove_file(&tmp);
    }
    result
}

#[cfg(unix)]
fn is_cross_device(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(libc::EXDEV)
}

#[cfg(not(unix))]
fn is_cross_device(_e: &std::io::Error) -> bool {
    // No portable errno for a cross-filesystem rename; callers see plain Io.
    false
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
