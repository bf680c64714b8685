// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use tracing::debug;

/// Run `op` up to `attempts` times with a doubling delay between tries.
///
/// For transient I/O (disk pressure, contended locks, watch drops): the
/// caller surfaces the final error as a user-visible warning if every
/// attempt fails.  Not for programmer errors — those should fail fast.
pub fn with_retries<T, E: std::fmt::Display>(
    attempts: usize,
    base_delay: Duration,
    mut op: impl FnMut() -> Result<T, E>,
) -> Result<T, E> {
    let mut delay = base_delay;
    let mut last_try = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if last_try < attempts => {
                debug!(attempt = last_try, error = %e, "transient failure; retrying");
                std::thread::sleep(delay);
                delay *= 2;
                last_try += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
