// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::trace;

use crate::FsError;

/// Tuning knobs for [`watch_dir`].
#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    /// Quiet period after a kernel event before a tick is delivered, so a
    /// burst of writes becomes one tick.
    pub debounce: Duration,
    /// Interval of the unconditional rescan tick.  Kernel notification is
    /// lossy under load; the rescan bounds how stale a consumer can get.
    pub rescan: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(200),
            rescan: Duration::from_secs(2),
        }
    }
}

/// Handle returned by [`watch_dir`].
///
/// The watcher delivers unit ticks, not event details: a tick means
/// "children of the directory may have changed, re-list it."  Ticks are
/// coalesced, lossy, and supplemented by a periodic rescan tick, so a
/// consumer that re-lists on every tick never misses state for long.
pub struct DirWatcher {
    rx: mpsc::UnboundedReceiver<()>,
    // Dropping the handle stops the kernel watch.
    _watcher: RecommendedWatcher,
    path: PathBuf,
}

impl DirWatcher {
    /// Wait for the next change tick.  Returns `None` if the internal
    /// sender side is gone (watcher thread shut down).
    pub async fn changed(&mut self) -> Option<()> {
        let tick = self.rx.recv().await?;
        // Coalesce whatever queued up behind the first tick.
        while self.rx.try_recv().is_ok() {}
        trace!(path = %self.path.display(), "watch tick");
        Some(tick)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Watch the children of `path` for creations, deletions, and renames.
///
/// The directory is created if missing (watching a nonexistent directory is
/// an error in the kernel API).  Implementation detail: kernel events via
/// the `notify` crate, debounced, merged with a periodic rescan tick per
/// `opts.rescan`.
pub fn watch_dir(path: &Path, opts: WatchOptions) -> Result<DirWatcher, FsError> {
    std::fs::create_dir_all(path)?;

    let (tx, rx) = mpsc::unbounded_channel::<()>();

    // Kernel events → debounced ticks.  The notify callback runs on its own
    // thread; an unbounded send never blocks it.
    let kernel_tx = tx.clone();
    let debounce = opts.debounce;
    let (raw_tx, raw_rx) = std::sync::mpsc::channel::<()>();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if res.is_ok() {
            let _ = raw_tx.send(());
        }
    })
    .map_err(|e| FsError::Watch {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    watcher
        .watch(path, RecursiveMode::NonRecursive)
        .map_err(|e| FsError::Watch {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    std::thread::spawn(move || {
        while raw_rx.recv().is_ok() {
            // Quiet period: swallow the burst, emit one tick.
            loop {
                match raw_rx.recv_timeout(debounce) {
                    Ok(()) => continue,
                    Err(std::sync::mpsc::RecvTimeoutError::Timeout) => break,
                    Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return,
                }
            }
            if kernel_tx.send(()).is_err() {
                return;
            }
        }
    });

    // Rescan tick: unconditional, keeps consumers honest after drops.
    let rescan_tx = tx;
    let rescan = opts.rescan;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(rescan);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if rescan_tx.send(()).is_err() {
                break;
            }
        }
    });

    Ok(DirWatcher {
        rx,
        _watcher: watcher,
        path: path.to_path_buf(),
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
