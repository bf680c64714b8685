// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use aleph_config::AlephHome;
use aleph_fs::atomic_write;

use crate::record::AgentRecord;
use crate::TeamError;

/// The registry of live agents: one JSON row per agent under
/// `<home>/registry/`.
///
/// Rows are single-writer (the owning process), readers lock-free.  A row
/// is stale — and gets pruned during [`list_alive`][Registry::list_alive]
/// — when its PID is dead **and** its heartbeat is older than
/// `stale_after`.  The double condition keeps a briefly wedged agent from
/// being reaped while its process still exists.
#[derive(Debug, Clone)]
pub struct Registry {
    home: AlephHome,
    stale_after: chrono::Duration,
}

impl Registry {
    pub fn new(home: AlephHome, stale_after: Duration) -> Self {
        Self {
            home,
            stale_after: chrono::Duration::from_std(stale_after)
                .unwrap_or_else(|_| chrono::Duration::seconds(300)),
        }
    }

    /// Write the caller's row.  Called once at startup and again on every
    /// heartbeat.
    pub fn announce(&self, record: &AgentRecord) -> Result<(), TeamError> {
        let text = serde_json::to_string_pretty(record).map_err(|e| TeamError::Malformed {
            path: self.record_path(&record.agent_id),
            message: e.to_string(),
        })?;
        atomic_write(&self.record_path(&record.agent_id), text.as_bytes())?;
        Ok(())
    }

    /// Refresh the caller's heartbeat timestamp.
    pub fn touch_heartbeat(&self, agent_id: &str) -> Result<(), TeamError> {
        let mut record = self.load(agent_id)?;
        record.last_heartbeat = Utc::now();
        self.announce(&record)
    }

    /// Remove the caller's row on clean shutdown.
    pub fn deregister(&self, agent_id: &str) -> Result<(), TeamError> {
        let path = self.record_path(agent_id);
        if path.is_file() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn load(&self, agent_id: &str) -> Result<AgentRecord, TeamError> {
        let path = self.record_path(agent_id);
        if !path.is_file() {
            return Err(TeamError::UnknownAgent(agent_id.to_string()));
        }
        let text = fs::read_to_string(&path)?;
        serde_json::from_str(&text).map_err(|e| TeamError::Malformed {
            path,
            message: e.to_string(),
        })
    }

    /// Scan the registry, prune stale and corrupt rows, and return the
    /// agents that are still live.
    pub fn list_alive(&self) -> Result<Vec<AgentRecord>, TeamError> {
        let dir = self.home.registry_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut alive = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let record: AgentRecord = match fs::read_to_string(&path)
                .map_err(TeamError::from)
                .and_then(|text| {
                    serde_json::from_str(&text).map_err(|e| TeamError::Malformed {
                        path: path.clone(),
                        message: e.to_string(),
                    })
                }) {
                Ok(r) => r,
                Err(e) => {
                    // Corrupt rows are removed; live agents re-announce on
                    // their next heartbeat, which rebuilds the registry.
                    warn!(path = %path.display(), error = %e, "removing corrupt registry row");
                    let _ = fs::remove_file(&path);
                    continue;
                }
            };

            let pid_ok = pid_alive(record.pid);
            let heartbeat_fresh = Utc::now() - record.last_heartbeat < self.stale_after;
            if pid_ok || heartbeat_fresh {
                alive.push(record);
            } else {
                debug!(agent_id = %record.agent_id, pid = record.pid, "pruning stale registry row");
                let _ = fs::remove_file(&path);
            }
        }
        alive.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        Ok(alive)
    }

    /// Send SIGTERM to the agent's process.  The inbox is left in place —
    /// ownership across restarts is ambiguous, so nothing mail-related is
    /// deleted here.
    pub fn kill(&self, agent_id: &str) -> Result<(), TeamError> {
        let record = self.load(agent_id)?;
        terminate(record.pid);
        Ok(())
    }

    fn record_path(&self, agent_id: &str) -> PathBuf {
        self.home.registry_dir().join(format!("{agent_id}.json"))
    }
}

/// Touch the registry heartbeat for `agent_id` every `interval` until the
/// returned handle is aborted.
pub fn spawn_heartbeat(
    registry: Arc<Registry>,
    agent_id: String,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // the announce at startup covers t=0
        loop {
            ticker.tick().await;
            if let Err(e) = registry.touch_heartbeat(&agent_id) {
                warn!(agent_id = %agent_id, error = %e, "heartbeat failed");
            }
        }
    })
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    // Signal 0 probes existence without delivering anything.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    // Without a liveness probe, fall back to heartbeat-only staleness.
    false
}

#[cfg(unix)]
fn terminate(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate(_pid: u32) {}

// ─── Unit tests ──────────────────────────────────────────────────────────────
