// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The agent registry and subagent spawner.
//!
//! Every live agent owns one JSON row under `<home>/registry/` and touches
//! its heartbeat every 30 seconds.  Peers reconcile the registry against
//! live PIDs; rows whose process is gone and whose heartbeat has aged out
//! are garbage-collected.  Subagents launch into their own tmux windows,
//! capped at a nesting depth of three by default.

mod record;
mod registry;
mod spawner;

pub use record::AgentRecord;
pub use registry::{spawn_heartbeat, Registry};
pub use spawner::{SpawnRequest, Spawner};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TeamError {
    #[error("subagent depth {depth} would exceed the maximum of {max}")]
    DepthExceeded { depth: usize, max: usize },

    #[error("no registry record for agent {0}")]
    UnknownAgent(String),

    #[error("registry record {path}: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("failed to launch multiplexer window: {0}")]
    Launch(String),

    #[error(transparent)]
    Fs(#[from] aleph_fs::FsError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Allocate a fresh agent id: `aleph-` + 8 hex chars.
pub fn allocate_agent_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("aleph-{}", &hex[..8])
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
