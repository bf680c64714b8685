// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aleph_config::PermissionMode;

/// One registry row, stored as `registry/<agent_id>.json`.
///
/// The row is exclusively owned by the process it describes: only that
/// process writes it, peers only read (and garbage-collect once the
/// process is provably gone).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub depth: usize,
    pub project_path: String,
    pub mode: PermissionMode,
    #[serde(default)]
    pub ephemeral: bool,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl AgentRecord {
    /// A record for the calling process, heartbeat stamped now.
    pub fn for_current_process(
        agent_id: impl Into<String>,
        parent_id: Option<String>,
        depth: usize,
        project_path: impl Into<String>,
        mode: PermissionMode,
        ephemeral: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            agent_id: agent_id.into(),
            pid: std::process::id(),
            parent_id,
            depth,
            project_path: project_path.into(),
            mode,
            ephemeral,
            started_at: now,
            last_heartbeat: now,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
