// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `false`, so fields
/// that should default on need a named function.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Home directory override.  Resolution order: this field, then the
    /// `ALEPH_HOME` environment variable, then `~/.aleph`.
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub board: BoardConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// What a tool invocation needs before it may run.
///
/// * `safe` — edit/bash/web require approval; reads run freely.
/// * `default` — edit/web require approval; bash and reads run freely.
/// * `yolo` — everything runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionMode {
    Safe,
    #[default]
    Default,
    Yolo,
}

impl std::fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PermissionMode::Safe => "safe",
            PermissionMode::Default => "default",
            PermissionMode::Yolo => "yolo",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for PermissionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "safe" => Ok(PermissionMode::Safe),
            "default" => Ok(PermissionMode::Default),
            "yolo" => Ok(PermissionMode::Yolo),
            other => Err(format!("unknown permission mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Permission mode new agents start in (overridable with `--mode`).
    #[serde(default)]
    pub mode: PermissionMode,
    /// Maximum subagent nesting depth.
    #[serde(default = "AgentConfig::default_max_depth")]
    pub max_depth: usize,
    /// Seconds between registry heartbeat touches.
    #[serde(default = "AgentConfig::default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// A registry row whose PID is dead and whose heartbeat is older than
    /// this is garbage-collected.
    #[serde(default = "AgentConfig::default_stale_after_secs")]
    pub stale_after_secs: u64,
    /// Whether to write a session summary on clean shutdown.
    #[serde(default = "default_true")]
    pub session_summary: bool,
}

impl AgentConfig {
    fn default_max_depth() -> usize {
        3
    }
    fn default_heartbeat_secs() -> u64 {
        30
    }
    fn default_stale_after_secs() -> u64 {
        300
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            mode: PermissionMode::default(),
            max_depth: Self::default_max_depth(),
            heartbeat_secs: Self::default_heartbeat_secs(),
            stale_after_secs: Self::default_stale_after_secs(),
            session_summary: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// Lines of channel history retained for late-joiner catch-up.
    #[serde(default = "MailConfig::default_history_retention")]
    pub history_retention: usize,
    /// Debounce window for inbox watch ticks, in milliseconds.
    #[serde(default = "MailConfig::default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,
    /// Unconditional inbox rescan interval, in seconds.
    #[serde(default = "MailConfig::default_rescan_secs")]
    pub rescan_secs: u64,
    #[serde(default)]
    pub prune: PruneConfig,
}

impl MailConfig {
    fn default_history_retention() -> usize {
        500
    }
    fn default_watch_debounce_ms() -> u64 {
        200
    }
    fn default_rescan_secs() -> u64 {
        2
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            history_retention: Self::default_history_retention(),
            watch_debounce_ms: Self::default_watch_debounce_ms(),
            rescan_secs: Self::default_rescan_secs(),
            prune: PruneConfig::default(),
        }
    }
}

/// Which read messages `prune` removes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruneConfig {
    /// Read messages older than this many days are deleted.
    #[serde(default = "PruneConfig::default_older_than_days")]
    pub older_than_days: u32,
    /// At most this many read messages are kept regardless of age.
    #[serde(default = "PruneConfig::default_max_count")]
    pub max_count: usize,
}

impl PruneConfig {
    fn default_older_than_days() -> u32 {
        14
    }
    fn default_max_count() -> usize {
        200
    }
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            older_than_days: Self::default_older_than_days(),
            max_count: Self::default_max_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardConfig {
    /// Task board file name, resolved relative to the project root.
    #[serde(default = "BoardConfig::default_file")]
    pub file: String,
}

impl BoardConfig {
    fn default_file() -> String {
        "TODO.yml".to_string()
    }
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            file: Self::default_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// The agent-runtime binary the harness wraps.
    #[serde(default = "RuntimeConfig::default_command")]
    pub command: String,
    /// Extra arguments passed to the runtime binary.
    #[serde(default)]
    pub args: Vec<String>,
    /// Seconds to wait for the end-of-session summary turn before giving
    /// up and writing the stub summary instead.
    #[serde(default = "RuntimeConfig::default_summary_timeout_secs")]
    pub summary_timeout_secs: u64,
}

impl RuntimeConfig {
    fn default_command() -> String {
        "agent-runtime".to_string()
    }
    fn default_summary_timeout_secs() -> u64 {
        60
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            command: Self::default_command(),
            args: Vec::new(),
            summary_timeout_secs: Self::default_summary_timeout_secs(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
