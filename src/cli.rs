// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use aleph_config::PermissionMode;
use aleph_mail::Priority;

/// A persistent multi-agent personal-assistant harness.
///
/// Running `aleph` with no subcommand starts an interactive session: the
/// harness launches the wrapped agent runtime, joins the shared home
/// directory, and begins exchanging mail with its peers.
#[derive(Parser, Debug)]
#[command(name = "aleph", version, about)]
pub struct Cli {
    /// Agent id (allocated as aleph-<8-hex> when omitted).
    #[arg(long)]
    pub id: Option<String>,

    /// Initial prompt, delivered as the first user turn.
    #[arg(long)]
    pub prompt: Option<String>,

    /// Project directory this agent works in.
    #[arg(long)]
    pub project: Option<PathBuf>,

    /// Agent id of the spawning parent.
    #[arg(long)]
    pub parent: Option<String>,

    /// Subagent nesting depth of this process.
    #[arg(long, default_value_t = 0)]
    pub depth: usize,

    /// Permission mode for this session.
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Skip session summaries and persistent memory writes.
    #[arg(long)]
    pub ephemeral: bool,

    /// Run without an interactive input loop (spawned subagents).
    #[arg(long)]
    pub detach: bool,

    /// Explicit config file, merged over the discovered layers.
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Also log to stderr (logs always go to ~/.aleph/logs/).
    #[arg(long, short = 'v')]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send a message to an agent's inbox, or broadcast to a channel.
    ///
    /// Intended for user tool scripts (with ALEPH_AGENT_ID set) and for
    /// humans poking at the mail system.
    Send {
        /// Recipient agent id, or channel name with --channel.
        recipient: String,
        /// One-line summary (200 chars max).
        summary: String,
        /// Markdown body; the summary alone when omitted.
        #[arg(long)]
        body: Option<String>,
        /// Treat the recipient as a channel and broadcast.
        #[arg(long)]
        channel: bool,
        #[arg(long, value_enum, default_value_t = PriorityArg::Normal)]
        priority: PriorityArg,
        /// Sender id; defaults to ALEPH_AGENT_ID, then "user".
        #[arg(long)]
        from: Option<String>,
    },

    /// List unread messages in an inbox.
    Inbox {
        /// Agent id; defaults to ALEPH_AGENT_ID.
        #[arg(long)]
        agent: Option<String>,
    },

    /// List live agents from the registry (pruning stale rows).
    Agents,

    /// Operate on the project's task board (TODO.yml).
    Tasks {
        #[command(subcommand)]
        command: TasksCommands,
    },

    /// Print the effective merged configuration and exit.
    ShowConfig,
}

#[derive(Subcommand, Debug)]
pub enum TasksCommands {
    /// Print the board.
    List,
    /// Claim an open task.
    Claim {
        /// Dotted task id, e.g. "2.1".
        task_id: String,
        /// Claiming agent; defaults to ALEPH_AGENT_ID.
        #[arg(long)]
        agent: Option<String>,
    },
    /// Move a task along its lifecycle.
    Status {
        task_id: String,
        #[arg(value_enum)]
        status: StatusArg,
    },
    /// Give a claimed task back.
    Release {
        task_id: String,
        #[arg(long)]
        agent: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    InProgress,
    Done,
    Blocked,
}

impl From<StatusArg> for aleph_board::TaskStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::InProgress => aleph_board::TaskStatus::InProgress,
            StatusArg::Done => aleph_board::TaskStatus::Done,
            StatusArg::Blocked => aleph_board::TaskStatus::Blocked,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Safe,
    Default,
    Yolo,
}

impl From<ModeArg> for PermissionMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Safe => PermissionMode::Safe,
            ModeArg::Default => PermissionMode::Default,
            ModeArg::Yolo => PermissionMode::Yolo,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PriorityArg {
    Low,
    Normal,
    High,
}

impl From<PriorityArg> for Priority {
    fn from(arg: PriorityArg) -> Self {
        match arg {
            PriorityArg::Low => Priority::Low,
            PriorityArg::Normal => Priority::Normal,
            PriorityArg::High => Priority::High,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
