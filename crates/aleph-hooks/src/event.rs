// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::Value;

/// Events fired by the harness around the runtime's tool loop and session
/// boundaries.
#[derive(Debug, Clone)]
pub enum HookEvent {
    /// About to execute a tool.  Handlers may veto it.
    PreToolUse { tool_name: String, arguments: Value },
    /// A tool finished.  Handlers may attach context to its result.
    PostToolUse {
        tool_name: String,
        arguments: Value,
        result: String,
    },
    /// A new session is starting.
    SessionStart,
    /// The turn is about to end.  A handler may force the agent to
    /// continue (used to drain unread mail before going idle).
    Stop,
}

impl HookEvent {
    pub fn kind(&self) -> HookKind {
        match self {
            HookEvent::PreToolUse { .. } => HookKind::PreToolUse,
            HookEvent::PostToolUse { .. } => HookKind::PostToolUse,
            HookEvent::SessionStart => HookKind::SessionStart,
            HookEvent::Stop => HookKind::Stop,
        }
    }
}

/// Event names handlers register against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    PreToolUse,
    PostToolUse,
    SessionStart,
    Stop,
}

impl HookKind {
    /// Wire name used in the hook output envelope.
    pub fn wire_name(&self) -> &'static str {
        match self {
            HookKind::PreToolUse => "PreToolUse",
            HookKind::PostToolUse => "PostToolUse",
            HookKind::SessionStart => "SessionStart",
            HookKind::Stop => "Stop",
        }
    }
}

/// A handler's verdict on the event.  `Defer` is transparent: the chain
/// treats the handler as having no opinion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Permission {
    Allow,
    Deny,
    #[default]
    Defer,
}

/// What one handler returns.  Denial is an ordinary value here — the bus
/// interprets it without unwinding, so a deny never aborts the handlers
/// that follow (they still run for their side effects and context).
#[derive(Debug, Clone, Default)]
pub struct HookDecision {
    pub additional_context: Option<String>,
    pub permission: Permission,
    /// Human-readable reason accompanying an allow/deny.
    pub message: Option<String>,
    /// Stop-event only: ask the agent loop to run another turn instead of
    /// going idle.
    pub force_continue: bool,
}

impl HookDecision {
    /// No opinion, no context.
    pub fn defer() -> Self {
        Self::default()
    }

    pub fn allow() -> Self {
        Self {
            permission: Permission::Allow,
            ..Self::default()
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            permission: Permission::Deny,
            message: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn with_context(context: impl Into<String>) -> Self {
        Self {
            additional_context: Some(context.into()),
            ..Self::default()
        }
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.additional_context = Some(context.into());
        self
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
