// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// Events emitted by the harness during a turn.  The UI layer subscribes
/// to drive its output; nothing here is consumed by the coordination
/// fabric itself.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A text chunk streamed from the runtime.
    TextDelta(String),
    /// A reasoning chunk from the runtime.
    ThinkingDelta(String),
    /// The runtime started a tool call (already past the PreToolUse gate).
    ToolStarted { id: String, name: String },
    /// A tool call finished.  `denied` marks results synthesised from a
    /// permission denial rather than actual execution.
    ToolFinished {
        id: String,
        name: String,
        result: String,
        denied: bool,
    },
    /// A synthetic user-turn was injected (mail wake-up, stop drain).
    TurnInjected(String),
    /// The current turn completed; the agent is idle.
    TurnComplete,
    /// A recoverable error the user should see in the banner.
    Error(String),
}
