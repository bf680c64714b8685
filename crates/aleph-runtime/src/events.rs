// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event from the runtime's output stream.
///
/// Wire form is line-delimited JSON tagged by `type`, e.g.
/// `{"type":"tool_use_start","id":"t1","name":"Edit","arguments":{...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// A chunk of assistant text.
    TextDelta { text: String },
    /// A chunk of reasoning text.
    ThinkingDelta { text: String },
    /// The runtime is about to execute a tool; the harness gates it here.
    ToolUseStart {
        id: String,
        name: String,
        arguments: Value,
    },
    /// A tool finished; the harness may attach context to the result.
    ToolUseComplete {
        id: String,
        name: String,
        arguments: Value,
        result: String,
    },
    /// The turn is complete and the runtime awaits input.
    TurnEnd,
}

impl RuntimeEvent {
    pub fn is_turn_end(&self) -> bool {
        matches!(self, RuntimeEvent::TurnEnd)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
