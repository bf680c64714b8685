// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

use crate::events::RuntimeEvent;

/// The events of one turn, ending with [`RuntimeEvent::TurnEnd`].
pub type EventStream = Pin<Box<dyn Stream<Item = Result<RuntimeEvent, RuntimeError>> + Send>>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime subprocess died and the one permitted reconnect also
    /// failed.  The caller writes an emergency handoff and exits non-zero.
    #[error("runtime lost: {0}")]
    Lost(String),

    #[error("runtime protocol error: {0}")]
    Protocol(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A conversational-agent runtime, viewed from the harness.
///
/// One `submit` call corresponds to one user turn; the returned stream
/// carries that turn's events and finishes after `TurnEnd`.  Synthetic
/// turns (idle wake-ups, session-end summary prompts) go through the same
/// `submit` — the runtime does not distinguish who typed.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver a user turn and stream the response events.
    async fn submit(&self, turn: &str) -> Result<EventStream, RuntimeError>;

    /// Hand a hook-output envelope back to the runtime (the answer to a
    /// `ToolUseStart` / `ToolUseComplete` event).
    async fn respond_hook(&self, output: serde_json::Value) -> Result<(), RuntimeError>;

    /// Stop generation of the current turn.
    async fn interrupt(&self) -> Result<(), RuntimeError>;

    /// Terminate the runtime.
    async fn shutdown(&self) -> Result<(), RuntimeError>;
}
