// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error};

use aleph_config::PermissionMode;
use aleph_hooks::{Hook, HookDecision, HookEvent};

use crate::classify::{ClassifierRegistry, ToolClass};
use crate::diff::{command_preview, edit_preview};

/// The tool-result string the agent sees when a call is refused.  Denial
/// is policy, not failure — it must read like a result, not a crash.
pub fn denial_message(reason: &str) -> String {
    format!("Tool denied by permission policy: {reason}")
}

/// The UI's answer to a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Allow,
    Deny { reason: String },
}

/// A pending approval, as displayed by the UI layer.
///
/// The arbiter is suspended on the embedded responder; exactly one
/// [`resolve`][Self::resolve] call (or dropping the request, which counts
/// as dismissal) wakes it.
#[derive(Debug)]
pub struct PermissionRequest {
    pub tool_name: String,
    pub arguments: Value,
    pub classification: ToolClass,
    /// Unified diff for edit tools, command text for bash tools.
    pub diff: Option<String>,
    responder: oneshot::Sender<Resolution>,
}

impl PermissionRequest {
    pub fn resolve(self, resolution: Resolution) {
        let _ = self.responder.send(resolution);
    }

    pub fn allow(self) {
        self.resolve(Resolution::Allow);
    }

    pub fn deny(self, reason: impl Into<String>) {
        self.resolve(Resolution::Deny {
            reason: reason.into(),
        });
    }
}

/// PreToolUse gate.  Classifies the call, consults the mode, and — when
/// approval is needed — publishes a [`PermissionRequest`] to the UI and
/// suspends until it is resolved or the turn is interrupted.
pub struct Arbiter {
    mode: Mutex<PermissionMode>,
    classifier: ClassifierRegistry,
    /// Single-slot by construction: the hook bus serialises PreToolUse per
    /// agent, so a second pending request is a programmer error.
    ui_tx: mpsc::Sender<PermissionRequest>,
    interrupt_tx: watch::Sender<bool>,
}

impl Arbiter {
    /// Returns the arbiter and the receiving end the UI layer consumes
    /// prompts from.
    pub fn new(
        mode: PermissionMode,
        classifier: ClassifierRegistry,
    ) -> (Arc<Self>, mpsc::Receiver<PermissionRequest>) {
        let (ui_tx, ui_rx) = mpsc::channel(1);
        let (interrupt_tx, _) = watch::channel(false);
        (
            Arc::new(Self {
                mode: Mutex::new(mode),
                classifier,
                ui_tx,
                interrupt_tx,
            }),
            ui_rx,
        )
    }

    pub fn mode(&self) -> PermissionMode {
        *self.mode.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_mode(&self, mode: PermissionMode) {
        *self.mode.lock().unwrap_or_else(|p| p.into_inner()) = mode;
    }

    /// Resolve any pending prompt as denied and poison new prompts until
    /// [`clear_interrupt`][Self::clear_interrupt].
    pub fn interrupt(&self) {
        let _ = self.interrupt_tx.send(true);
    }

    /// Called at the next user-turn boundary so prompting works again.
    pub fn clear_interrupt(&self) {
        let _ = self.interrupt_tx.send(false);
    }

    /// Gate one tool call.  Returns the decision the hook chain aggregates.
    pub async fn check(&self, tool_name: &str, arguments: &Value) -> HookDecision {
        let classification = self.classifier.classify(tool_name);
        let mode = self.mode();
        if !classification.requires_approval(mode) {
            debug!(tool_name, class = classification.as_str(), %mode, "auto-allowed");
            return HookDecision::allow();
        }

        let diff = match classification {
            ToolClass::Edit => edit_preview(arguments),
            ToolClass::Bash => command_preview(arguments).map(|c| format!("$ {c}")),
            _ => None,
        };

        let (responder, resolved) = oneshot::channel();
        let request = PermissionRequest {
            tool_name: tool_name.to_string(),
            arguments: arguments.clone(),
            classification,
            diff,
            responder,
        };

        match self.ui_tx.try_send(request) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                // Should be unreachable: the hook bus serialises per agent.
                error!(tool_name, "permission prompt already pending");
                return HookDecision::deny("a permission prompt is already pending");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                return HookDecision::deny("permission UI unavailable");
            }
        }

        let mut interrupted = self.interrupt_tx.subscribe();
        tokio::select! {
            res = resolved => match res {
                Ok(Resolution::Allow) => HookDecision::allow(),
                Ok(Resolution::Deny { reason }) => HookDecision::deny(reason),
                Err(_) => HookDecision::deny("permission prompt dismissed"),
            },
            _ = interrupted.wait_for(|v| *v) => HookDecision::deny("interrupted"),
        }
    }
}

/// [`Hook`] adapter: wires the arbiter into the PreToolUse chain.
pub struct PermissionHook {
    arbiter: Arc<Arbiter>,
}

impl PermissionHook {
    pub fn new(arbiter: Arc<Arbiter>) -> Self {
        Self { arbiter }
    }
}

#[async_trait]
impl Hook for PermissionHook {
    fn name(&self) -> &str {
        "permission-arbiter"
    }

    async fn run(&self, event: &HookEvent) -> anyhow::Result<HookDecision> {
        match event {
            HookEvent::PreToolUse {
                tool_name,
                arguments,
            } => Ok(self.arbiter.check(tool_name, arguments).await),
            _ => Ok(HookDecision::defer()),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
