// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

use crate::bus::HookOutcome;
use crate::event::{HookKind, Permission};

/// The JSON envelope handed back to the runtime after a hook dispatch.
///
/// Wire shape:
///
/// ```json
/// {"hookSpecificOutput": {"hookEventName": "PostToolUse",
///                         "additionalContext": "..."},
///  "permissionDecision": "allow" | "deny",
///  "reason": "..."}
/// ```
///
/// All fields are optional; a dispatch with nothing to say serialises to
/// `{}` exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookOutput {
    #[serde(rename = "hookSpecificOutput", skip_serializing_if = "Option::is_none")]
    pub hook_specific_output: Option<HookSpecificOutput>,
    #[serde(rename = "permissionDecision", skip_serializing_if = "Option::is_none")]
    pub permission_decision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookSpecificOutput {
    #[serde(rename = "hookEventName")]
    pub hook_event_name: String,
    #[serde(rename = "additionalContext", skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
}

impl HookOutput {
    /// Build the envelope for `kind` from an aggregated outcome.
    pub fn from_outcome(kind: HookKind, outcome: &HookOutcome) -> Self {
        let hook_specific_output = outcome.additional_context.as_ref().map(|ctx| {
            HookSpecificOutput {
                hook_event_name: kind.wire_name().to_string(),
                additional_context: Some(ctx.clone()),
            }
        });
        let permission_decision = match outcome.permission {
            Permission::Allow => Some("allow".to_string()),
            Permission::Deny => Some("deny".to_string()),
            Permission::Defer => None,
        };
        Self {
            hook_specific_output,
            permission_decision,
            reason: outcome.reason.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hook_specific_output.is_none()
            && self.permission_decision.is_none()
            && self.reason.is_none()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
