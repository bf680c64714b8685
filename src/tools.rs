// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! User tool scripts under `<home>/tools/`.
//!
//! Each script opens with a YAML frontmatter block describing itself; the
//! descriptions are substituted into `ALEPH.md` at the
//! `{{TOOL_DESCRIPTIONS}}` marker so the agent knows what is available.

use std::fs;
use std::path::Path;

use tracing::warn;

/// Frontmatter of one user tool script.
#[derive(Debug, Clone)]
pub struct UserTool {
    pub name: String,
    pub description: String,
    pub arguments: Option<String>,
}

/// Scan the tools directory.  Scripts without a parseable frontmatter
/// block are skipped with a warning, never fatal.
pub fn discover_user_tools(tools_dir: &Path) -> Vec<UserTool> {
    let mut tools = Vec::new();
    let Ok(entries) = fs::read_dir(tools_dir) else {
        return tools;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Ok(text) = fs::read_to_string(&path) else {
            continue;
        };
        match parse_tool_frontmatter(&text) {
            Some(tool) => tools.push(tool),
            None => warn!(path = %path.display(), "tool script has no usable frontmatter"),
        }
    }
    tools.sort_by(|a, b| a.name.cmp(&b.name));
    tools
}

/// Render the block substituted into the system prompt.
pub fn render_tool_descriptions(tools: &[UserTool]) -> String {
    if tools.is_empty() {
        return "(no user tools installed)".to_string();
    }
    tools
        .iter()
        .map(|t| match &t.arguments {
            Some(args) => format!("- {}: {} (arguments: {})", t.name, t.description, args),
            None => format!("- {}: {}", t.name, t.description),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Scripts open with a comment-tolerant frontmatter block:
///
/// ```text
/// #!/usr/bin/env bash
/// # ---
/// # name: remind
/// # description: schedule a reminder
/// # arguments: <when> <text>
/// # ---
/// ```
///
/// A bare `---` block (no comment prefix) also works for non-shell tools.
fn parse_tool_frontmatter(text: &str) -> Option<UserTool> {
    let mut in_block = false;
    let mut name = None;
    let mut description = None;
    let mut arguments = None;

    for line in text.lines().take(30) {
        let stripped = line.trim_start_matches('#').trim();
        if stripped == "---" {
            if in_block {
                break;
            }
            in_block = true;
            continue;
        }
        if !in_block {
            continue;
        }
        if let Some((key, value)) = stripped.split_once(':') {
            let value = value.trim().to_string();
            match key.trim() {
                "name" => name = Some(value),
                "description" => description = Some(value),
                "arguments" => arguments = Some(value),
                _ => {}
            }
        }
    }

    Some(UserTool {
        name: name?,
        description: description?,
        arguments,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
