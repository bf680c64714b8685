// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;

use serde_json::Value;
use similar::TextDiff;

/// Build a unified-diff preview of what an edit tool is about to do.
///
/// Understands the two common argument shapes:
/// * whole-file writes — a `content` (or `new_content`) string;
/// * search/replace edits — `old_string` + `new_string` applied to the
///   file's current content.
///
/// Returns `None` when the arguments carry no recognisable target path or
/// post-content; the arbiter then falls back to showing raw arguments.
pub fn edit_preview(arguments: &Value) -> Option<String> {
    let path = target_path(arguments)?;
    let current = std::fs::read_to_string(Path::new(&path)).unwrap_or_default();

    let proposed = if let Some(content) = string_arg(arguments, &["content", "new_content"]) {
        content
    } else if let (Some(old), Some(new)) = (
        string_arg(arguments, &["old_string", "old_str"]),
        string_arg(arguments, &["new_string", "new_str"]),
    ) {
        if !current.contains(&old) {
            // Nothing to anchor the replacement on; show intent verbatim.
            return Some(format!(
                "--- a/{path}\n+++ b/{path}\n(edit anchor not found in current file)\n-{old}\n+{new}\n"
            ));
        }
        current.replacen(&old, &new, 1)
    } else {
        return None;
    };

    let diff = TextDiff::from_lines(&current, &proposed);
    Some(
        diff.unified_diff()
            .context_radius(3)
            .header(&format!("a/{path}"), &format!("b/{path}"))
            .to_string(),
    )
}

/// The command text a bash-class call is about to run, for display.
pub fn command_preview(arguments: &Value) -> Option<String> {
    string_arg(arguments, &["command", "cmd", "script"])
}

fn target_path(arguments: &Value) -> Option<String> {
    string_arg(arguments, &["file_path", "path", "target_file"])
}

fn string_arg(arguments: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| arguments.get(k).and_then(|v| v.as_str()))
        .map(String::from)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
