// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use regex::Regex;

use aleph_config::PermissionMode;

/// Coarse classification of a tool call, derived from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolClass {
    /// File reads, listings, searches.
    Read,
    /// Mutating file tools.
    Edit,
    /// Shell execution.
    Bash,
    /// Outbound network fetches.
    Web,
    /// Anything else.
    Other,
}

impl ToolClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolClass::Read => "read",
            ToolClass::Edit => "edit",
            ToolClass::Bash => "bash",
            ToolClass::Web => "web",
            ToolClass::Other => "other",
        }
    }

    /// Whether this class needs a human decision under `mode`.
    pub fn requires_approval(&self, mode: PermissionMode) -> bool {
        match mode {
            PermissionMode::Yolo => false,
            PermissionMode::Default => matches!(self, ToolClass::Edit | ToolClass::Web),
            PermissionMode::Safe => {
                matches!(self, ToolClass::Edit | ToolClass::Bash | ToolClass::Web)
            }
        }
    }
}

/// Maps tool names to classes.  First matching rule wins; unmatched names
/// classify as [`ToolClass::Other`].  New tool types register entries —
/// classification is table-driven, never reflective.
#[derive(Debug)]
pub struct ClassifierRegistry {
    rules: Vec<(Regex, ToolClass)>,
}

impl ClassifierRegistry {
    /// Empty registry with no rules.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Register a glob pattern (`*` and `?` wildcards) for a class.
    /// Matching is case-insensitive: runtimes disagree on tool-name casing.
    pub fn register(&mut self, pattern: &str, class: ToolClass) {
        if let Some(re) = glob_to_regex(pattern) {
            self.rules.push((re, class));
        }
    }

    pub fn classify(&self, tool_name: &str) -> ToolClass {
        for (re, class) in &self.rules {
            if re.is_match(tool_name) {
                return *class;
            }
        }
        ToolClass::Other
    }
}

impl Default for ClassifierRegistry {
    /// Rules for the tool names the wrapped runtime ships with.
    fn default() -> Self {
        let mut reg = Self::empty();
        for pattern in ["read*", "list_dir", "ls", "glob*", "grep*", "search*", "cat"] {
            reg.register(pattern, ToolClass::Read);
        }
        for pattern in [
            "write*",
            "edit*",
            "apply_patch",
            "delete_file",
            "notebook_edit",
            "multi_edit",
        ] {
            reg.register(pattern, ToolClass::Edit);
        }
        for pattern in ["bash*", "shell", "run_terminal_command", "exec*"] {
            reg.register(pattern, ToolClass::Bash);
        }
        for pattern in ["web_fetch", "web_search", "fetch_url", "http*"] {
            reg.register(pattern, ToolClass::Web);
        }
        reg
    }
}

/// Convert a simple shell glob pattern to a case-insensitive [`Regex`].
/// Only `*` (match anything) and `?` (match one char) are supported.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^(?i)");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => {
                for esc in regex::escape(&c.to_string()).chars() {
                    re.push(esc);
                }
            }
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
