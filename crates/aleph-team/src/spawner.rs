// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use tracing::{debug, info};

use aleph_config::PermissionMode;

use crate::{allocate_agent_id, TeamError};

/// Everything a parent provides when launching a subagent.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// Explicit id; allocated (`aleph-<8-hex>`) when `None`.
    pub id: Option<String>,
    pub parent_id: Option<String>,
    /// First user-turn delivered by the launched process itself.
    pub prompt: String,
    pub project: PathBuf,
    pub mode: PermissionMode,
    pub ephemeral: bool,
    /// Nesting depth of the *new* agent (parent depth + 1).
    pub depth: usize,
}

/// Launches subagents into terminal-multiplexer windows.
///
/// The spawner only starts the process: the launched harness announces
/// itself to the registry and delivers its own initial prompt, so `spawn`
/// returns the id without waiting for readiness.
#[derive(Debug, Clone)]
pub struct Spawner {
    /// Path of the harness binary to launch (normally the current exe).
    harness_bin: PathBuf,
    max_depth: usize,
}

impl Spawner {
    pub fn new(harness_bin: PathBuf, max_depth: usize) -> Self {
        Self {
            harness_bin,
            max_depth,
        }
    }

    /// Spawner for the currently running binary.
    pub fn for_current_exe(max_depth: usize) -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, max_depth))
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Validate the depth cap, pick an id, and launch.  Returns the new
    /// agent's id immediately.
    pub async fn spawn(&self, request: SpawnRequest) -> Result<String, TeamError> {
        if request.depth >= self.max_depth {
            return Err(TeamError::DepthExceeded {
                depth: request.depth,
                max: self.max_depth,
            });
        }

        let agent_id = request.id.clone().unwrap_or_else(allocate_agent_id);
        let harness_args = self.harness_args(&agent_id, &request);

        // tmux joins trailing arguments with spaces before handing them to
        // a shell, so the command must be quoted into a single string.
        let shell_command = std::iter::once(self.harness_bin.to_string_lossy().into_owned())
            .chain(harness_args)
            .map(|a| shell_quote(&a))
            .collect::<Vec<_>>()
            .join(" ");

        let inside_tmux = std::env::var("TMUX").is_ok_and(|v| !v.is_empty());
        let mut cmd = tokio::process::Command::new("tmux");
        if inside_tmux {
            // New window in the current session, named after the agent.
            cmd.arg("new-window").args(["-d", "-n", &agent_id]);
        } else {
            // No multiplexer active: start a detached session of that name.
            cmd.arg("new-session").args(["-d", "-s", &agent_id]);
        }
        cmd.arg(&shell_command);

        debug!(agent_id = %agent_id, inside_tmux, "launching subagent window");
        let status = cmd
            .status()
            .await
            .map_err(|e| TeamError::Launch(e.to_string()))?;
        if !status.success() {
            return Err(TeamError::Launch(format!(
                "tmux exited with {status} for agent {agent_id}"
            )));
        }

        info!(agent_id = %agent_id, depth = request.depth, "subagent launched");
        Ok(agent_id)
    }

    /// CLI argv for the launched harness (minus the binary itself).
    fn harness_args(&self, agent_id: &str, request: &SpawnRequest) -> Vec<String> {
        let mut args = vec![
            "--id".to_string(),
            agent_id.to_string(),
            "--prompt".to_string(),
            request.prompt.clone(),
            "--project".to_string(),
            request.project.to_string_lossy().into_owned(),
            "--depth".to_string(),
            request.depth.to_string(),
            "--mode".to_string(),
            request.mode.to_string(),
        ];
        if let Some(parent) = &request.parent_id {
            args.push("--parent".to_string());
            args.push(parent.clone());
        }
        if request.ephemeral {
            args.push("--ephemeral".to_string());
        }
        args.push("--detach".to_string());
        args
    }
}

/// Single-quote an argument for the shell tmux runs the command with.
fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn request(depth: usize) -> SpawnRequest {
        SpawnRequest {
            id: None,
            parent_id: Some("aleph-parent".into()),
            prompt: "do the thing".into(),
            project: PathBuf::from("/proj"),
            mode: PermissionMode::Safe,
            ephemeral: true,
            depth,
        }
    }

    #[tokio::test]
    async fn depth_at_limit_is_refused_before_any_launch() {
        let spawner = Spawner::new(PathBuf::from("/nonexistent/aleph"), 3);
        let err = spawner.spawn(request(3)).await.unwrap_err();
        assert!(matches!(
            err,
            TeamError::DepthExceeded { depth: 3, max: 3 }
        ));
    }

    #[tokio::test]
    async fn depth_beyond_limit_is_refused() {
        let spawner = Spawner::new(PathBuf::from("/nonexistent/aleph"), 3);
        assert!(spawner.spawn(request(7)).await.is_err());
    }

    #[test]
    fn harness_args_carry_the_full_contract() {
        let spawner = Spawner::new(PathBuf::from("/bin/aleph"), 3);
        let args = spawner.harness_args("aleph-kid", &request(1));
        let joined = args.join(" ");
        assert!(joined.contains("--id aleph-kid"));
        assert!(joined.contains("--prompt do the thing"));
        assert!(joined.contains("--project /proj"));
        assert!(joined.contains("--depth 1"));
        assert!(joined.contains("--mode safe"));
        assert!(joined.contains("--parent aleph-parent"));
        assert!(joined.contains("--ephemeral"));
        assert!(joined.contains("--detach"));
    }

    #[test]
    fn shell_quote_passes_safe_args_and_wraps_the_rest() {
        assert_eq!(shell_quote("--depth"), "--depth");
        assert_eq!(shell_quote("/bin/aleph"), "/bin/aleph");
        assert_eq!(shell_quote("do the thing"), "'do the thing'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn non_ephemeral_request_omits_the_flag() {
        let spawner = Spawner::new(PathBuf::from("/bin/aleph"), 3);
        let mut req = request(1);
        req.ephemeral = false;
        req.parent_id = None;
        let args = spawner.harness_args("aleph-kid", &req);
        assert!(!args.contains(&"--ephemeral".to_string()));
        assert!(!args.contains(&"--parent".to_string()));
    }
}
