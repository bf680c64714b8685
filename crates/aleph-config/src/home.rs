// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use crate::Config;

/// Environment variable overriding the home directory location.
pub const ALEPH_HOME_ENV: &str = "ALEPH_HOME";
/// Set by the harness for its subprocesses; consumed by user tool scripts.
pub const ALEPH_AGENT_ID_ENV: &str = "ALEPH_AGENT_ID";
/// Legacy flag disabling the wrapped runtime's own memory system.  Must be
/// non-empty in the runtime subprocess environment — aleph owns memory.
pub const RUNTIME_MEMORY_DISABLE_ENV: &str = "AGENT_RUNTIME_DISABLE_MEMORY";

/// Marker in `ALEPH.md` replaced with the generated tool descriptions.
pub const TOOL_DESCRIPTIONS_MARKER: &str = "{{TOOL_DESCRIPTIONS}}";

const DEFAULT_SYSTEM_PROMPT: &str = "\
# Aleph

You are one agent in a shared household of assistants. Coordinate through
your inbox and channels; claim work from the task board before starting it.

{{TOOL_DESCRIPTIONS}}
";

/// The shared home directory (`~/.aleph` by default) every agent roots its
/// identity in.  All paths used by the stores come from here, so the
/// location is injected exactly once at startup.
#[derive(Debug, Clone)]
pub struct AlephHome {
    root: PathBuf,
}

impl AlephHome {
    /// Resolve the home directory: config override, then `ALEPH_HOME`,
    /// then `~/.aleph`.
    pub fn resolve(config: &Config) -> Self {
        let root = config
            .home
            .clone()
            .or_else(|| std::env::var(ALEPH_HOME_ENV).ok().filter(|v| !v.is_empty()))
            .map(|raw| PathBuf::from(shellexpand::tilde(&raw).into_owned()))
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".aleph")
            });
        Self { root }
    }

    /// Use an explicit root (tests, `--project`-local homes).
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn system_prompt_file(&self) -> PathBuf {
        self.root.join("ALEPH.md")
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.root.join("memory")
    }

    pub fn context_file(&self) -> PathBuf {
        self.memory_dir().join("context.md")
    }

    pub fn handoff_file(&self) -> PathBuf {
        self.memory_dir().join("handoff.md")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.memory_dir().join("sessions")
    }

    pub fn inbox_root(&self) -> PathBuf {
        self.root.join("inbox")
    }

    pub fn inbox_dir(&self, agent_id: &str) -> PathBuf {
        self.inbox_root().join(agent_id)
    }

    pub fn channels_root(&self) -> PathBuf {
        self.root.join("channels")
    }

    pub fn channel_dir(&self, name: &str) -> PathBuf {
        self.channels_root().join(name)
    }

    pub fn registry_dir(&self) -> PathBuf {
        self.root.join("registry")
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.root.join("tools")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join("scratch")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn quarantine_dir(&self) -> PathBuf {
        self.root.join("quarantine")
    }

    /// Create the directory layout and seed `ALEPH.md` (with the tool
    /// descriptions marker) plus the memory files when missing.  Idempotent.
    pub fn ensure_layout(&self) -> std::io::Result<()> {
        for dir in [
            self.root.clone(),
            self.memory_dir(),
            self.sessions_dir(),
            self.inbox_root(),
            self.channels_root(),
            self.registry_dir(),
            self.tools_dir(),
            self.scratch_dir(),
            self.logs_dir(),
            self.quarantine_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        let prompt = self.system_prompt_file();
        if !prompt.exists() {
            std::fs::write(&prompt, DEFAULT_SYSTEM_PROMPT)?;
        }
        for seed in ["context.md", "preferences.md", "patterns.md"] {
            let path = self.memory_dir().join(seed);
            if !path.exists() {
                std::fs::write(&path, "")?;
            }
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_override_wins() {
        let cfg = Config {
            home: Some("/tmp/aleph-test-home".into()),
            ..Config::default()
        };
        let home = AlephHome::resolve(&cfg);
        assert_eq!(home.root(), Path::new("/tmp/aleph-test-home"));
    }

    #[test]
    fn tilde_is_expanded() {
        let cfg = Config {
            home: Some("~/.aleph-alt".into()),
            ..Config::default()
        };
        let home = AlephHome::resolve(&cfg);
        assert!(!home.root().to_string_lossy().contains('~'));
        assert!(home.root().ends_with(".aleph-alt"));
    }

    #[test]
    fn ensure_layout_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let home = AlephHome::at(dir.path());
        home.ensure_layout().unwrap();
        home.ensure_layout().unwrap();
        assert!(home.inbox_root().is_dir());
        assert!(home.sessions_dir().is_dir());
        assert!(home.quarantine_dir().is_dir());
    }

    #[test]
    fn seeded_prompt_carries_tool_marker() {
        let dir = tempfile::tempdir().unwrap();
        let home = AlephHome::at(dir.path());
        home.ensure_layout().unwrap();
        let prompt = std::fs::read_to_string(home.system_prompt_file()).unwrap();
        assert!(prompt.contains(TOOL_DESCRIPTIONS_MARKER));
    }

    #[test]
    fn existing_prompt_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let home = AlephHome::at(dir.path());
        home.ensure_layout().unwrap();
        std::fs::write(home.system_prompt_file(), "custom").unwrap();
        home.ensure_layout().unwrap();
        assert_eq!(
            std::fs::read_to_string(home.system_prompt_file()).unwrap(),
            "custom"
        );
    }

    #[test]
    fn inbox_dir_is_per_agent() {
        let home = AlephHome::at("/x");
        assert_eq!(home.inbox_dir("aleph-abc"), Path::new("/x/inbox/aleph-abc"));
    }
}
