// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, info, warn};

use aleph_config::{AlephHome, TOOL_DESCRIPTIONS_MARKER};
use aleph_runtime::RuntimeClient;
use aleph_team::AgentRecord;

/// Startup context assembly and end-of-session duties for one agent.
#[derive(Debug, Clone)]
pub struct SessionLifecycle {
    home: AlephHome,
    agent_id: String,
    ephemeral: bool,
}

impl SessionLifecycle {
    pub fn new(home: AlephHome, agent_id: impl Into<String>, ephemeral: bool) -> Self {
        Self {
            home,
            agent_id: agent_id.into(),
            ephemeral,
        }
    }

    /// The system-prompt body: `ALEPH.md` with the tool-descriptions
    /// marker substituted.
    pub fn system_prompt(&self, tool_descriptions: &str) -> anyhow::Result<String> {
        let raw = fs::read_to_string(self.home.system_prompt_file())
            .with_context(|| "reading ALEPH.md")?;
        Ok(raw.replace(TOOL_DESCRIPTIONS_MARKER, tool_descriptions))
    }

    /// Context prepended to the first turn: the handoff document (consumed
    /// and deleted), a recap of the most recent session summary, and the
    /// long-lived `memory/context.md`.
    pub fn startup_context(&self) -> anyhow::Result<String> {
        let mut sections: Vec<String> = Vec::new();

        // Handoff: single-writer (the agent that ended), single-reader
        // (this one).  The reader deletes after consuming.
        let handoff_path = self.home.handoff_file();
        if handoff_path.is_file() {
            let handoff = fs::read_to_string(&handoff_path)
                .with_context(|| "reading handoff document")?;
            if !handoff.trim().is_empty() {
                sections.push(format!("## Handoff from the previous session\n\n{handoff}"));
            }
            fs::remove_file(&handoff_path).with_context(|| "consuming handoff document")?;
            info!(agent_id = %self.agent_id, "consumed handoff document");
        }

        if let Some((name, recap)) = self.latest_session_summary()? {
            sections.push(format!("## Most recent session ({name})\n\n{recap}"));
        }

        let context_path = self.home.context_file();
        if context_path.is_file() {
            let context = fs::read_to_string(&context_path)?;
            if !context.trim().is_empty() {
                sections.push(format!("## Standing context\n\n{context}"));
            }
        }

        Ok(sections.join("\n\n"))
    }

    /// End of session.  Non-ephemeral agents get one synthetic turn asking
    /// for a written summary; if that turn fails or times out, a stub
    /// summary is written from registry metadata instead.  Best-effort by
    /// design — shutdown is never blocked longer than the one turn.
    pub async fn finish(
        &self,
        client: &Arc<dyn RuntimeClient>,
        record: &AgentRecord,
        timeout: Duration,
    ) {
        if self.ephemeral {
            debug!(agent_id = %self.agent_id, "ephemeral session; skipping summary");
            return;
        }

        let summary_path = self.summary_path();
        let prompt = format!(
            "The session is ending. Write a short summary of what happened and \
             any follow-ups to {} using your file tools, then stop.",
            summary_path.display()
        );

        let turn = async {
            let mut stream = client.submit(&prompt).await?;
            while let Some(event) = stream.next().await {
                event?;
            }
            Ok::<_, anyhow::Error>(())
        };

        let turn_ok = matches!(
            tokio::time::timeout(timeout, turn).await,
            Ok(Ok(()))
        );
        if !turn_ok || !summary_path.is_file() {
            warn!(agent_id = %self.agent_id, "summary turn failed; writing stub");
            if let Err(e) = self.write_stub_summary(record) {
                warn!(error = %e, "stub summary write failed");
            }
        }

        self.auto_commit().await;
    }

    /// Fallback summary synthesised from registry metadata.
    pub fn write_stub_summary(&self, record: &AgentRecord) -> anyhow::Result<PathBuf> {
        let path = self.summary_path();
        let body = format!(
            "# Session {id}\n\n\
             (stub — the agent could not write its own summary)\n\n\
             - started: {started}\n\
             - ended: {ended}\n\
             - project: {project}\n\
             - mode: {mode}\n\
             - parent: {parent}\n",
            id = self.agent_id,
            started = record.started_at.to_rfc3339(),
            ended = Utc::now().to_rfc3339(),
            project = record.project_path,
            mode = record.mode,
            parent = record.parent_id.as_deref().unwrap_or("none"),
        );
        aleph_fs::atomic_write(&path, body.as_bytes())?;
        Ok(path)
    }

    /// Leave a handoff for whoever starts next, used when the runtime is
    /// lost mid-session.
    pub fn write_emergency_handoff(&self, note: &str) -> anyhow::Result<()> {
        let body = format!(
            "# Emergency handoff from {id}\n\n{note}\n\n(written {at})\n",
            id = self.agent_id,
            at = Utc::now().to_rfc3339(),
        );
        aleph_fs::atomic_write(&self.home.handoff_file(), body.as_bytes())?;
        Ok(())
    }

    fn summary_path(&self) -> PathBuf {
        self.home.sessions_dir().join(format!(
            "{}-{}.md",
            Utc::now().format("%Y-%m-%d"),
            self.agent_id
        ))
    }

    /// Newest file in `memory/sessions/` by name; ids sort after the date
    /// prefix, so lexicographic max is the most recent session.
    fn latest_session_summary(&self) -> anyhow::Result<Option<(String, String)>> {
        let dir = self.home.sessions_dir();
        if !dir.is_dir() {
            return Ok(None);
        }
        let mut names: Vec<String> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        let Some(name) = names.pop() else {
            return Ok(None);
        };
        let recap = fs::read_to_string(dir.join(&name))?;
        Ok(Some((name, recap)))
    }

    /// Commit whatever changed under the home directory to its local
    /// repository.  Never pushes; failures (no git, no repo, nothing to
    /// commit) are logged and ignored.
    async fn auto_commit(&self) {
        let root = self.home.root().to_path_buf();
        if !root.join(".git").exists() {
            debug!("home is not a git repository; skipping auto-commit");
            return;
        }
        let add = tokio::process::Command::new("git")
            .arg("-C")
            .arg(&root)
            .args(["add", "-A"])
            .output()
            .await;
        if !matches!(&add, Ok(out) if out.status.success()) {
            debug!("git add failed; skipping commit");
            return;
        }
        let message = format!("aleph: session {} {}", self.agent_id, Utc::now().format("%Y-%m-%d"));
        let commit = tokio::process::Command::new("git")
            .arg("-C")
            .arg(&root)
            .args(["commit", "-m", &message])
            .output()
            .await;
        match commit {
            Ok(out) if out.status.success() => info!("auto-committed session changes"),
            _ => debug!("nothing to auto-commit"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use aleph_config::PermissionMode;
    use aleph_runtime::ScriptedRuntime;

    use super::*;

    fn fixture(ephemeral: bool) -> (tempfile::TempDir, SessionLifecycle) {
        let dir = tempfile::tempdir().unwrap();
        let home = AlephHome::at(dir.path());
        home.ensure_layout().unwrap();
        (
            dir,
            SessionLifecycle::new(home, "aleph-life", ephemeral),
        )
    }

    fn record() -> AgentRecord {
        AgentRecord::for_current_process(
            "aleph-life",
            Some("aleph-parent".into()),
            1,
            "/proj",
            PermissionMode::Default,
            false,
        )
    }

    // ── Startup ───────────────────────────────────────────────────────────────

    #[test]
    fn handoff_is_injected_once_then_deleted() {
        let (dir, lifecycle) = fixture(false);
        let handoff = dir.path().join("memory/handoff.md");
        fs::write(&handoff, "finish the report").unwrap();

        let context = lifecycle.startup_context().unwrap();
        assert!(context.contains("finish the report"));
        assert!(!handoff.exists(), "handoff must be consumed");

        let second = lifecycle.startup_context().unwrap();
        assert!(!second.contains("finish the report"));
    }

    #[test]
    fn recap_uses_newest_session_summary() {
        let (dir, lifecycle) = fixture(false);
        let sessions = dir.path().join("memory/sessions");
        fs::write(sessions.join("2026-02-01-aleph-x.md"), "ancient").unwrap();
        fs::write(sessions.join("2026-03-01-aleph-x.md"), "recent work").unwrap();

        let context = lifecycle.startup_context().unwrap();
        assert!(context.contains("recent work"));
        assert!(!context.contains("ancient"));
    }

    #[test]
    fn standing_context_is_included() {
        let (dir, lifecycle) = fixture(false);
        fs::write(dir.path().join("memory/context.md"), "likes tea").unwrap();
        let context = lifecycle.startup_context().unwrap();
        assert!(context.contains("likes tea"));
    }

    #[test]
    fn empty_memory_yields_empty_context() {
        let (_dir, lifecycle) = fixture(false);
        assert!(lifecycle.startup_context().unwrap().is_empty());
    }

    #[test]
    fn system_prompt_substitutes_tool_descriptions() {
        let (_dir, lifecycle) = fixture(false);
        let prompt = lifecycle.system_prompt("- send_message: ...").unwrap();
        assert!(prompt.contains("- send_message: ..."));
        assert!(!prompt.contains(TOOL_DESCRIPTIONS_MARKER));
    }

    // ── Session end ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn failed_summary_turn_leaves_a_stub() {
        let (dir, lifecycle) = fixture(false);
        let client: Arc<dyn RuntimeClient> = Arc::new(ScriptedRuntime::idle());
        // The scripted runtime "answers" but writes no file → stub path.
        lifecycle
            .finish(&client, &record(), Duration::from_secs(5))
            .await;

        let sessions = dir.path().join("memory/sessions");
        let entries: Vec<_> = fs::read_dir(sessions).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let text = fs::read_to_string(entries[0].as_ref().unwrap().path()).unwrap();
        assert!(text.contains("stub"));
        assert!(text.contains("/proj"));
    }

    #[tokio::test]
    async fn ephemeral_session_writes_nothing() {
        let (dir, lifecycle) = fixture(true);
        let client: Arc<dyn RuntimeClient> = Arc::new(ScriptedRuntime::idle());
        lifecycle
            .finish(&client, &record(), Duration::from_secs(5))
            .await;
        let entries: Vec<_> = fs::read_dir(dir.path().join("memory/sessions"))
            .unwrap()
            .collect();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn summary_prompt_names_the_target_file() {
        let (_dir, lifecycle) = fixture(false);
        let runtime = Arc::new(ScriptedRuntime::idle());
        let client: Arc<dyn RuntimeClient> = runtime.clone();
        lifecycle
            .finish(&client, &record(), Duration::from_secs(5))
            .await;
        let turns = runtime.recorded_turns();
        assert_eq!(turns.len(), 1);
        assert!(turns[0].contains("memory/sessions"));
        assert!(turns[0].contains("aleph-life"));
    }

    // ── Emergency handoff ─────────────────────────────────────────────────────

    #[test]
    fn emergency_handoff_lands_in_the_handoff_file() {
        let (dir, lifecycle) = fixture(false);
        lifecycle
            .write_emergency_handoff("runtime died twice")
            .unwrap();
        let text = fs::read_to_string(dir.path().join("memory/handoff.md")).unwrap();
        assert!(text.contains("runtime died twice"));
        assert!(text.contains("aleph-life"));
    }
}
