// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use aleph_fs::DirWatcher;
use aleph_hooks::{Hook, HookDecision, HookEvent};
use aleph_mail::{Inbox, MessageSummary};

use crate::activity::Activity;

/// Chooses how incoming mail is surfaced to this agent.
///
/// * **Busy** (mid-turn, ≥1 tool call since the turn boundary): unread
///   summaries ride along as PostToolUse `additionalContext`.
/// * **Idle** (awaiting input): the idle pump injects a synthetic
///   user-turn, waking the agent.
///
/// Delivery is at-least-once: a message stays eligible until its recipient
/// marks it read.  Within one turn the same message is surfaced at most
/// once (`seen_this_turn`); across turns it reappears, and readers key off
/// `message_id`.
pub struct PushDispatcher {
    inbox: Inbox,
    agent_id: String,
    /// Ids already surfaced via PostToolUse in the current turn.
    seen_this_turn: HashSet<String>,
    /// Ids already injected as synthetic turns (per process lifetime).
    injected: HashSet<String>,
    /// Ids that already triggered a Stop-time drain.  Deduplicated for the
    /// process lifetime so an agent that ignores its mail still reaches
    /// idle instead of being forced around forever.
    stop_drained: HashSet<String>,
}

impl PushDispatcher {
    pub fn new(inbox: Inbox, agent_id: impl Into<String>) -> Self {
        Self {
            inbox,
            agent_id: agent_id.into(),
            seen_this_turn: HashSet::new(),
            injected: HashSet::new(),
            stop_drained: HashSet::new(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Context lines for the next PostToolUse, or `None` when every unread
    /// message was already surfaced this turn.
    pub fn post_tool_context(&mut self) -> Option<String> {
        let unread = self.unread();
        let fresh: Vec<&MessageSummary> = unread
            .iter()
            .filter(|m| !self.seen_this_turn.contains(&m.message_id))
            .collect();
        if fresh.is_empty() {
            return None;
        }
        let lines: Vec<String> = fresh
            .iter()
            .map(|m| {
                format!(
                    "[Message from {}]: {} (read: {})",
                    m.from,
                    m.summary,
                    m.path.display()
                )
            })
            .collect();
        for m in fresh {
            self.seen_this_turn.insert(m.message_id.clone());
        }
        debug!(agent_id = %self.agent_id, count = lines.len(), "surfacing mail via tool result");
        Some(lines.join("\n"))
    }

    /// Synthetic wake-up turn for an idle agent, or `None` when there is
    /// nothing new to inject.
    pub fn pending_wakeup(&mut self) -> Option<String> {
        let unread = self.unread();
        let fresh: Vec<&MessageSummary> = unread
            .iter()
            .filter(|m| !self.injected.contains(&m.message_id))
            .collect();
        if fresh.is_empty() {
            return None;
        }
        let lines: Vec<String> = fresh
            .iter()
            .map(|m| {
                format!(
                    "[Message from {}] {} (body at {})",
                    m.from,
                    m.summary,
                    m.path.display()
                )
            })
            .collect();
        for m in fresh {
            self.injected.insert(m.message_id.clone());
        }
        Some(lines.join("\n"))
    }

    /// Whether the Stop hook should hold the agent for one more turn.
    /// Each message forces at most one drain, so a recipient that ignores
    /// its mail still reaches idle.
    pub fn stop_drain(&mut self) -> Option<String> {
        let unread = self.unread();
        let fresh: Vec<&MessageSummary> = unread
            .iter()
            .filter(|m| !self.stop_drained.contains(&m.message_id))
            .collect();
        if fresh.is_empty() {
            return None;
        }
        let lines: Vec<String> = fresh
            .iter()
            .map(|m| {
                format!(
                    "[Message from {}]: {} (read: {})",
                    m.from,
                    m.summary,
                    m.path.display()
                )
            })
            .collect();
        for m in fresh {
            self.stop_drained.insert(m.message_id.clone());
        }
        Some(format!(
            "You have unread messages:\n{}\nRead them (and mark read) before going idle.",
            lines.join("\n")
        ))
    }

    /// Turn boundary: per-turn dedup state resets; unread mail becomes
    /// eligible for surfacing again.
    pub fn reset_turn(&mut self) {
        self.seen_this_turn.clear();
    }

    fn unread(&self) -> Vec<MessageSummary> {
        match self.inbox.list_unread(&self.agent_id) {
            Ok(list) => list,
            Err(e) => {
                warn!(agent_id = %self.agent_id, error = %e, "inbox listing failed");
                Vec::new()
            }
        }
    }
}

/// [`Hook`] adapter surfacing mail through the hook chain: PostToolUse
/// context while busy, Stop-time drain before going idle.
pub struct MailHook {
    dispatcher: Arc<Mutex<PushDispatcher>>,
}

impl MailHook {
    pub fn new(dispatcher: Arc<Mutex<PushDispatcher>>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl Hook for MailHook {
    fn name(&self) -> &str {
        "mail-delivery"
    }

    async fn run(&self, event: &HookEvent) -> anyhow::Result<HookDecision> {
        let mut dispatcher = self.dispatcher.lock().unwrap_or_else(|p| p.into_inner());
        match event {
            HookEvent::PostToolUse { .. } => Ok(match dispatcher.post_tool_context() {
                Some(ctx) => HookDecision::with_context(ctx),
                None => HookDecision::defer(),
            }),
            HookEvent::Stop => Ok(match dispatcher.stop_drain() {
                Some(ctx) => HookDecision {
                    force_continue: true,
                    ..HookDecision::with_context(ctx)
                },
                None => HookDecision::defer(),
            }),
            _ => Ok(HookDecision::defer()),
        }
    }
}

/// Watch the agent's inbox directory and, whenever the agent is idle and
/// holds unread mail, push a synthetic wake-up turn into `turn_tx`.
///
/// The watcher is a hint source: every tick triggers a re-list, so lost
/// kernel events are covered by the periodic rescan tick.
pub fn spawn_idle_pump(
    mut watcher: DirWatcher,
    dispatcher: Arc<Mutex<PushDispatcher>>,
    activity: Arc<Mutex<Activity>>,
    turn_tx: mpsc::Sender<String>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while watcher.changed().await.is_some() {
            let idle = activity
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .is_idle();
            if !idle {
                continue;
            }
            let wakeup = dispatcher
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .pending_wakeup();
            if let Some(text) = wakeup {
                if turn_tx.send(text).await.is_err() {
                    break;
                }
            }
        }
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
