// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use aleph_gate::denial_message;
use aleph_hooks::{HookBus, HookEvent, HookKind, HookOutput, Permission};
use aleph_runtime::{RuntimeClient, RuntimeEvent};

use crate::activity::Activity;
use crate::dispatch::PushDispatcher;
use crate::events::AgentEvent;

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Normal completion; the agent is idle.
    Done,
    /// A Stop handler forced another turn with this injected input.
    Continue(String),
}

/// Drives the runtime ↔ hook loop for one agent.
///
/// Per-agent ordering is strict: PreToolUse → tool execution →
/// PostToolUse, with no tool call starting before all prior hooks have
/// completed.  That holds structurally — hooks are dispatched inline while
/// consuming the event stream, so the loop cannot read the next event
/// until the current dispatch returns.
pub struct Harness {
    agent_id: String,
    client: Arc<dyn RuntimeClient>,
    bus: Arc<HookBus>,
    dispatcher: Arc<Mutex<PushDispatcher>>,
    activity: Arc<Mutex<Activity>>,
}

impl Harness {
    pub fn new(
        agent_id: impl Into<String>,
        client: Arc<dyn RuntimeClient>,
        bus: Arc<HookBus>,
        dispatcher: Arc<Mutex<PushDispatcher>>,
        activity: Arc<Mutex<Activity>>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            client,
            bus,
            dispatcher,
            activity,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn activity(&self) -> Arc<Mutex<Activity>> {
        self.activity.clone()
    }

    pub fn dispatcher(&self) -> Arc<Mutex<PushDispatcher>> {
        self.dispatcher.clone()
    }

    /// Run one user turn to completion, streaming [`AgentEvent`]s.
    pub async fn run_turn(
        &self,
        user_input: &str,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<TurnOutcome> {
        self.with_activity(|a| a.on_resume());

        let mut stream = self.client.submit(user_input).await?;
        let mut outcome = TurnOutcome::Done;

        while let Some(event) = stream.next().await {
            let event = match event {
                Ok(ev) => ev,
                Err(e) => {
                    // Hook-chain and stream errors for one event never
                    // crash the agent; surface and keep draining.
                    warn!(agent_id = %self.agent_id, error = %e, "runtime stream error");
                    let _ = tx.send(AgentEvent::Error(e.to_string())).await;
                    break;
                }
            };

            match event {
                RuntimeEvent::TextDelta { text } => {
                    let _ = tx.send(AgentEvent::TextDelta(text)).await;
                }
                RuntimeEvent::ThinkingDelta { text } => {
                    let _ = tx.send(AgentEvent::ThinkingDelta(text)).await;
                }
                RuntimeEvent::ToolUseStart {
                    id,
                    name,
                    arguments,
                } => {
                    self.with_activity(|a| a.on_tool_start());
                    let hook_outcome = self
                        .bus
                        .dispatch(&HookEvent::PreToolUse {
                            tool_name: name.clone(),
                            arguments,
                        })
                        .await;
                    let denied = hook_outcome.permission == Permission::Deny;
                    let output = HookOutput::from_outcome(HookKind::PreToolUse, &hook_outcome);
                    self.client.respond_hook(output.to_json()).await?;

                    if denied {
                        let reason = hook_outcome
                            .reason
                            .unwrap_or_else(|| "denied".to_string());
                        self.with_activity(|a| a.on_tool_complete());
                        let _ = tx
                            .send(AgentEvent::ToolFinished {
                                id,
                                name,
                                result: denial_message(&reason),
                                denied: true,
                            })
                            .await;
                    } else {
                        let _ = tx.send(AgentEvent::ToolStarted { id, name }).await;
                    }
                }
                RuntimeEvent::ToolUseComplete {
                    id,
                    name,
                    arguments,
                    result,
                } => {
                    self.with_activity(|a| a.on_tool_complete());
                    let hook_outcome = self
                        .bus
                        .dispatch(&HookEvent::PostToolUse {
                            tool_name: name.clone(),
                            arguments,
                            result: result.clone(),
                        })
                        .await;
                    let output = HookOutput::from_outcome(HookKind::PostToolUse, &hook_outcome);
                    self.client.respond_hook(output.to_json()).await?;
                    let _ = tx
                        .send(AgentEvent::ToolFinished {
                            id,
                            name,
                            result,
                            denied: false,
                        })
                        .await;
                }
                RuntimeEvent::TurnEnd => {
                    let stop_outcome = self.bus.dispatch(&HookEvent::Stop).await;
                    self.with_activity(|a| a.on_turn_end());
                    self.dispatcher
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .reset_turn();
                    let _ = tx.send(AgentEvent::TurnComplete).await;

                    if stop_outcome.force_continue {
                        if let Some(context) = stop_outcome.additional_context {
                            outcome = TurnOutcome::Continue(context);
                        }
                    }
                    break;
                }
            }
        }
        Ok(outcome)
    }

    /// Run a turn and any forced continuations until the agent truly goes
    /// idle.
    pub async fn run_until_idle(
        &self,
        first_input: &str,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<()> {
        let mut input = first_input.to_string();
        loop {
            match self.run_turn(&input, tx).await? {
                TurnOutcome::Done => return Ok(()),
                TurnOutcome::Continue(next) => {
                    debug!(agent_id = %self.agent_id, "stop hook forced continuation");
                    let _ = tx.send(AgentEvent::TurnInjected(next.clone())).await;
                    input = next;
                }
            }
        }
    }

    /// Interrupt the current turn: the runtime stops generating, in-flight
    /// hooks complete, and any pending permission prompt auto-denies at
    /// the arbiter.
    pub async fn interrupt(&self) -> anyhow::Result<()> {
        self.with_activity(|a| a.on_interrupt());
        self.client.interrupt().await?;
        Ok(())
    }

    fn with_activity(&self, f: impl FnOnce(&mut Activity)) {
        f(&mut self.activity.lock().unwrap_or_else(|p| p.into_inner()));
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use aleph_config::{AlephHome, PermissionMode};
    use aleph_gate::{Arbiter, ClassifierRegistry, PermissionHook};
    use aleph_mail::{Draft, Inbox};
    use aleph_runtime::ScriptedRuntime;
    use serde_json::json;

    use super::*;

    struct Fixture {
        _dir: tempfile::TempDir,
        inbox: Inbox,
        runtime: Arc<ScriptedRuntime>,
        harness: Harness,
        rx: mpsc::Receiver<AgentEvent>,
        tx: mpsc::Sender<AgentEvent>,
    }

    fn fixture(agent: &str, scripts: Vec<Vec<RuntimeEvent>>, mode: PermissionMode) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let home = AlephHome::at(dir.path());
        home.ensure_layout().unwrap();
        let inbox = Inbox::new(home);

        let runtime = Arc::new(ScriptedRuntime::new(scripts));
        let dispatcher = Arc::new(Mutex::new(PushDispatcher::new(inbox.clone(), agent)));
        let activity = Arc::new(Mutex::new(Activity::new()));
        activity.lock().unwrap().on_ready();

        let (arbiter, mut ui_rx) = Arbiter::new(mode, ClassifierRegistry::default());
        // Headless UI for tests: deny everything, like a user holding `n`.
        tokio::spawn(async move {
            while let Some(request) = ui_rx.recv().await {
                request.deny("user rejected");
            }
        });

        let mut bus = HookBus::new();
        bus.register(HookKind::PreToolUse, Arc::new(PermissionHook::new(arbiter)));
        let mail_hook = Arc::new(crate::dispatch::MailHook::new(dispatcher.clone()));
        bus.register(HookKind::PostToolUse, mail_hook.clone());
        bus.register(HookKind::Stop, mail_hook);

        let harness = Harness::new(
            agent,
            runtime.clone(),
            Arc::new(bus),
            dispatcher,
            activity,
        );
        let (tx, rx) = mpsc::channel(256);
        Fixture {
            _dir: dir,
            inbox,
            runtime,
            harness,
            rx,
            tx,
        }
    }

    fn tool_turn() -> Vec<RuntimeEvent> {
        vec![
            RuntimeEvent::ToolUseStart {
                id: "t1".into(),
                name: "read_file".into(),
                arguments: json!({"path": "/tmp/x"}),
            },
            RuntimeEvent::ToolUseComplete {
                id: "t1".into(),
                name: "read_file".into(),
                arguments: json!({"path": "/tmp/x"}),
                result: "contents".into(),
            },
            RuntimeEvent::TurnEnd,
        ]
    }

    // ── Busy-recipient delivery (mid-turn mail lands in PostToolUse) ─────────

    #[tokio::test]
    async fn mail_delivered_mid_turn_rides_the_tool_result() {
        let mut f = fixture("a", vec![tool_turn()], PermissionMode::Yolo);
        // Mail arrives before the tool completes.
        f.inbox.deliver("a", Draft::new("b", "hello")).unwrap();

        // The stop drain will force one continuation; drive to idle.
        f.harness.run_until_idle("work", &f.tx).await.unwrap();

        let responses = f.runtime.recorded_hook_responses();
        let post = responses
            .iter()
            .find(|r| r["hookSpecificOutput"]["hookEventName"] == "PostToolUse")
            .expect("a PostToolUse envelope");
        let ctx = post["hookSpecificOutput"]["additionalContext"]
            .as_str()
            .unwrap();
        assert!(ctx.contains("[Message from b]: hello"));
    }

    #[tokio::test]
    async fn read_mail_yields_empty_posttooluse_envelope() {
        let mut f = fixture("a", vec![tool_turn()], PermissionMode::Yolo);
        let id = f.inbox.deliver("a", Draft::new("b", "hello")).unwrap();
        f.inbox.mark_read("a", &id).unwrap();

        f.harness.run_until_idle("work", &f.tx).await.unwrap();

        let responses = f.runtime.recorded_hook_responses();
        // PreToolUse carries the allow; PostToolUse must be bare `{}`.
        let post = &responses[1];
        assert_eq!(post.to_string(), "{}");
        while f.rx.try_recv().is_ok() {}
    }

    // ── Permission deny path ──────────────────────────────────────────────────

    #[tokio::test]
    async fn denied_edit_surfaces_policy_result_to_ui() {
        let script = vec![
            RuntimeEvent::ToolUseStart {
                id: "t1".into(),
                name: "Edit".into(),
                arguments: json!({"file_path": "/tmp/x", "content": "data"}),
            },
            RuntimeEvent::TurnEnd,
        ];
        let mut f = fixture("a", vec![script], PermissionMode::Safe);
        f.harness.run_until_idle("edit something", &f.tx).await.unwrap();

        let responses = f.runtime.recorded_hook_responses();
        assert_eq!(responses[0]["permissionDecision"], "deny");
        assert_eq!(responses[0]["reason"], "user rejected");

        let mut saw_denied_result = false;
        while let Ok(event) = f.rx.try_recv() {
            if let AgentEvent::ToolFinished { result, denied, .. } = event {
                if denied {
                    assert_eq!(result, "Tool denied by permission policy: user rejected");
                    saw_denied_result = true;
                }
            }
        }
        assert!(saw_denied_result);
    }

    // ── Stop drain ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn unread_mail_forces_one_extra_turn() {
        let mut f = fixture(
            "a",
            vec![vec![RuntimeEvent::TurnEnd], vec![RuntimeEvent::TurnEnd]],
            PermissionMode::Yolo,
        );
        f.inbox.deliver("a", Draft::new("b", "nudge")).unwrap();

        f.harness.run_until_idle("hi", &f.tx).await.unwrap();

        let turns = f.runtime.recorded_turns();
        assert_eq!(turns.len(), 2, "stop drain must add exactly one turn");
        assert!(turns[1].contains("unread"));
        while f.rx.try_recv().is_ok() {}
    }

    #[tokio::test]
    async fn clean_inbox_means_single_turn() {
        let mut f = fixture("a", vec![vec![RuntimeEvent::TurnEnd]], PermissionMode::Yolo);
        f.harness.run_until_idle("hi", &f.tx).await.unwrap();
        assert_eq!(f.runtime.recorded_turns().len(), 1);
        while f.rx.try_recv().is_ok() {}
    }

    // ── Activity tracking through the loop ────────────────────────────────────

    #[tokio::test]
    async fn activity_is_idle_after_turn() {
        let f = fixture("a", vec![tool_turn()], PermissionMode::Yolo);
        f.harness.run_until_idle("go", &f.tx).await.unwrap();
        assert!(f.harness.activity().lock().unwrap().is_idle());
    }
}
