// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::event::{HookDecision, HookEvent, HookKind, Permission};

/// A callback registered on a named event in the agent's lifecycle.
///
/// Handlers may suspend — awaiting file I/O or a UI decision — and the bus
/// guarantees no other handler for the same agent runs meanwhile.
#[async_trait]
pub trait Hook: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, event: &HookEvent) -> anyhow::Result<HookDecision>;
}

/// The aggregate of one dispatch: everything the agent loop needs to build
/// the runtime's hook response.
#[derive(Debug, Clone, Default)]
pub struct HookOutcome {
    /// Handler contexts, joined in chain order with blank lines.
    pub additional_context: Option<String>,
    /// First non-defer permission in chain order.
    pub permission: Permission,
    /// Reason attached to that permission.
    pub reason: Option<String>,
    /// True when any Stop handler wants another turn.
    pub force_continue: bool,
}

/// Ordered handler chains per event kind, serving one agent.
///
/// Dispatch is strictly sequential; aggregation rules: contexts
/// concatenate, the first `allow`/`deny` wins the permission (later
/// handlers still run for side effects), `force_continue` is OR-folded.
/// A handler error aborts the rest of the chain but the outcome keeps
/// whatever the earlier handlers contributed — a broken hook never takes
/// the agent down with it.
#[derive(Default)]
pub struct HookBus {
    chains: HashMap<HookKind, Vec<Arc<dyn Hook>>>,
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler to the chain for `kind`.  Chain order is
    /// registration order.
    pub fn register(&mut self, kind: HookKind, hook: Arc<dyn Hook>) {
        self.chains.entry(kind).or_default().push(hook);
    }

    /// Number of handlers registered for `kind`.
    pub fn chain_len(&self, kind: HookKind) -> usize {
        self.chains.get(&kind).map_or(0, Vec::len)
    }

    /// Run the chain for `event` and aggregate the decisions.
    pub async fn dispatch(&self, event: &HookEvent) -> HookOutcome {
        let mut outcome = HookOutcome::default();
        let Some(chain) = self.chains.get(&event.kind()) else {
            return outcome;
        };

        let mut contexts: Vec<String> = Vec::new();
        for hook in chain {
            let decision = match hook.run(event).await {
                Ok(d) => d,
                Err(e) => {
                    warn!(hook = hook.name(), error = %e, "hook failed; aborting chain");
                    break;
                }
            };
            if let Some(ctx) = decision.additional_context {
                if !ctx.is_empty() {
                    contexts.push(ctx);
                }
            }
            if outcome.permission == Permission::Defer
                && decision.permission != Permission::Defer
            {
                outcome.permission = decision.permission;
                outcome.reason = decision.message;
            }
            outcome.force_continue |= decision.force_continue;
        }

        if !contexts.is_empty() {
            outcome.additional_context = Some(contexts.join("\n\n"));
        }
        outcome
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct FixedHook {
        name: String,
        decision: HookDecision,
        calls: AtomicUsize,
    }

    impl FixedHook {
        fn new(name: &str, decision: HookDecision) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                decision,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Hook for FixedHook {
        fn name(&self) -> &str {
            &self.name
        }
        async fn run(&self, _event: &HookEvent) -> anyhow::Result<HookDecision> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.decision.clone())
        }
    }

    struct FailingHook;

    #[async_trait]
    impl Hook for FailingHook {
        fn name(&self) -> &str {
            "failing"
        }
        async fn run(&self, _event: &HookEvent) -> anyhow::Result<HookDecision> {
            anyhow::bail!("boom")
        }
    }

    fn pre_tool_event() -> HookEvent {
        HookEvent::PreToolUse {
            tool_name: "Edit".into(),
            arguments: serde_json::json!({"file_path": "/tmp/x"}),
        }
    }

    // ── Aggregation ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn contexts_concatenate_in_chain_order() {
        let mut bus = HookBus::new();
        bus.register(
            HookKind::PostToolUse,
            FixedHook::new("a", HookDecision::with_context("first")),
        );
        bus.register(
            HookKind::PostToolUse,
            FixedHook::new("b", HookDecision::with_context("second")),
        );
        let outcome = bus
            .dispatch(&HookEvent::PostToolUse {
                tool_name: "Read".into(),
                arguments: serde_json::json!({}),
                result: String::new(),
            })
            .await;
        assert_eq!(outcome.additional_context.as_deref(), Some("first\n\nsecond"));
    }

    #[tokio::test]
    async fn first_non_defer_permission_wins() {
        let mut bus = HookBus::new();
        bus.register(HookKind::PreToolUse, FixedHook::new("defer", HookDecision::defer()));
        bus.register(
            HookKind::PreToolUse,
            FixedHook::new("deny", HookDecision::deny("no")),
        );
        bus.register(HookKind::PreToolUse, FixedHook::new("allow", HookDecision::allow()));
        let outcome = bus.dispatch(&pre_tool_event()).await;
        assert_eq!(outcome.permission, Permission::Deny);
        assert_eq!(outcome.reason.as_deref(), Some("no"));
    }

    #[tokio::test]
    async fn later_handlers_still_run_after_decision() {
        let mut bus = HookBus::new();
        let tail = FixedHook::new("tail", HookDecision::with_context("tail ctx"));
        bus.register(
            HookKind::PreToolUse,
            FixedHook::new("deny", HookDecision::deny("no")),
        );
        bus.register(HookKind::PreToolUse, tail.clone());
        let outcome = bus.dispatch(&pre_tool_event()).await;
        assert_eq!(tail.calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.additional_context.as_deref(), Some("tail ctx"));
    }

    #[tokio::test]
    async fn empty_chain_yields_default_outcome() {
        let bus = HookBus::new();
        let outcome = bus.dispatch(&HookEvent::SessionStart).await;
        assert_eq!(outcome.permission, Permission::Defer);
        assert!(outcome.additional_context.is_none());
    }

    #[tokio::test]
    async fn force_continue_is_or_folded() {
        let mut bus = HookBus::new();
        bus.register(HookKind::Stop, FixedHook::new("quiet", HookDecision::defer()));
        bus.register(
            HookKind::Stop,
            FixedHook::new(
                "drain",
                HookDecision {
                    force_continue: true,
                    ..HookDecision::with_context("unread mail")
                },
            ),
        );
        let outcome = bus.dispatch(&HookEvent::Stop).await;
        assert!(outcome.force_continue);
        assert_eq!(outcome.additional_context.as_deref(), Some("unread mail"));
    }

    // ── Failure isolation ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn failing_hook_aborts_chain_but_keeps_prior_context() {
        let mut bus = HookBus::new();
        let never_ran = FixedHook::new("after", HookDecision::with_context("after"));
        bus.register(
            HookKind::PreToolUse,
            FixedHook::new("before", HookDecision::with_context("before")),
        );
        bus.register(HookKind::PreToolUse, Arc::new(FailingHook));
        bus.register(HookKind::PreToolUse, never_ran.clone());

        let outcome = bus.dispatch(&pre_tool_event()).await;
        assert_eq!(outcome.additional_context.as_deref(), Some("before"));
        assert_eq!(never_ran.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handlers_run_sequentially() {
        // Each handler records the order it observed; interleaving would
        // break the strictly-increasing sequence.
        struct OrderedHook {
            order: Arc<std::sync::Mutex<Vec<usize>>>,
            idx: usize,
        }

        #[async_trait]
        impl Hook for OrderedHook {
            fn name(&self) -> &str {
                "ordered"
            }
            async fn run(&self, _event: &HookEvent) -> anyhow::Result<HookDecision> {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                self.order.lock().unwrap().push(self.idx);
                Ok(HookDecision::defer())
            }
        }

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut bus = HookBus::new();
        for idx in 0..4 {
            bus.register(
                HookKind::SessionStart,
                Arc::new(OrderedHook {
                    order: order.clone(),
                    idx,
                }),
            );
        }
        bus.dispatch(&HookEvent::SessionStart).await;
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }
}
