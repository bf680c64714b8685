// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;

use crate::client::{EventStream, RuntimeClient, RuntimeError};
use crate::events::RuntimeEvent;

/// A pre-scripted runtime for tests.  Each `submit` pops the next event
/// script from the front of the queue; an exhausted queue answers with a
/// bare `TurnEnd`.  Submitted turns and hook responses are recorded so
/// tests can inspect exactly what the harness sent.
#[derive(Default)]
pub struct ScriptedRuntime {
    scripts: Mutex<VecDeque<Vec<RuntimeEvent>>>,
    /// Every turn text this runtime received, in order.
    pub turns: Mutex<Vec<String>>,
    /// Every hook-response envelope this runtime received, in order.
    pub hook_responses: Mutex<Vec<serde_json::Value>>,
    /// Number of interrupt control messages received.
    pub interrupts: Mutex<usize>,
}

impl ScriptedRuntime {
    pub fn new(scripts: Vec<Vec<RuntimeEvent>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        }
    }

    /// Convenience: a runtime that answers every turn with `TurnEnd` only.
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn recorded_turns(&self) -> Vec<String> {
        self.turns.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn recorded_hook_responses(&self) -> Vec<serde_json::Value> {
        self.hook_responses
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl RuntimeClient for ScriptedRuntime {
    fn name(&self) -> &str {
        "scripted-mock"
    }

    async fn submit(&self, turn: &str) -> Result<EventStream, RuntimeError> {
        self.turns
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(turn.to_string());

        let mut script = self
            .scripts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
            .unwrap_or_default();
        if !script.iter().any(RuntimeEvent::is_turn_end) {
            script.push(RuntimeEvent::TurnEnd);
        }
        Ok(Box::pin(stream::iter(script.into_iter().map(Ok))))
    }

    async fn respond_hook(&self, output: serde_json::Value) -> Result<(), RuntimeError> {
        self.hook_responses
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(output);
        Ok(())
    }

    async fn interrupt(&self) -> Result<(), RuntimeError> {
        *self.interrupts.lock().unwrap_or_else(|p| p.into_inner()) += 1;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), RuntimeError> {
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn scripts_pop_in_order() {
        let runtime = ScriptedRuntime::new(vec![
            vec![RuntimeEvent::TextDelta { text: "one".into() }, RuntimeEvent::TurnEnd],
            vec![RuntimeEvent::TextDelta { text: "two".into() }, RuntimeEvent::TurnEnd],
        ]);

        for expected in ["one", "two"] {
            let mut stream = runtime.submit("go").await.unwrap();
            let first = stream.next().await.unwrap().unwrap();
            assert_eq!(
                first,
                RuntimeEvent::TextDelta {
                    text: expected.into()
                }
            );
        }
    }

    #[tokio::test]
    async fn exhausted_scripts_still_end_the_turn() {
        let runtime = ScriptedRuntime::idle();
        let mut stream = runtime.submit("anything").await.unwrap();
        assert!(stream.next().await.unwrap().unwrap().is_turn_end());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn turn_end_is_appended_when_script_forgets_it() {
        let runtime =
            ScriptedRuntime::new(vec![vec![RuntimeEvent::TextDelta { text: "x".into() }]]);
        let mut stream = runtime.submit("go").await.unwrap();
        let events: Vec<_> = (&mut stream).map(|e| e.unwrap()).collect().await;
        assert!(events.last().unwrap().is_turn_end());
    }

    #[tokio::test]
    async fn records_turns_and_hook_responses() {
        let runtime = ScriptedRuntime::idle();
        runtime.submit("first").await.unwrap();
        runtime.submit("second").await.unwrap();
        runtime.respond_hook(json!({"ok": true})).await.unwrap();

        assert_eq!(runtime.recorded_turns(), vec!["first", "second"]);
        assert_eq!(runtime.recorded_hook_responses(), vec![json!({"ok": true})]);
    }
}
