// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use aleph_config::{RuntimeConfig, ALEPH_AGENT_ID_ENV, RUNTIME_MEMORY_DISABLE_ENV};

use crate::client::{EventStream, RuntimeClient, RuntimeError};
use crate::events::RuntimeEvent;

/// The wire is line-delimited JSON in both directions: events out of the
/// runtime's stdout, control messages into its stdin.
struct Connection {
    child: Child,
    stdin: ChildStdin,
}

/// Wraps the real agent-runtime binary as a subprocess.
///
/// Reconnect policy: if the child is found dead, the next `submit` starts
/// it once more; a second death surfaces [`RuntimeError::Lost`] and the
/// caller is expected to write an emergency handoff and exit non-zero.
pub struct SubprocessClient {
    config: RuntimeConfig,
    agent_id: String,
    conn: Mutex<Option<Connection>>,
    events_rx: Arc<Mutex<mpsc::Receiver<RuntimeEvent>>>,
    events_tx: mpsc::Sender<RuntimeEvent>,
    /// Spawn attempts consumed; 2 = initial + one reconnect.
    spawns_used: Mutex<usize>,
}

impl SubprocessClient {
    pub fn new(config: RuntimeConfig, agent_id: impl Into<String>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            config,
            agent_id: agent_id.into(),
            conn: Mutex::new(None),
            events_rx: Arc::new(Mutex::new(events_rx)),
            events_tx,
            spawns_used: Mutex::new(0),
        }
    }

    /// Start the runtime if it is not running.  Enforces the one-reconnect
    /// budget.
    async fn ensure_running(&self) -> Result<(), RuntimeError> {
        let mut conn = self.conn.lock().await;
        if let Some(existing) = conn.as_mut() {
            match existing.child.try_wait() {
                Ok(None) => return Ok(()), // still alive
                Ok(Some(status)) => {
                    warn!(%status, "runtime subprocess exited");
                    *conn = None;
                }
                Err(e) => return Err(RuntimeError::Io(e)),
            }
        }

        let mut spawns = self.spawns_used.lock().await;
        if *spawns >= 2 {
            return Err(RuntimeError::Lost(
                "runtime died again after reconnect".to_string(),
            ));
        }
        *spawns += 1;

        debug!(command = %self.config.command, attempt = *spawns, "starting runtime subprocess");
        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .env(ALEPH_AGENT_ID_ENV, &self.agent_id)
            // The harness owns memory; the runtime's legacy memory system
            // must stay off.
            .env(RUNTIME_MEMORY_DISABLE_ENV, "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RuntimeError::Protocol("runtime has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::Protocol("runtime has no stdout".into()))?;

        // Decode events until EOF.  Undecodable lines are logged and
        // skipped; they must not poison the stream.
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<RuntimeEvent>(&line) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, line, "skipping undecodable runtime event"),
                }
            }
            debug!("runtime stdout closed");
        });

        *conn = Some(Connection { child, stdin });
        Ok(())
    }

    async fn write_control(&self, value: serde_json::Value) -> Result<(), RuntimeError> {
        let mut line = value.to_string();
        line.push('\n');
        let mut conn = self.conn.lock().await;
        let conn = conn
            .as_mut()
            .ok_or_else(|| RuntimeError::Protocol("runtime not running".into()))?;
        conn.stdin.write_all(line.as_bytes()).await?;
        conn.stdin.flush().await?;
        Ok(())
    }

    /// Turn the shared event channel into a per-turn stream that finishes
    /// after `TurnEnd`.
    fn turn_stream(&self) -> EventStream {
        let rx = self.events_rx.clone();
        Box::pin(stream::unfold((rx, false), |(rx, done)| async move {
            if done {
                return None;
            }
            let event = {
                let mut guard = rx.lock().await;
                guard.recv().await
            };
            match event {
                Some(event) => {
                    let end = event.is_turn_end();
                    Some((Ok(event), (rx, end)))
                }
                None => Some((
                    Err(RuntimeError::Lost("event stream closed mid-turn".into())),
                    (rx, true),
                )),
            }
        }))
    }
}

#[async_trait]
impl RuntimeClient for SubprocessClient {
    fn name(&self) -> &str {
        "subprocess"
    }

    async fn submit(&self, turn: &str) -> Result<EventStream, RuntimeError> {
        self.ensure_running().await?;
        if let Err(e) = self
            .write_control(serde_json::json!({"type": "user_turn", "text": turn}))
            .await
        {
            // The child may have died between the liveness check and the
            // write; burn the reconnect attempt and retry once.
            warn!(error = %e, "user turn write failed; attempting reconnect");
            self.conn.lock().await.take();
            self.ensure_running().await?;
            self.write_control(serde_json::json!({"type": "user_turn", "text": turn}))
                .await?;
        }
        Ok(self.turn_stream())
    }

    async fn respond_hook(&self, output: serde_json::Value) -> Result<(), RuntimeError> {
        self.write_control(serde_json::json!({"type": "hook_response", "output": output}))
            .await
    }

    async fn interrupt(&self) -> Result<(), RuntimeError> {
        self.write_control(serde_json::json!({"type": "interrupt"}))
            .await
    }

    async fn shutdown(&self) -> Result<(), RuntimeError> {
        let _ = self
            .write_control(serde_json::json!({"type": "shutdown"}))
            .await;
        if let Some(mut conn) = self.conn.lock().await.take() {
            let _ = conn.child.kill().await;
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
