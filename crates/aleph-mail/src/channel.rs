// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use aleph_config::AlephHome;
use aleph_fs::{atomic_write, ExclusiveLock, SharedLock};

use crate::inbox::Inbox;
use crate::message::{Draft, Recipient};
use crate::{MailError, Priority};

const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// One line of `history.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sender: String,
    pub channel: String,
    pub summary: String,
    pub priority: String,
    pub timestamp: DateTime<Utc>,
    pub body: String,
}

/// Outcome of a broadcast.  Individual delivery failures never abort the
/// rest of the fan-out; they are collected here.
#[derive(Debug, Default)]
pub struct BroadcastReceipt {
    /// `(subscriber, message_id)` per successful delivery.
    pub delivered: Vec<(String, String)>,
    /// `(subscriber, error)` per failed delivery.
    pub failed: Vec<(String, String)>,
}

/// Named pub/sub topics under `<home>/channels/`.
///
/// Membership is an append-only event log (`subscribers`): the current set
/// is the fold of subscribe/unsubscribe lines.  Appends take the channel's
/// exclusive lock; the broadcast-time fold takes it shared.
#[derive(Debug, Clone)]
pub struct Channels {
    home: AlephHome,
    inbox: Inbox,
    history_retention: usize,
}

impl Channels {
    pub fn new(home: AlephHome, history_retention: usize) -> Self {
        let inbox = Inbox::new(home.clone());
        Self {
            home,
            inbox,
            history_retention,
        }
    }

    /// Add `agent_id` to the channel.  Idempotent: re-subscribing while
    /// already a member appends nothing.
    pub fn subscribe(&self, agent_id: &str, channel: &str) -> Result<(), MailError> {
        let _guard = ExclusiveLock::acquire(&self.lock_path(channel), LOCK_TIMEOUT)?;
        let members = self.fold_members(channel)?;
        if members.contains(agent_id) {
            return Ok(());
        }
        self.append_event(channel, "subscribe", agent_id)?;
        debug!(agent_id, channel, "subscribed");
        Ok(())
    }

    /// Remove `agent_id`.  Takes effect at the next fan-out read.
    pub fn unsubscribe(&self, agent_id: &str, channel: &str) -> Result<(), MailError> {
        let _guard = ExclusiveLock::acquire(&self.lock_path(channel), LOCK_TIMEOUT)?;
        if !self.fold_members(channel)?.contains(agent_id) {
            return Ok(());
        }
        self.append_event(channel, "unsubscribe", agent_id)?;
        debug!(agent_id, channel, "unsubscribed");
        Ok(())
    }

    /// Current membership (the fold of the subscriber log).
    pub fn members(&self, channel: &str) -> Result<BTreeSet<String>, MailError> {
        let _guard = SharedLock::acquire(&self.lock_path(channel), LOCK_TIMEOUT)?;
        self.fold_members(channel)
    }

    /// Fan a message out to every subscriber except the sender, and record
    /// it in the channel history for late joiners.
    pub fn broadcast(
        &self,
        sender: &str,
        channel: &str,
        summary: &str,
        body: &str,
        priority: Priority,
    ) -> Result<BroadcastReceipt, MailError> {
        // Membership fold under the shared lock; delivery happens after the
        // guard drops so a slow fan-out never starves subscribe appends.
        let members = {
            let _guard = SharedLock::acquire(&self.lock_path(channel), LOCK_TIMEOUT)?;
            self.fold_members(channel)?
        };

        let mut receipt = BroadcastReceipt::default();
        for member in members.iter().filter(|m| m.as_str() != sender) {
            // Transient write failures get a short bounded retry; a member
            // that still fails is recorded and the fan-out moves on.
            let delivery = aleph_fs::with_retries(3, Duration::from_millis(10), || {
                let draft = Draft::new(sender, summary)
                    .priority(priority)
                    .body(body.to_string());
                self.inbox
                    .deliver_as(member, Recipient::Channel(channel.to_string()), draft)
            });
            match delivery {
                Ok(id) => receipt.delivered.push((member.clone(), id)),
                Err(e) => {
                    warn!(channel, member = %member, error = %e, "channel delivery failed");
                    receipt.failed.push((member.clone(), e.to_string()));
                }
            }
        }

        self.append_history(
            channel,
            &HistoryEntry {
                sender: sender.to_string(),
                channel: channel.to_string(),
                summary: summary.to_string(),
                priority: priority.as_str().to_string(),
                timestamp: Utc::now(),
                body: body.to_string(),
            },
        )?;

        Ok(receipt)
    }

    /// Retained history, oldest first, for late-joiner catch-up.  `limit`
    /// caps the tail returned (`None` = the full retained window).
    pub fn catch_up(
        &self,
        channel: &str,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryEntry>, MailError> {
        let path = self.history_path(channel);
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&path)?;
        let mut entries: Vec<HistoryEntry> = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(channel, error = %e, "skipping bad history line"),
            }
        }
        if let Some(limit) = limit {
            let skip = entries.len().saturating_sub(limit);
            entries.drain(..skip);
        }
        Ok(entries)
    }

    /// Every channel that currently exists on disk.
    pub fn list(&self) -> Result<Vec<String>, MailError> {
        let root = self.home.channels_root();
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = fs::read_dir(root)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        Ok(names)
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn fold_members(&self, channel: &str) -> Result<BTreeSet<String>, MailError> {
        let path = self.subscribers_path(channel);
        if !path.is_file() {
            return Ok(BTreeSet::new());
        }
        let mut members = BTreeSet::new();
        for line in fs::read_to_string(&path)?.lines() {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("subscribe"), Some(agent)) => {
                    members.insert(agent.to_string());
                }
                (Some("unsubscribe"), Some(agent)) => {
                    members.remove(agent);
                }
                _ => warn!(channel, line, "unrecognised subscriber event"),
            }
        }
        Ok(members)
    }

    fn append_event(&self, channel: &str, event: &str, agent_id: &str) -> Result<(), MailError> {
        let path = self.subscribers_path(channel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let line = format!(
            "{event} {agent_id} {}\n",
            Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
        );
        // One write call per line; the channel lock is held by the caller.
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn append_history(&self, channel: &str, entry: &HistoryEntry) -> Result<(), MailError> {
        let _guard = ExclusiveLock::acquire(&self.lock_path(channel), LOCK_TIMEOUT)?;
        let path = self.history_path(channel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut lines: Vec<String> = if path.is_file() {
            fs::read_to_string(&path)?
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(String::from)
                .collect()
        } else {
            Vec::new()
        };
        lines.push(serde_json::to_string(entry).map_err(|e| MailError::Malformed {
            path: path.clone(),
            message: e.to_string(),
        })?);

        // Retention: keep only the newest window.
        let skip = lines.len().saturating_sub(self.history_retention);
        let text = lines[skip..].join("\n") + "\n";
        atomic_write(&path, text.as_bytes())?;
        Ok(())
    }

    fn channel_dir(&self, channel: &str) -> PathBuf {
        self.home.channel_dir(channel)
    }

    fn subscribers_path(&self, channel: &str) -> PathBuf {
        self.channel_dir(channel).join("subscribers")
    }

    fn history_path(&self, channel: &str) -> PathBuf {
        self.channel_dir(channel).join("history.jsonl")
    }

    fn lock_path(&self, channel: &str) -> PathBuf {
        self.channel_dir(channel).join(".lock")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, Channels, Inbox) {
        let dir = tempfile::tempdir().unwrap();
        let home = AlephHome::at(dir.path());
        home.ensure_layout().unwrap();
        let channels = Channels::new(home.clone(), 500);
        (dir, channels, Inbox::new(home))
    }

    // ── Membership ────────────────────────────────────────────────────────────

    #[test]
    fn subscribe_then_members_contains_agent() {
        let (_dir, channels, _) = fixture();
        channels.subscribe("x", "exploration").unwrap();
        assert!(channels.members("exploration").unwrap().contains("x"));
    }

    #[test]
    fn subscribe_is_idempotent_in_the_log() {
        let (dir, channels, _) = fixture();
        channels.subscribe("x", "c").unwrap();
        channels.subscribe("x", "c").unwrap();
        let log = fs::read_to_string(dir.path().join("channels/c/subscribers")).unwrap();
        assert_eq!(log.lines().count(), 1);
    }

    #[test]
    fn unsubscribe_folds_out() {
        let (_dir, channels, _) = fixture();
        channels.subscribe("x", "c").unwrap();
        channels.subscribe("y", "c").unwrap();
        channels.unsubscribe("x", "c").unwrap();
        let members = channels.members("c").unwrap();
        assert!(!members.contains("x"));
        assert!(members.contains("y"));
    }

    #[test]
    fn resubscribe_after_unsubscribe_works() {
        let (_dir, channels, _) = fixture();
        channels.subscribe("x", "c").unwrap();
        channels.unsubscribe("x", "c").unwrap();
        channels.subscribe("x", "c").unwrap();
        assert!(channels.members("c").unwrap().contains("x"));
    }

    // ── Fan-out ───────────────────────────────────────────────────────────────

    #[test]
    fn broadcast_reaches_each_subscriber_once_not_sender() {
        let (_dir, channels, inbox) = fixture();
        for agent in ["x", "y", "z"] {
            channels.subscribe(agent, "exploration").unwrap();
        }
        let receipt = channels
            .broadcast("x", "exploration", "found it", "details", Priority::Normal)
            .unwrap();
        assert_eq!(receipt.delivered.len(), 2);
        assert!(receipt.failed.is_empty());

        for agent in ["y", "z"] {
            let unread = inbox.list_unread(agent).unwrap();
            assert_eq!(unread.len(), 1, "{agent} should get exactly one copy");
            assert_eq!(unread[0].channel.as_deref(), Some("exploration"));
        }
        assert!(inbox.list_unread("x").unwrap().is_empty());
    }

    #[test]
    fn broadcast_to_empty_channel_still_records_history() {
        let (_dir, channels, _) = fixture();
        let receipt = channels
            .broadcast("x", "quiet", "anyone?", "", Priority::Low)
            .unwrap();
        assert!(receipt.delivered.is_empty());
        assert_eq!(channels.catch_up("quiet", None).unwrap().len(), 1);
    }

    // ── History ───────────────────────────────────────────────────────────────

    #[test]
    fn catch_up_returns_broadcasts_oldest_first() {
        let (_dir, channels, _) = fixture();
        channels.subscribe("y", "c").unwrap();
        for i in 0..3 {
            channels
                .broadcast("x", "c", &format!("update {i}"), "", Priority::Normal)
                .unwrap();
        }
        let history = channels.catch_up("c", None).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].summary, "update 0");
        assert_eq!(history[2].summary, "update 2");
    }

    #[test]
    fn catch_up_limit_takes_the_tail() {
        let (_dir, channels, _) = fixture();
        for i in 0..5 {
            channels
                .broadcast("x", "c", &format!("u{i}"), "", Priority::Normal)
                .unwrap();
        }
        let tail = channels.catch_up("c", Some(2)).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].summary, "u3");
        assert_eq!(tail[1].summary, "u4");
    }

    #[test]
    fn history_is_trimmed_to_retention() {
        let dir = tempfile::tempdir().unwrap();
        let home = AlephHome::at(dir.path());
        home.ensure_layout().unwrap();
        let channels = Channels::new(home, 3);
        for i in 0..6 {
            channels
                .broadcast("x", "c", &format!("u{i}"), "", Priority::Normal)
                .unwrap();
        }
        let history = channels.catch_up("c", None).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].summary, "u3");
    }

    #[test]
    fn bad_history_line_is_skipped() {
        let (dir, channels, _) = fixture();
        channels
            .broadcast("x", "c", "good", "", Priority::Normal)
            .unwrap();
        let path = dir.path().join("channels/c/history.jsonl");
        let mut text = fs::read_to_string(&path).unwrap();
        text.push_str("this is not json\n");
        fs::write(&path, text).unwrap();
        channels
            .broadcast("x", "c", "after", "", Priority::Normal)
            .unwrap();
        let history = channels.catch_up("c", None).unwrap();
        assert_eq!(history.len(), 2);
    }

    // ── Concurrency ───────────────────────────────────────────────────────────

    #[test]
    fn concurrent_subscribes_all_land() {
        let (_dir, channels, _) = fixture();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let channels = channels.clone();
                std::thread::spawn(move || channels.subscribe(&format!("agent-{i}"), "c").unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(channels.members("c").unwrap().len(), 8);
    }
}
