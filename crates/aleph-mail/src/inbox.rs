// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::cmp::Reverse;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use aleph_config::AlephHome;
use aleph_fs::{atomic_write, ulid, ExclusiveLock};

use crate::message::{Draft, Message, Recipient};
use crate::{MailError, Priority};

/// How long a prune waits for the inbox lock before giving up.
const PRUNE_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Header-only view of an inbox entry, as returned by
/// [`Inbox::list_unread`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSummary {
    pub message_id: String,
    pub from: String,
    pub summary: String,
    pub priority: Priority,
    pub timestamp: DateTime<Utc>,
    /// Set when the entry was a channel fan-out copy.
    pub channel: Option<String>,
    /// Absolute path of the message file, for "read the body at" hints.
    pub path: PathBuf,
}

/// Criteria for [`Inbox::prune`]: read messages older than `older_than`
/// are removed, and at most `max_count` read messages are kept overall
/// (oldest removed first).
#[derive(Debug, Clone, Copy)]
pub struct PrunePolicy {
    pub older_than: chrono::Duration,
    pub max_count: usize,
}

/// Per-agent mail directories under `<home>/inbox/`.
///
/// Delivery is lock-free: every message gets a fresh sortable id, so writer
/// filenames never collide and a reader listing the directory sees only
/// complete files (atomic rename).  Only [`prune`][Inbox::prune] locks the
/// inbox, to keep its delete-and-relist window consistent.
#[derive(Debug, Clone)]
pub struct Inbox {
    home: AlephHome,
}

impl Inbox {
    pub fn new(home: AlephHome) -> Self {
        Self { home }
    }

    /// Deliver a direct message.  Allocates the id and timestamp, writes
    /// `inbox/<recipient>/<id>.md`, and returns the id.
    pub fn deliver(&self, recipient: &str, draft: Draft) -> Result<String, MailError> {
        self.deliver_as(recipient, Recipient::Direct(recipient.to_string()), draft)
    }

    /// Deliver with an explicit recipient header — the channel fan-out path
    /// uses this to stamp `channel:` instead of `to:`.
    pub fn deliver_as(
        &self,
        recipient: &str,
        header: Recipient,
        draft: Draft,
    ) -> Result<String, MailError> {
        let message = Message {
            message_id: ulid(),
            from: draft.from,
            recipient: header,
            summary: draft.summary,
            priority: draft.priority,
            timestamp: Utc::now(),
            body: draft.body,
            extra: Default::default(),
        };
        message.validate()?;

        let path = self.message_path(recipient, &message.message_id);
        atomic_write(&path, message.to_file_string().as_bytes())?;
        debug!(recipient, id = %message.message_id, "delivered message");
        Ok(message.message_id)
    }

    /// List unread messages, sorted by priority (high first), then
    /// timestamp (old first), then id.
    ///
    /// Files that fail to parse are moved to the quarantine directory and
    /// skipped — one bad message never blocks the rest of the inbox.
    pub fn list_unread(&self, recipient: &str) -> Result<Vec<MessageSummary>, MailError> {
        let dir = self.home.inbox_dir(recipient);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            if self.read_sidecar(&path).exists() {
                continue;
            }
            let text = match fs::read_to_string(&path) {
                Ok(t) => t,
                Err(e) => {
                    // Raced with prune or an external mover; skip.
                    debug!(path = %path.display(), error = %e, "unreadable inbox entry");
                    continue;
                }
            };
            match Message::parse(&text, &path) {
                Ok(msg) => out.push(MessageSummary {
                    message_id: msg.message_id,
                    from: msg.from,
                    summary: msg.summary,
                    priority: msg.priority,
                    timestamp: msg.timestamp,
                    channel: match msg.recipient {
                        Recipient::Channel(name) => Some(name),
                        Recipient::Direct(_) => None,
                    },
                    path: path.clone(),
                }),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "quarantining malformed message");
                    self.quarantine(&path);
                }
            }
        }

        out.sort_by(|a, b| {
            (Reverse(a.priority), a.timestamp, &a.message_id)
                .cmp(&(Reverse(b.priority), b.timestamp, &b.message_id))
        });
        Ok(out)
    }

    /// Read the full message, body included.
    pub fn read(&self, recipient: &str, message_id: &str) -> Result<Message, MailError> {
        let path = self.message_path(recipient, message_id);
        let text = fs::read_to_string(&path)?;
        Message::parse(&text, &path)
    }

    /// Mark a message read by creating its `.read` sidecar.  Idempotent.
    pub fn mark_read(&self, recipient: &str, message_id: &str) -> Result<(), MailError> {
        let sidecar = self
            .home
            .inbox_dir(recipient)
            .join(format!("{message_id}.read"));
        atomic_write(&sidecar, b"")?;
        Ok(())
    }

    /// Delete read messages matching `policy`.
    ///
    /// Holds the inbox lock so a concurrent prune cannot interleave;
    /// delivery deliberately does not take this lock, so the listing is
    /// only eventually consistent with deliveries racing the prune.
    pub fn prune(&self, recipient: &str, policy: PrunePolicy) -> Result<usize, MailError> {
        let dir = self.home.inbox_dir(recipient);
        if !dir.is_dir() {
            return Ok(0);
        }
        let _guard = ExclusiveLock::acquire(&dir.join(".lock"), PRUNE_LOCK_TIMEOUT)?;

        // Collect (id, path, timestamp) of read messages, oldest first.
        let mut read_msgs: Vec<(String, PathBuf, DateTime<Utc>)> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            if !self.read_sidecar(&path).exists() {
                continue;
            }
            let Ok(text) = fs::read_to_string(&path) else {
                continue;
            };
            if let Ok(msg) = Message::parse(&text, &path) {
                read_msgs.push((msg.message_id, path, msg.timestamp));
            }
        }
        read_msgs.sort_by_key(|(_, _, ts)| *ts);

        let cutoff = Utc::now() - policy.older_than;
        let mut doomed: Vec<usize> = read_msgs
            .iter()
            .enumerate()
            .filter(|(_, (_, _, ts))| *ts < cutoff)
            .map(|(i, _)| i)
            .collect();

        // Age pass done; now enforce the count cap on whatever remains.
        let remaining = read_msgs.len() - doomed.len();
        if remaining > policy.max_count {
            let mut excess = remaining - policy.max_count;
            for (i, _) in read_msgs.iter().enumerate() {
                if excess == 0 {
                    break;
                }
                if !doomed.contains(&i) {
                    doomed.push(i);
                    excess -= 1;
                }
            }
        }

        for &i in &doomed {
            let (_, path, _) = &read_msgs[i];
            let _ = fs::remove_file(path);
            let _ = fs::remove_file(self.read_sidecar(path));
        }
        Ok(doomed.len())
    }

    fn message_path(&self, recipient: &str, message_id: &str) -> PathBuf {
        self.home.inbox_dir(recipient).join(format!("{message_id}.md"))
    }

    fn read_sidecar(&self, message_path: &std::path::Path) -> PathBuf {
        message_path.with_extension("read")
    }

    /// Move a malformed file out of the inbox so it is never parsed again.
    fn quarantine(&self, path: &std::path::Path) {
        let qdir = self.home.quarantine_dir();
        let _ = fs::create_dir_all(&qdir);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(ulid);
        if fs::rename(path, qdir.join(&name)).is_err() {
            // Cross-device or already gone; last resort is removal so the
            // inbox stops tripping over it.
            let _ = fs::remove_file(path);
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, Inbox) {
        let dir = tempfile::tempdir().unwrap();
        let home = AlephHome::at(dir.path());
        home.ensure_layout().unwrap();
        (dir, Inbox::new(home))
    }

    // ── Delivery ──────────────────────────────────────────────────────────────

    #[test]
    fn deliver_creates_exactly_one_file_with_matching_header() {
        let (dir, inbox) = fixture();
        let id = inbox
            .deliver("b", Draft::new("a", "hello").body("content"))
            .unwrap();

        let path = dir.path().join("inbox/b").join(format!("{id}.md"));
        assert!(path.is_file());
        let msg = Message::parse(&fs::read_to_string(&path).unwrap(), &path).unwrap();
        assert_eq!(msg.message_id, id);
        assert_eq!(msg.from, "a");
        assert_eq!(msg.recipient, Recipient::Direct("b".into()));
    }

    #[test]
    fn concurrent_deliveries_yield_distinct_files() {
        let (_dir, inbox) = fixture();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let inbox = inbox.clone();
                std::thread::spawn(move || {
                    (0..25)
                        .map(|j| {
                            inbox
                                .deliver("r", Draft::new("s", format!("m {i}/{j}")))
                                .unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut ids: Vec<String> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let n = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), n, "every delivery must get a unique id");
        assert_eq!(inbox.list_unread("r").unwrap().len(), n);
    }

    #[test]
    fn overlong_summary_is_refused() {
        let (_dir, inbox) = fixture();
        let result = inbox.deliver("b", Draft::new("a", "x".repeat(300)));
        assert!(matches!(result, Err(MailError::SummaryTooLong { .. })));
    }

    // ── Unread listing ────────────────────────────────────────────────────────

    #[test]
    fn unread_until_marked_then_gone() {
        let (_dir, inbox) = fixture();
        let id = inbox.deliver("b", Draft::new("a", "hi")).unwrap();
        assert_eq!(inbox.list_unread("b").unwrap().len(), 1);

        inbox.mark_read("b", &id).unwrap();
        assert!(inbox.list_unread("b").unwrap().is_empty());
    }

    #[test]
    fn mark_read_is_idempotent() {
        let (_dir, inbox) = fixture();
        let id = inbox.deliver("b", Draft::new("a", "hi")).unwrap();
        inbox.mark_read("b", &id).unwrap();
        inbox.mark_read("b", &id).unwrap();
        assert!(inbox.list_unread("b").unwrap().is_empty());
    }

    #[test]
    fn mark_all_read_empties_listing() {
        let (_dir, inbox) = fixture();
        let ids: Vec<String> = (0..5)
            .map(|i| inbox.deliver("b", Draft::new("a", format!("m{i}"))).unwrap())
            .collect();
        for id in &ids {
            inbox.mark_read("b", id).unwrap();
        }
        assert!(inbox.list_unread("b").unwrap().is_empty());
    }

    #[test]
    fn listing_sorts_priority_desc_then_timestamp_asc() {
        let (_dir, inbox) = fixture();
        inbox
            .deliver("b", Draft::new("a", "first-low").priority(Priority::Low))
            .unwrap();
        inbox
            .deliver("b", Draft::new("a", "then-high").priority(Priority::High))
            .unwrap();
        inbox
            .deliver("b", Draft::new("a", "then-normal"))
            .unwrap();
        inbox
            .deliver("b", Draft::new("a", "late-high").priority(Priority::High))
            .unwrap();

        let summaries: Vec<String> = inbox
            .list_unread("b")
            .unwrap()
            .into_iter()
            .map(|s| s.summary)
            .collect();
        assert_eq!(
            summaries,
            vec!["then-high", "late-high", "then-normal", "first-low"]
        );
    }

    #[test]
    fn empty_inbox_for_unknown_agent() {
        let (_dir, inbox) = fixture();
        assert!(inbox.list_unread("nobody").unwrap().is_empty());
    }

    // ── Quarantine ────────────────────────────────────────────────────────────

    #[test]
    fn malformed_file_is_quarantined_not_fatal() {
        let (dir, inbox) = fixture();
        inbox.deliver("b", Draft::new("a", "good")).unwrap();
        fs::write(dir.path().join("inbox/b/zzzz.md"), "not a message").unwrap();

        let listed = inbox.list_unread("b").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].summary, "good");
        assert!(dir.path().join("quarantine/zzzz.md").is_file());
        // Second listing no longer trips over it.
        assert_eq!(inbox.list_unread("b").unwrap().len(), 1);
    }

    // ── Prune ─────────────────────────────────────────────────────────────────

    #[test]
    fn prune_removes_only_read_messages() {
        let (_dir, inbox) = fixture();
        let read_id = inbox.deliver("b", Draft::new("a", "old-read")).unwrap();
        inbox.deliver("b", Draft::new("a", "unread")).unwrap();
        inbox.mark_read("b", &read_id).unwrap();

        let removed = inbox
            .prune(
                "b",
                PrunePolicy {
                    older_than: chrono::Duration::zero(),
                    max_count: 0,
                },
            )
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(inbox.list_unread("b").unwrap().len(), 1);
    }

    #[test]
    fn prune_enforces_max_count_oldest_first() {
        let (_dir, inbox) = fixture();
        let ids: Vec<String> = (0..4)
            .map(|i| inbox.deliver("b", Draft::new("a", format!("m{i}"))).unwrap())
            .collect();
        for id in &ids {
            inbox.mark_read("b", id).unwrap();
        }
        let removed = inbox
            .prune(
                "b",
                PrunePolicy {
                    older_than: chrono::Duration::days(365),
                    max_count: 2,
                },
            )
            .unwrap();
        assert_eq!(removed, 2);
        // The two newest read messages survive.
        assert!(inbox.read("b", &ids[3]).is_ok());
        assert!(inbox.read("b", &ids[2]).is_ok());
        assert!(inbox.read("b", &ids[0]).is_err());
    }

    #[test]
    fn delivery_interleaves_with_prune() {
        let (_dir, inbox) = fixture();
        let id = inbox.deliver("b", Draft::new("a", "keep")).unwrap();
        inbox.mark_read("b", &id).unwrap();

        let pruner = {
            let inbox = inbox.clone();
            std::thread::spawn(move || {
                inbox
                    .prune(
                        "b",
                        PrunePolicy {
                            older_than: chrono::Duration::zero(),
                            max_count: 0,
                        },
                    )
                    .unwrap()
            })
        };
        // Delivery takes no lock, so this cannot deadlock with the prune.
        inbox.deliver("b", Draft::new("a", "during")).unwrap();
        pruner.join().unwrap();
        assert_eq!(inbox.list_unread("b").unwrap().len(), 1);
    }
}
