// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Inter-agent mail: message files with YAML frontmatter, per-agent inbox
//! directories, and named pub/sub channels.
//!
//! Delivery is lock-free — each message gets a unique sortable id and lands
//! via atomic rename — so senders never block each other.  Read-tracking is
//! a sidecar file per message.  Semantics are at-least-once: a message stays
//! visible to the delivery machinery until its recipient marks it read, and
//! readers deduplicate on `message_id`.

mod channel;
mod error;
mod inbox;
mod message;

pub use channel::{BroadcastReceipt, Channels, HistoryEntry};
pub use error::MailError;
pub use inbox::{Inbox, MessageSummary, PrunePolicy};
pub use message::{Draft, Message, Priority, Recipient};
