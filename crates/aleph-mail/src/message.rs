// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::MailError;

/// Hard cap on the `summary` frontmatter field.
pub const MAX_SUMMARY_CHARS: usize = 200;

/// Message urgency.  Ordering is `Low < Normal < High` so a descending sort
/// puts urgent mail first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = MailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            other => Err(MailError::UnknownPriority(other.to_string())),
        }
    }
}

/// Where a message was addressed.  Direct messages carry a `to:` key,
/// channel fan-out copies carry `channel:` — exactly one of the two, which
/// this enum makes unrepresentable rather than validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Direct(String),
    Channel(String),
}

/// A parsed message file: YAML frontmatter header + markdown body.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub message_id: String,
    pub from: String,
    pub recipient: Recipient,
    pub summary: String,
    pub priority: Priority,
    pub timestamp: DateTime<Utc>,
    pub body: String,
    /// Frontmatter keys this version does not know.  Kept so that
    /// reserialising a file written by a newer aleph does not lose them.
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// What a sender provides; `Inbox::deliver` fills in id and timestamp.
#[derive(Debug, Clone)]
pub struct Draft {
    pub from: String,
    pub summary: String,
    pub priority: Priority,
    pub body: String,
}

impl Draft {
    pub fn new(from: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            summary: summary.into(),
            priority: Priority::Normal,
            body: String::new(),
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }
}

impl Message {
    /// Validate invariants enforced at construction time.
    pub fn validate(&self) -> Result<(), MailError> {
        if self.summary.chars().count() > MAX_SUMMARY_CHARS {
            return Err(MailError::SummaryTooLong {
                max: MAX_SUMMARY_CHARS,
            });
        }
        Ok(())
    }

    /// Serialise to the on-disk form.  Known keys are written in a fixed
    /// order so that parse → serialise round-trips byte-for-byte; unknown
    /// keys follow in sorted order.
    pub fn to_file_string(&self) -> String {
        let mut map = serde_yaml::Mapping::new();
        let yk = |s: &str| serde_yaml::Value::String(s.to_string());
        map.insert(yk("from"), yk(&self.from));
        match &self.recipient {
            Recipient::Direct(to) => map.insert(yk("to"), yk(to)),
            Recipient::Channel(name) => map.insert(yk("channel"), yk(name)),
        };
        map.insert(yk("summary"), yk(&self.summary));
        map.insert(yk("priority"), yk(self.priority.as_str()));
        map.insert(
            yk("timestamp"),
            yk(&self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        map.insert(yk("message_id"), yk(&self.message_id));
        for (k, v) in &self.extra {
            map.insert(yk(k), v.clone());
        }

        // serde_yaml preserves mapping insertion order.
        let header = serde_yaml::to_string(&serde_yaml::Value::Mapping(map))
            .unwrap_or_default();
        format!("---\n{header}---\n{}", self.body)
    }

    /// Parse a message file.  Unknown frontmatter keys are collected, not
    /// rejected; missing required keys or a malformed header fail with
    /// [`MailError::Malformed`].
    pub fn parse(text: &str, path: &Path) -> Result<Self, MailError> {
        let malformed = |message: &str| MailError::Malformed {
            path: path.to_path_buf(),
            message: message.to_string(),
        };

        let rest = text
            .strip_prefix("---\n")
            .ok_or_else(|| malformed("missing opening frontmatter delimiter"))?;
        let close = rest
            .find("\n---\n")
            .ok_or_else(|| malformed("missing closing frontmatter delimiter"))?;
        let header_src = &rest[..close + 1];
        let body = &rest[close + "\n---\n".len()..];

        let mapping: serde_yaml::Mapping = serde_yaml::from_str(header_src)
            .map_err(|e| malformed(&format!("invalid yaml header: {e}")))?;

        let mut from = None;
        let mut to = None;
        let mut channel = None;
        let mut summary = None;
        let mut priority = None;
        let mut timestamp = None;
        let mut message_id = None;
        let mut extra = BTreeMap::new();

        for (k, v) in mapping {
            let key = match k.as_str() {
                Some(k) => k.to_string(),
                None => continue,
            };
            let as_string = |v: &serde_yaml::Value| -> Option<String> {
                v.as_str().map(|s| s.to_string())
            };
            match key.as_str() {
                "from" => from = as_string(&v),
                "to" => to = as_string(&v),
                "channel" => channel = as_string(&v),
                "summary" => summary = as_string(&v),
                "priority" => priority = as_string(&v),
                "timestamp" => timestamp = as_string(&v),
                "message_id" => message_id = as_string(&v),
                _ => {
                    extra.insert(key, v);
                }
            }
        }

        let recipient = match (to, channel) {
            (Some(to), None) => Recipient::Direct(to),
            (None, Some(ch)) => Recipient::Channel(ch),
            (Some(_), Some(_)) => return Err(malformed("both 'to' and 'channel' set")),
            (None, None) => return Err(malformed("neither 'to' nor 'channel' set")),
        };

        let timestamp = timestamp
            .ok_or_else(|| malformed("missing 'timestamp'"))
            .and_then(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| malformed(&format!("bad timestamp: {e}")))
            })?;

        let priority = priority
            .ok_or_else(|| malformed("missing 'priority'"))?
            .parse::<Priority>()?;

        Ok(Self {
            message_id: message_id.ok_or_else(|| malformed("missing 'message_id'"))?,
            from: from.ok_or_else(|| malformed("missing 'from'"))?,
            recipient,
            summary: summary.ok_or_else(|| malformed("missing 'summary'"))?,
            priority,
            timestamp,
            body: body.to_string(),
            extra,
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
