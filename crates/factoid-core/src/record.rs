//! Record model
//!
//! A [`Record`] is the full snapshot stored for a key. Every mutation writes
//! a new snapshot; deletion writes a tombstone (no intent, no message) that
//! keeps the `frozen` flag so a lock outlives the content it protected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How a reply is delivered, or `Alias` when the message names another key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    /// Plain message
    Say,
    /// Action / emote
    Act,
    /// `message` holds the target key
    Alias,
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Intent::Say => write!(f, "say"),
            Intent::Act => write!(f, "act"),
            Intent::Alias => write!(f, "alias"),
        }
    }
}

impl FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "say" => Ok(Intent::Say),
            "act" => Ok(Intent::Act),
            "alias" => Ok(Intent::Alias),
            other => Err(format!("unknown intent '{}'", other)),
        }
    }
}

/// Stored snapshot for a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Absent on a tombstone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,

    /// Absent on a tombstone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Identity of the last writer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor: Option<String>,

    /// Time of last modification
    pub time: DateTime<Utc>,

    #[serde(default)]
    pub frozen: bool,
}

impl Record {
    /// A content record stamped with the current time
    pub fn content(
        intent: Intent,
        message: impl Into<String>,
        editor: impl Into<String>,
        frozen: bool,
    ) -> Self {
        Self {
            intent: Some(intent),
            message: Some(message.into()),
            editor: Some(editor.into()),
            time: Utc::now(),
            frozen,
        }
    }

    /// A tombstone stamped with the current time
    pub fn tombstone(editor: Option<String>, frozen: bool) -> Self {
        Self {
            intent: None,
            message: None,
            editor,
            time: Utc::now(),
            frozen,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        !self.has_content()
    }

    pub fn has_content(&self) -> bool {
        self.intent.is_some() && self.message.is_some()
    }

    pub fn is_alias(&self) -> bool {
        self.intent == Some(Intent::Alias)
    }

    /// Intent and message, if this record holds content
    pub fn reply(&self) -> Option<Reply> {
        match (self.intent, &self.message) {
            (Some(intent), Some(message)) => Some(Reply {
                intent,
                message: message.clone(),
            }),
            _ => None,
        }
    }

    /// Same record with a new `frozen` flag and timestamp
    pub fn with_frozen(&self, frozen: bool) -> Self {
        Self {
            frozen,
            time: Utc::now(),
            ..self.clone()
        }
    }
}

/// Input of [`Store::set`](crate::Store::set)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub intent: Intent,
    pub message: String,
    pub editor: String,
}

impl NewRecord {
    pub fn new(intent: Intent, message: impl Into<String>, editor: impl Into<String>) -> Self {
        Self {
            intent,
            message: message.into(),
            editor: editor.into(),
        }
    }

    pub fn say(message: impl Into<String>, editor: impl Into<String>) -> Self {
        Self::new(Intent::Say, message, editor)
    }

    pub fn act(message: impl Into<String>, editor: impl Into<String>) -> Self {
        Self::new(Intent::Act, message, editor)
    }

    pub fn alias(target: impl Into<String>, editor: impl Into<String>) -> Self {
        Self::new(Intent::Alias, target, editor)
    }
}

/// Terminal content returned by [`Store::get`](crate::Store::get)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub intent: Intent,
    pub message: String,
}
