//! Pluggable authorization and pre-commit policies
//!
//! The store is handed an [`EditorAuthority`] and an [`UpdatePolicy`] at
//! construction. Both are async so deployments can ask a remote service
//! (channel moderators, a permissions API) without blocking the store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::record::{Intent, Record};

/// Decides whether an editor may change frozen records
#[async_trait]
pub trait EditorAuthority: Send + Sync {
    /// Must be safe to call repeatedly and concurrently.
    async fn is_editor_admin(&self, editor: &str) -> bool;
}

/// Inspects a candidate record before it is persisted
#[async_trait]
pub trait UpdatePolicy: Send + Sync {
    async fn before_update(&self, candidate: Record) -> Result<Record, PolicyRejection>;
}

/// Reason a pre-commit hook refused a record. Opaque to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{reason}")]
pub struct PolicyRejection {
    pub reason: String,
}

impl PolicyRejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Nobody may edit frozen records
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAdmins;

#[async_trait]
impl EditorAuthority for NoAdmins {
    async fn is_editor_admin(&self, _editor: &str) -> bool {
        false
    }
}

/// Fixed allowlist of privileged editor identities
#[derive(Debug, Clone, Default)]
pub struct AdminList {
    admins: HashSet<String>,
}

impl AdminList {
    pub fn new<I, S>(admins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            admins: admins.into_iter().map(Into::into).collect(),
        }
    }

    /// Add an identity
    pub fn allow(&mut self, editor: impl Into<String>) {
        let editor = editor.into();
        tracing::info!(editor = %editor, "editor granted admin");
        self.admins.insert(editor);
    }

    pub fn len(&self) -> usize {
        self.admins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.admins.is_empty()
    }
}

#[async_trait]
impl EditorAuthority for AdminList {
    async fn is_editor_admin(&self, editor: &str) -> bool {
        self.admins.contains(editor)
    }
}

/// Accepts every record unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

#[async_trait]
impl UpdatePolicy for AcceptAll {
    async fn before_update(&self, candidate: Record) -> Result<Record, PolicyRejection> {
        Ok(candidate)
    }
}

/// Rejects `say` replies that would be read as a command by the platform
/// (leading `!` or `/`).
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandPrefixFilter;

impl CommandPrefixFilter {
    const PREFIXES: [char; 2] = ['!', '/'];

    fn looks_like_command(message: &str) -> bool {
        message.trim_start().starts_with(&Self::PREFIXES[..])
    }
}

#[async_trait]
impl UpdatePolicy for CommandPrefixFilter {
    async fn before_update(&self, candidate: Record) -> Result<Record, PolicyRejection> {
        if candidate.intent == Some(Intent::Say) {
            if let Some(message) = candidate.message.as_deref() {
                if Self::looks_like_command(message) {
                    return Err(PolicyRejection::new(
                        "replies may not start with '!' or '/' on this platform",
                    ));
                }
            }
        }
        Ok(candidate)
    }
}
