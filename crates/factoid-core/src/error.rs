//! Error types for Factoid Core
//!
//! Expected outcomes of store operations (a missing reply, a frozen record,
//! a no-op edit) are data in [`StoreError`], not panics. Storage failures are
//! wrapped in [`StorageError`] and must stop the caller from serving further.

use thiserror::Error;

use crate::policy::PolicyRejection;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Main error type for store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// No content record exists at the (terminal) key
    #[error("no reply stored for this key")]
    NoReply,

    /// Alias resolution hit the configured depth bound
    #[error("maximum alias depth reached")]
    MaxAliasDepthReached,

    /// The record is frozen and the editor is not privileged
    #[error("record is frozen")]
    Frozen,

    /// Keys may not contain `@`
    #[error("key must not contain '@'")]
    AtSymbolInKey,

    /// Key is empty after normalization
    #[error("key must not be empty")]
    EmptyKey,

    /// Delete or replace on a key without content
    #[error("no record exists for this key")]
    DoesNotExist,

    /// Substitution produced the input text
    #[error("substitution left the message unchanged")]
    Unchanged,

    /// Substitution produced an empty message
    #[error("substitution would leave no message; delete the key instead")]
    NoMessageLeft,

    /// Pattern source or flags could not be compiled
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    /// The pre-commit hook refused the candidate record
    #[error("rejected by policy: {0}")]
    RejectedByPolicy(#[from] PolicyRejection),

    /// Durable log failure; the store instance must not keep serving
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration could not be loaded or is out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StoreError {
    /// True for outcomes a chat user can cause and recover from.
    ///
    /// Storage and configuration failures return `false`: the caller should
    /// halt rather than keep serving from a store that may have diverged
    /// from its log.
    pub fn is_user_error(&self) -> bool {
        !matches!(self, Self::Storage(_) | Self::InvalidConfig(_))
    }
}

/// Errors raised by durable log backends
#[derive(Error, Debug)]
pub enum StorageError {
    /// SQLite errors
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO errors
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A log entry that is not the trailing one failed to parse
    #[error("corrupt log entry at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    /// An earlier write failed; the store no longer accepts mutations
    #[error("store is read-only after an earlier log failure")]
    Poisoned,
}
