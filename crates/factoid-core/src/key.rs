//! Key normalization

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// A normalized, validated record key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key(String);

impl Key {
    /// Normalize and validate a key for writing.
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = Self::normalize(raw);
        if normalized.contains('@') {
            return Err(StoreError::AtSymbolInKey);
        }
        if normalized.is_empty() {
            return Err(StoreError::EmptyKey);
        }
        Ok(Self(normalized))
    }

    /// Normalize without validating. Reads and alias targets use this: an
    /// invalid key can never have been written, so a lookup just misses.
    pub fn normalize(raw: &str) -> String {
        raw.trim().to_lowercase()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
