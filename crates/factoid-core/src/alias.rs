//! Alias resolution
//!
//! Follows alias records to their terminal content with an explicit,
//! depth-bounded loop. There is no cycle detection: a cycle shorter than the
//! bound is re-traversed until the bound is hit.

use crate::error::{Result, StoreError};
use crate::key::Key;
use crate::record::{Intent, Record, Reply};

/// Default bound on alias hops
pub const DEFAULT_MAX_ALIAS_DEPTH: usize = 3;

/// Depth-bounded alias traversal over a raw record lookup
#[derive(Debug, Clone, Copy)]
pub struct AliasResolver {
    max_depth: usize,
}

impl Default for AliasResolver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ALIAS_DEPTH)
    }
}

impl AliasResolver {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Resolve `key` to its terminal reply.
    ///
    /// `lookup` receives normalized keys and returns the raw record, if any.
    /// The depth counter is incremented on every alias hop and resolution
    /// fails with [`StoreError::MaxAliasDepthReached`] as soon as it reaches
    /// the bound, before another lookup is attempted.
    pub fn resolve<F>(&self, key: &str, mut lookup: F) -> Result<Reply>
    where
        F: FnMut(&str) -> Option<Record>,
    {
        let mut depth = 0usize;
        let mut current = Key::normalize(key);

        loop {
            let reply = lookup(&current)
                .and_then(|record| record.reply())
                .ok_or(StoreError::NoReply)?;

            if reply.intent != Intent::Alias {
                return Ok(reply);
            }

            depth += 1;
            if depth >= self.max_depth {
                tracing::debug!(key = %key, depth, "alias depth bound reached");
                return Err(StoreError::MaxAliasDepthReached);
            }

            tracing::debug!(from = %current, to = %reply.message, depth, "following alias");
            current = Key::normalize(&reply.message);
        }
    }
}
