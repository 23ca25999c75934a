//! Durable record log
//!
//! The log is an append-only sequence of `(key, Record)` snapshots. Replaying
//! it in write order and keeping the last snapshot per key rebuilds the store.
//! Nothing is ever patched in place, so growth is unbounded unless
//! [`RecordLog::compact`] is called.
//!
//! # Backends
//!
//! ```text
//! ┌──────────────┬────────────────────────────┬─────────────────────────┐
//! │ SqliteLog    │ records table, WAL mode    │ one INSERT per append   │
//! │ JsonlLog     │ one JSON object per line   │ torn tail truncated     │
//! │ MemoryLog    │ Vec in memory              │ not durable             │
//! └──────────────┴────────────────────────────┴─────────────────────────┘
//! ```

pub mod jsonl;
pub mod sqlite;

pub use jsonl::JsonlLog;
pub use sqlite::SqliteLog;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::StorageError;
use crate::record::Record;

/// One appended snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub key: String,
    pub record: Record,
}

/// Append-only storage for record snapshots.
///
/// Implementations are driven by a single writer; the store serializes
/// access behind a mutex.
pub trait RecordLog: Send {
    /// All entries in write order
    fn replay(&mut self) -> Result<Vec<LogEntry>, StorageError>;

    /// Durably append one snapshot
    fn append(&mut self, key: &str, record: &Record) -> Result<(), StorageError>;

    /// Rewrite the log so it holds exactly `live`, one entry per key
    fn compact(&mut self, live: &HashMap<String, Record>) -> Result<(), StorageError>;

    /// Number of entries currently in the log
    fn len(&self) -> Result<usize, StorageError>;

    fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

/// Last-write-wins fold of a replayed log
pub fn fold(entries: Vec<LogEntry>) -> HashMap<String, Record> {
    let mut map = HashMap::with_capacity(entries.len());
    for entry in entries {
        map.insert(entry.key, entry.record);
    }
    map
}

/// Entries of `live` sorted by key, for deterministic compaction output
pub(crate) fn sorted_entries(live: &HashMap<String, Record>) -> Vec<LogEntry> {
    let mut entries: Vec<LogEntry> = live
        .iter()
        .map(|(key, record)| LogEntry {
            key: key.clone(),
            record: record.clone(),
        })
        .collect();
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    entries
}

/// Non-durable log kept in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    entries: Vec<LogEntry>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordLog for MemoryLog {
    fn replay(&mut self) -> Result<Vec<LogEntry>, StorageError> {
        Ok(self.entries.clone())
    }

    fn append(&mut self, key: &str, record: &Record) -> Result<(), StorageError> {
        self.entries.push(LogEntry {
            key: key.to_string(),
            record: record.clone(),
        });
        Ok(())
    }

    fn compact(&mut self, live: &HashMap<String, Record>) -> Result<(), StorageError> {
        self.entries = sorted_entries(live);
        Ok(())
    }

    fn len(&self) -> Result<usize, StorageError> {
        Ok(self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Intent;

    #[test]
    fn test_fold_keeps_last_snapshot() {
        let first = Record::content(Intent::Say, "one", "u1", false);
        let second = Record::content(Intent::Say, "two", "u2", true);
        let other = Record::tombstone(None, true);

        let map = fold(vec![
            LogEntry { key: "a".into(), record: first },
            LogEntry { key: "b".into(), record: other.clone() },
            LogEntry { key: "a".into(), record: second.clone() },
        ]);

        assert_eq!(map.len(), 2);
        assert_eq!(map["a"], second);
        assert_eq!(map["b"], other);
    }

    #[test]
    fn test_memory_log_compaction() {
        let mut log = MemoryLog::new();
        let record = Record::content(Intent::Act, "waves", "u1", false);
        log.append("a", &record).unwrap();
        log.append("a", &record.with_frozen(true)).unwrap();
        log.append("b", &record).unwrap();
        assert_eq!(log.len().unwrap(), 3);

        let live = fold(log.replay().unwrap());
        log.compact(&live).unwrap();
        assert_eq!(log.len().unwrap(), 2);
        assert_eq!(fold(log.replay().unwrap()), live);
    }
}
