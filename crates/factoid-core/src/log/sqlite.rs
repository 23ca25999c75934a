//! SqliteLog - append-only record log on SQLite in WAL mode
//!
//! Each append is a single INSERT, so a crash leaves either the whole
//! snapshot or nothing. Replay reads rows by `seq`, which is assigned by
//! AUTOINCREMENT and therefore matches write order regardless of the clock.

use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;

use super::{sorted_entries, LogEntry, RecordLog};
use crate::error::StorageError;
use crate::record::Record;

/// SQLite-backed [`RecordLog`]
pub struct SqliteLog {
    conn: Connection,
}

impl std::fmt::Debug for SqliteLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteLog")
            .field("path", &self.conn.path())
            .finish()
    }
}

impl SqliteLog {
    /// Open (or create) the database. `":memory:"` gives a throwaway log.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        // WAL: readers never block the single writer
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        let log = Self { conn };
        log.migrate()?;
        tracing::debug!(path = %path.display(), "sqlite record log opened");
        Ok(log)
    }

    fn migrate(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS records (
                seq           INTEGER PRIMARY KEY AUTOINCREMENT,
                key           TEXT NOT NULL,
                snapshot_json TEXT NOT NULL,
                written_at_ms INTEGER NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    fn insert(&self, key: &str, record: &Record) -> Result<(), StorageError> {
        let snapshot_json = serde_json::to_string(record)?;
        let written_at_ms = chrono::Utc::now().timestamp_millis();
        self.conn.execute(
            "INSERT INTO records (key, snapshot_json, written_at_ms) VALUES (?1, ?2, ?3)",
            params![key, snapshot_json, written_at_ms],
        )?;
        Ok(())
    }
}

impl RecordLog for SqliteLog {
    fn replay(&mut self) -> Result<Vec<LogEntry>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT seq, key, snapshot_json FROM records ORDER BY seq ASC")?;

        let rows = stmt.query_map([], |row| {
            let seq: i64 = row.get(0)?;
            let key: String = row.get(1)?;
            let json: String = row.get(2)?;
            Ok((seq, key, json))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (seq, key, json) = row?;
            let record: Record =
                serde_json::from_str(&json).map_err(|e| StorageError::Corrupt {
                    line: seq as usize,
                    reason: e.to_string(),
                })?;
            entries.push(LogEntry { key, record });
        }
        Ok(entries)
    }

    fn append(&mut self, key: &str, record: &Record) -> Result<(), StorageError> {
        self.insert(key, record)
    }

    fn compact(&mut self, live: &HashMap<String, Record>) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM records", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO records (key, snapshot_json, written_at_ms) VALUES (?1, ?2, ?3)",
            )?;
            let written_at_ms = chrono::Utc::now().timestamp_millis();
            for entry in sorted_entries(live) {
                let snapshot_json = serde_json::to_string(&entry.record)?;
                stmt.execute(params![entry.key, snapshot_json, written_at_ms])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn len(&self) -> Result<usize, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::fold;
    use crate::record::Intent;

    fn temp_log() -> SqliteLog {
        SqliteLog::open(":memory:").expect("in-memory SQLite should open")
    }

    #[test]
    fn test_append_and_replay_in_order() {
        let mut log = temp_log();
        let first = Record::content(Intent::Say, "one", "u1", false);
        let second = Record::tombstone(Some("u2".into()), true);

        log.append("greeting", &first).unwrap();
        log.append("greeting", &second).unwrap();

        let entries = log.replay().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].record, first);
        assert_eq!(entries[1].record, second);
        assert_eq!(fold(entries)["greeting"], second);
    }

    #[test]
    fn test_compaction_keeps_latest_per_key() {
        let mut log = temp_log();
        let record = Record::content(Intent::Say, "hi", "u1", false);
        for _ in 0..5 {
            log.append("a", &record).unwrap();
        }
        log.append("b", &record).unwrap();
        assert_eq!(log.len().unwrap(), 6);

        let live = fold(log.replay().unwrap());
        log.compact(&live).unwrap();

        assert_eq!(log.len().unwrap(), 2);
        assert_eq!(fold(log.replay().unwrap()), live);
    }

    #[test]
    fn test_reopen_replays_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("factoid.db");
        let record = Record::content(Intent::Act, "waves", "u1", true);

        {
            let mut log = SqliteLog::open(&path).unwrap();
            log.append("wave", &record).unwrap();
        }

        let mut reopened = SqliteLog::open(&path).unwrap();
        let entries = reopened.replay().unwrap();
        assert_eq!(entries, vec![LogEntry { key: "wave".into(), record }]);
    }

    #[test]
    fn test_unparseable_snapshot_is_corrupt() {
        let mut log = temp_log();
        log.conn
            .execute(
                "INSERT INTO records (key, snapshot_json, written_at_ms) VALUES ('a', '{', 0)",
                [],
            )
            .unwrap();
        assert!(matches!(log.replay(), Err(StorageError::Corrupt { line: 1, .. })));
    }
}
