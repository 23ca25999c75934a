//! JsonlLog - line-delimited JSON record log
//!
//! One `{"key": ..., "record": {...}}` object per line. On open the whole
//! file is replayed:
//! - a torn last line (crash mid-append) is truncated away and recovered
//! - an unparseable line followed by more lines fails closed with `Corrupt`
//!
//! A failed append is rolled back to the last complete line, so the next
//! append never lands on a fragment.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::{sorted_entries, LogEntry, RecordLog};
use crate::error::StorageError;
use crate::record::Record;

/// File-backed [`RecordLog`]
#[derive(Debug)]
pub struct JsonlLog {
    path: PathBuf,
    file: File,
    entries: usize,
    /// Byte length of the complete entries
    end: u64,
}

impl JsonlLog {
    /// Open (or create) the log, recovering from a torn trailing entry.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let mut log = Self {
            path,
            file,
            entries: 0,
            end: 0,
        };
        let (entries, truncate_to) = log.scan()?;
        if let Some(offset) = truncate_to {
            tracing::warn!(
                path = %log.path.display(),
                offset,
                "truncating torn tail from record log"
            );
            log.file.set_len(offset)?;
            log.file.sync_all()?;
        }
        log.entries = entries.len();
        log.end = log.file.metadata()?.len();
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse every line. Returns the entries and, when the last line is torn,
    /// the byte offset it starts at.
    fn scan(&mut self) -> Result<(Vec<LogEntry>, Option<u64>), StorageError> {
        let mut reader = self.file.try_clone()?;
        reader.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(reader);

        let mut entries = Vec::new();
        let mut offset: u64 = 0;
        let mut line_no = 0usize;
        let mut pending: Option<(usize, u64, String)> = None;

        loop {
            let mut buf = Vec::new();
            let read = reader.read_until(b'\n', &mut buf)?;
            if read == 0 {
                break;
            }
            line_no += 1;

            // A bad line with more data after it is not a torn tail.
            if let Some((line, _, reason)) = pending.take() {
                return Err(StorageError::Corrupt { line, reason });
            }

            let start = offset;
            offset += read as u64;

            let text = match std::str::from_utf8(&buf) {
                Ok(text) => text.trim(),
                Err(e) => {
                    pending = Some((line_no, start, e.to_string()));
                    continue;
                }
            };
            if text.is_empty() {
                continue;
            }

            // A line missing its newline was cut off mid-write.
            if !buf.ends_with(b"\n") {
                pending = Some((line_no, start, "missing line terminator".to_string()));
                continue;
            }

            match serde_json::from_str::<LogEntry>(text) {
                Ok(entry) => entries.push(entry),
                Err(e) => pending = Some((line_no, start, e.to_string())),
            }
        }

        Ok((entries, pending.map(|(_, start, _)| start)))
    }
}

impl RecordLog for JsonlLog {
    fn replay(&mut self) -> Result<Vec<LogEntry>, StorageError> {
        let (entries, torn) = self.scan()?;
        if let Some(offset) = torn {
            return Err(StorageError::Corrupt {
                line: entries.len() + 1,
                reason: format!("torn entry at byte {}", offset),
            });
        }
        Ok(entries)
    }

    fn append(&mut self, key: &str, record: &Record) -> Result<(), StorageError> {
        let entry = LogEntry {
            key: key.to_string(),
            record: record.clone(),
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        if self.file.metadata()?.len() > self.end {
            tracing::warn!(
                path = %self.path.display(),
                offset = self.end,
                "discarding partial entry left by a failed append"
            );
            self.file.set_len(self.end)?;
        }

        if let Err(e) = self.file.write_all(&line).and_then(|()| self.file.sync_data()) {
            // Best effort; the length check above retries on the next append.
            let _ = self.file.set_len(self.end);
            return Err(e.into());
        }
        self.end += line.len() as u64;
        self.entries += 1;
        Ok(())
    }

    fn compact(&mut self, live: &HashMap<String, Record>) -> Result<(), StorageError> {
        let tmp_path = self.path.with_extension("jsonl.compact");
        let entries = sorted_entries(live);
        {
            let mut tmp = File::create(&tmp_path)?;
            for entry in &entries {
                let mut line = serde_json::to_vec(entry)?;
                line.push(b'\n');
                tmp.write_all(&line)?;
            }
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        self.file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        self.entries = entries.len();
        self.end = self.file.metadata()?.len();
        tracing::info!(path = %self.path.display(), entries = self.entries, "record log compacted");
        Ok(())
    }

    fn len(&self) -> Result<usize, StorageError> {
        Ok(self.entries)
    }
}
