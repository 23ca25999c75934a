//! Record Store
//!
//! Durable CRUD over [`Record`]s with frozen-record permission checks and a
//! pluggable pre-commit hook.
//!
//! Every mutation of a key runs under that key's async lock, from the lookup
//! of the previous record until the new snapshot is committed. The
//! authorization predicate is awaited while the lock is held, so the frozen
//! flag it was asked about is still the one in force when the write lands.
//! Mutations of different keys do not wait on each other.
//!
//! A failed log write leaves the store read-only: the in-memory map still
//! matches what was durably committed, but every later mutation fails with
//! [`StorageError::Poisoned`].
//!
//! # Example
//!
//! ```no_run
//! use factoid_core::{NewRecord, Store, StoreConfig};
//!
//! # async fn example() -> factoid_core::Result<()> {
//! let config = StoreConfig::default();
//! let store = Store::open(config.clone(), config.authority(), config.update_policy())?;
//! store.set("greeting", NewRecord::say("hi", "nick!user@host")).await?;
//! let reply = store.get("GREETING")?;
//! assert_eq!(reply.message, "hi");
//! # Ok(())
//! # }
//! ```

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

use crate::alias::AliasResolver;
use crate::config::StoreConfig;
use crate::error::{Result, StorageError, StoreError};
use crate::key::Key;
use crate::log::{fold, RecordLog};
use crate::policy::{EditorAuthority, UpdatePolicy};
use crate::record::{NewRecord, Record, Reply};
use crate::substitution::Pattern;

/// Persistent key → record store
pub struct Store {
    records: RwLock<HashMap<String, Record>>,
    log: Mutex<Box<dyn RecordLog>>,
    locks: KeyLocks,
    resolver: AliasResolver,
    authority: Arc<dyn EditorAuthority>,
    policy: Arc<dyn UpdatePolicy>,
    poisoned: AtomicBool,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("records", &self.records.read().len())
            .field("max_alias_depth", &self.resolver.max_depth())
            .field("poisoned", &self.is_poisoned())
            .finish()
    }
}

impl Store {
    /// Open the log described by `config` and rebuild the map from it.
    pub fn open(
        config: StoreConfig,
        authority: Arc<dyn EditorAuthority>,
        policy: Arc<dyn UpdatePolicy>,
    ) -> Result<Self> {
        config.validate()?;
        let log = config.open_log()?;
        Self::with_log(log, &config, authority, policy)
    }

    /// Build a store over an explicitly supplied log backend.
    pub fn with_log(
        mut log: Box<dyn RecordLog>,
        config: &StoreConfig,
        authority: Arc<dyn EditorAuthority>,
        policy: Arc<dyn UpdatePolicy>,
    ) -> Result<Self> {
        config.validate()?;
        let entries = log.replay()?;
        let replayed = entries.len();
        let records = fold(entries);
        tracing::info!(entries = replayed, keys = records.len(), "record log replayed");

        Ok(Self {
            records: RwLock::new(records),
            log: Mutex::new(log),
            locks: KeyLocks::default(),
            resolver: AliasResolver::new(config.max_alias_depth),
            authority,
            policy,
            poisoned: AtomicBool::new(false),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Resolve `key` through aliases to its terminal reply. Reads are
    /// unrestricted.
    pub fn get(&self, key: &str) -> Result<Reply> {
        let records = self.records.read();
        self.resolver.resolve(key, |k| records.get(k).cloned())
    }

    /// Raw record at `key`, tombstones included, without alias resolution
    pub fn record(&self, key: &str) -> Option<Record> {
        self.records.read().get(&Key::normalize(key)).cloned()
    }

    /// Sorted keys that currently hold content
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .records
            .read()
            .iter()
            .filter(|(_, record)| record.has_content())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of keys holding content
    pub fn len(&self) -> usize {
        self.records
            .read()
            .values()
            .filter(|record| record.has_content())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of snapshots in the durable log
    pub fn log_len(&self) -> Result<usize> {
        Ok(self.log.lock().len()?)
    }

    /// True once a log write has failed. Reads keep working.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Store new content at `key`, keeping the previous `frozen` flag.
    ///
    /// # Panics
    ///
    /// If `message` or `editor` is empty. Those are caller bugs, not user
    /// errors. The key is validated first, so an `@` key is reported as
    /// [`StoreError::AtSymbolInKey`] whatever the other fields hold.
    pub async fn set(&self, key: &str, new: NewRecord) -> Result<Record> {
        let key = Key::parse(key)?;
        assert!(!new.message.is_empty(), "set: message must not be empty");
        assert!(!new.editor.is_empty(), "set: editor must not be empty");

        self.ensure_writable()?;
        let _guard = self.locks.acquire(key.as_str()).await;

        let previous = self.lookup(&key);
        self.check_frozen(&key, previous.as_ref(), &new.editor).await?;

        let frozen = previous.as_ref().map_or(false, |record| record.frozen);
        let candidate = Record::content(new.intent, new.message, new.editor, frozen);
        let record = self.run_policy(&key, candidate).await?;

        self.commit(&key, record.clone())?;
        tracing::info!(
            key = %key,
            editor = record.editor.as_deref().unwrap_or_default(),
            intent = ?record.intent,
            frozen = record.frozen,
            "record set"
        );
        Ok(record)
    }

    /// Replace the content at `key` with a tombstone that keeps `frozen`.
    pub async fn delete(&self, key: &str, editor: &str) -> Result<()> {
        let key = Key::parse(key)?;
        self.ensure_writable()?;
        let _guard = self.locks.acquire(key.as_str()).await;

        let previous = self.lookup(&key);
        self.check_frozen(&key, previous.as_ref(), editor).await?;
        let previous = previous
            .filter(Record::has_content)
            .ok_or(StoreError::DoesNotExist)?;

        let tombstone = Record::tombstone(Some(editor.to_string()), previous.frozen);
        self.commit(&key, tombstone)?;
        tracing::info!(key = %key, editor, frozen = previous.frozen, "record deleted");
        Ok(())
    }

    /// Substitute `replacement` for `pattern` in the message at `key`.
    ///
    /// Fails with [`StoreError::Unchanged`] when the substitution is a no-op
    /// and [`StoreError::NoMessageLeft`] when it would empty the message.
    pub async fn replace(
        &self,
        key: &str,
        pattern: &Pattern,
        replacement: &str,
        editor: &str,
    ) -> Result<Record> {
        let key = Key::parse(key)?;
        self.ensure_writable()?;
        let _guard = self.locks.acquire(key.as_str()).await;

        let previous = self.lookup(&key);
        self.check_frozen(&key, previous.as_ref(), editor).await?;
        let previous = previous
            .filter(Record::has_content)
            .ok_or(StoreError::DoesNotExist)?;
        let (intent, message) = match (previous.intent, previous.message.as_deref()) {
            (Some(intent), Some(message)) => (intent, message),
            _ => return Err(StoreError::DoesNotExist),
        };

        let updated = pattern.apply(message, replacement);
        if updated == message {
            return Err(StoreError::Unchanged);
        }
        if updated.trim().is_empty() {
            return Err(StoreError::NoMessageLeft);
        }

        let candidate = Record::content(intent, updated, editor, previous.frozen);
        let record = self.run_policy(&key, candidate).await?;

        self.commit(&key, record.clone())?;
        tracing::info!(key = %key, editor, pattern = pattern.as_str(), "record replaced");
        Ok(record)
    }

    /// Set the frozen flag. A key without a record gets a frozen tombstone.
    ///
    /// Callers enforce their own authorization before calling this.
    pub async fn freeze(&self, key: &str) -> Result<Record> {
        let key = Key::parse(key)?;
        self.ensure_writable()?;
        let _guard = self.locks.acquire(key.as_str()).await;

        let record = match self.lookup(&key) {
            Some(previous) => previous.with_frozen(true),
            None => Record::tombstone(None, true),
        };
        self.commit(&key, record.clone())?;
        tracing::info!(key = %key, "record frozen");
        Ok(record)
    }

    /// Clear the frozen flag. Returns `false` when the key has no record.
    ///
    /// Callers enforce their own authorization before calling this.
    pub async fn unfreeze(&self, key: &str) -> Result<bool> {
        let key = Key::parse(key)?;
        self.ensure_writable()?;
        let _guard = self.locks.acquire(key.as_str()).await;

        let Some(previous) = self.lookup(&key) else {
            return Ok(false);
        };
        self.commit(&key, previous.with_frozen(false))?;
        tracing::info!(key = %key, "record unfrozen");
        Ok(true)
    }

    /// Rewrite the log to one snapshot per key.
    ///
    /// Holds the log mutex for the whole rewrite, so concurrent commits wait.
    pub fn compact(&self) -> Result<usize> {
        let mut log = self.log.lock();
        self.ensure_writable()?;
        let before = log.len()?;
        let records = self.records.read();
        if let Err(e) = log.compact(&records) {
            return Err(self.poison(e));
        }
        let after = log.len()?;
        tracing::info!(before, after, "record log compacted");
        Ok(before.saturating_sub(after))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    fn ensure_writable(&self) -> Result<()> {
        if self.is_poisoned() {
            return Err(StorageError::Poisoned.into());
        }
        Ok(())
    }

    fn poison(&self, error: StorageError) -> StoreError {
        self.poisoned.store(true, Ordering::Release);
        tracing::error!(error = %error, "record log write failed, store is now read-only");
        error.into()
    }

    fn lookup(&self, key: &Key) -> Option<Record> {
        self.records.read().get(key.as_str()).cloned()
    }

    /// Frozen-check: unfrozen or missing records are editable by anyone,
    /// frozen ones only by editors the authority vouches for.
    async fn check_frozen(&self, key: &Key, previous: Option<&Record>, editor: &str) -> Result<()> {
        let frozen = previous.map_or(false, |record| record.frozen);
        if !frozen {
            return Ok(());
        }
        if self.authority.is_editor_admin(editor).await {
            tracing::debug!(key = %key, editor, "frozen record edit authorized");
            Ok(())
        } else {
            tracing::warn!(key = %key, editor, "edit of frozen record denied");
            Err(StoreError::Frozen)
        }
    }

    async fn run_policy(&self, key: &Key, candidate: Record) -> Result<Record> {
        self.policy.before_update(candidate).await.map_err(|rejection| {
            tracing::warn!(key = %key, reason = %rejection, "record rejected by policy");
            StoreError::RejectedByPolicy(rejection)
        })
    }

    /// Append to the log, then publish in memory. The map only changes after
    /// the append succeeded.
    fn commit(&self, key: &Key, record: Record) -> Result<()> {
        let mut log = self.log.lock();
        // Another key's commit may have failed while this one was waiting.
        self.ensure_writable()?;
        if let Err(e) = log.append(key.as_str(), &record) {
            return Err(self.poison(e));
        }
        self.records.write().insert(key.as_str().to_string(), record);
        Ok(())
    }
}

/// Per-key async mutexes. Entries are dropped once no guard references them.
#[derive(Default)]
struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

struct KeyGuard<'a> {
    owner: &'a KeyLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLocks {
    async fn acquire(&self, key: &str) -> KeyGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock();
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let guard = lock.lock_owned().await;
        KeyGuard {
            owner: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.owner.locks.lock();
        // Only the map itself still holds the mutex: nobody is waiting.
        if locks
            .get(&self.key)
            .map_or(false, |lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{LogEntry, MemoryLog};
    use crate::policy::{AcceptAll, AdminList, CommandPrefixFilter, NoAdmins};
    use crate::record::Intent;

    fn store_with(authority: Arc<dyn EditorAuthority>) -> Store {
        Store::with_log(
            Box::new(MemoryLog::new()),
            &StoreConfig::default(),
            authority,
            Arc::new(AcceptAll),
        )
        .unwrap()
    }

    fn store() -> Store {
        store_with(Arc::new(NoAdmins))
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let store = store();
        store.set("Foo", NewRecord::act("waves", "u1")).await.unwrap();

        let reply = store.get("foo").unwrap();
        assert_eq!(reply.intent, Intent::Act);
        assert_eq!(reply.message, "waves");
        assert_eq!(store.keys(), vec!["foo".to_string()]);
    }

    #[tokio::test]
    async fn test_set_rejects_at_symbol_key() {
        let store = store();
        let err = store.set("a@b", NewRecord::say("hi", "u1")).await.unwrap_err();
        assert!(matches!(err, StoreError::AtSymbolInKey));
        assert!(store.is_empty());
    }

    #[tokio::test]
    #[should_panic(expected = "message must not be empty")]
    async fn test_set_with_empty_message_panics() {
        let store = store();
        let _ = store.set("a", NewRecord::say("", "u1")).await;
    }

    #[tokio::test]
    #[should_panic(expected = "editor must not be empty")]
    async fn test_set_with_empty_editor_panics() {
        let store = store();
        let _ = store.set("a", NewRecord::say("hi", "")).await;
    }

    #[tokio::test]
    async fn test_delete_leaves_tombstone() {
        let store = store();
        store.set("a", NewRecord::say("hi", "u1")).await.unwrap();
        store.delete("A", "u2").await.unwrap();

        assert!(matches!(store.get("a"), Err(StoreError::NoReply)));
        let stone = store.record("a").unwrap();
        assert!(stone.is_tombstone());
        assert_eq!(stone.editor.as_deref(), Some("u2"));

        let err = store.delete("a", "u2").await.unwrap_err();
        assert!(matches!(err, StoreError::DoesNotExist));
    }

    #[tokio::test]
    async fn test_replace_outcomes() {
        let store = store();
        store.set("a", NewRecord::say("hello", "u1")).await.unwrap();

        let pattern = Pattern::new("l", "").unwrap();
        let record = store.replace("a", &pattern, "L", "u2").await.unwrap();
        assert_eq!(record.message.as_deref(), Some("heLlo"));
        assert_eq!(record.intent, Some(Intent::Say));
        assert_eq!(record.editor.as_deref(), Some("u2"));

        let same = Pattern::new("e", "").unwrap();
        let err = store.replace("a", &same, "e", "u2").await.unwrap_err();
        assert!(matches!(err, StoreError::Unchanged));

        let all = Pattern::new(".*", "").unwrap();
        let err = store.replace("a", &all, "", "u2").await.unwrap_err();
        assert!(matches!(err, StoreError::NoMessageLeft));

        let err = store.replace("missing", &pattern, "L", "u2").await.unwrap_err();
        assert!(matches!(err, StoreError::DoesNotExist));
        assert_eq!(store.get("a").unwrap().message, "heLlo");
    }

    #[tokio::test]
    async fn test_frozen_gate() {
        let store = store_with(Arc::new(AdminList::new(["admin"])));
        store.set("a", NewRecord::say("hi", "u1")).await.unwrap();
        store.freeze("a").await.unwrap();

        let err = store.set("a", NewRecord::say("nope", "u1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Frozen));
        let err = store.delete("a", "u1").await.unwrap_err();
        assert!(matches!(err, StoreError::Frozen));

        let record = store.set("a", NewRecord::say("yes", "admin")).await.unwrap();
        assert!(record.frozen);
        assert_eq!(store.get("a").unwrap().message, "yes");

        store.delete("a", "admin").await.unwrap();
        assert!(store.record("a").unwrap().frozen);
    }

    #[tokio::test]
    async fn test_freeze_missing_key_creates_frozen_tombstone() {
        let store = store();
        let record = store.freeze("reserved").await.unwrap();
        assert!(record.is_tombstone());
        assert!(record.frozen);

        let err = store.set("reserved", NewRecord::say("hi", "u1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Frozen));
    }

    #[tokio::test]
    async fn test_unfreeze() {
        let store = store();
        assert!(!store.unfreeze("missing").await.unwrap());

        store.set("a", NewRecord::say("hi", "u1")).await.unwrap();
        store.freeze("a").await.unwrap();
        assert!(store.unfreeze("a").await.unwrap());
        assert!(!store.record("a").unwrap().frozen);
        store.set("a", NewRecord::say("edited", "u2")).await.unwrap();
    }

    #[tokio::test]
    async fn test_policy_rejection_does_not_persist() {
        let store = Store::with_log(
            Box::new(MemoryLog::new()),
            &StoreConfig::default(),
            Arc::new(NoAdmins),
            Arc::new(CommandPrefixFilter),
        )
        .unwrap();

        let err = store.set("a", NewRecord::say("!kick", "u1")).await.unwrap_err();
        assert!(matches!(err, StoreError::RejectedByPolicy(_)));
        assert!(store.record("a").is_none());
        assert_eq!(store.log_len().unwrap(), 0);

        store.set("a", NewRecord::say("kick", "u1")).await.unwrap();
        let pattern = Pattern::new("^", "").unwrap();
        let err = store.replace("a", &pattern, "!", "u1").await.unwrap_err();
        assert!(matches!(err, StoreError::RejectedByPolicy(_)));
        assert_eq!(store.get("a").unwrap().message, "kick");
    }

    #[tokio::test]
    async fn test_every_mutation_appends_a_snapshot() {
        let store = store();
        store.set("a", NewRecord::say("hello", "u1")).await.unwrap();
        store.replace("a", &Pattern::new("h", "").unwrap(), "j", "u1").await.unwrap();
        store.freeze("a").await.unwrap();
        store.unfreeze("a").await.unwrap();
        store.delete("a", "u1").await.unwrap();
        assert_eq!(store.log_len().unwrap(), 5);

        assert_eq!(store.compact().unwrap(), 4);
        assert_eq!(store.log_len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_at_key_reported_before_field_checks() {
        let store = store();
        let err = store.set("a@b", NewRecord::say("", "")).await.unwrap_err();
        assert!(matches!(err, StoreError::AtSymbolInKey));
    }

    #[tokio::test]
    async fn test_whitespace_only_result_leaves_no_message() {
        let store = store();
        store.set("a", NewRecord::say("a b", "u1")).await.unwrap();

        let words = Pattern::new(r"\w", "g").unwrap();
        let err = store.replace("a", &words, "", "u1").await.unwrap_err();
        assert!(matches!(err, StoreError::NoMessageLeft));
        assert_eq!(store.get("a").unwrap().message, "a b");
    }

    #[tokio::test]
    async fn test_replacement_keeps_unknown_references() {
        let store = store();
        store.set("price", NewRecord::say("costs 5 dollars", "u1")).await.unwrap();

        let pattern = Pattern::parse("/5 dollars/").unwrap();
        let record = store.replace("price", &pattern, "$5", "u1").await.unwrap();
        assert_eq!(record.message.as_deref(), Some("costs $5"));
    }

    /// Memory log whose appends fail while `failing` is set
    struct FlakyLog {
        inner: MemoryLog,
        failing: Arc<AtomicBool>,
    }

    impl RecordLog for FlakyLog {
        fn replay(&mut self) -> std::result::Result<Vec<LogEntry>, StorageError> {
            self.inner.replay()
        }

        fn append(&mut self, key: &str, record: &Record) -> std::result::Result<(), StorageError> {
            if self.failing.load(Ordering::SeqCst) {
                let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
                return Err(StorageError::Io(io));
            }
            self.inner.append(key, record)
        }

        fn compact(
            &mut self,
            live: &HashMap<String, Record>,
        ) -> std::result::Result<(), StorageError> {
            self.inner.compact(live)
        }

        fn len(&self) -> std::result::Result<usize, StorageError> {
            self.inner.len()
        }
    }

    #[tokio::test]
    async fn test_failed_append_makes_store_read_only() {
        let failing = Arc::new(AtomicBool::new(false));
        let log = FlakyLog {
            inner: MemoryLog::new(),
            failing: failing.clone(),
        };
        let store = Store::with_log(
            Box::new(log),
            &StoreConfig::default(),
            Arc::new(NoAdmins),
            Arc::new(AcceptAll),
        )
        .unwrap();
        store.set("a", NewRecord::say("kept", "u1")).await.unwrap();

        failing.store(true, Ordering::SeqCst);
        let err = store.set("a", NewRecord::say("lost", "u1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Storage(StorageError::Io(_))));
        assert!(!err.is_user_error());
        assert!(store.is_poisoned());

        // The disk is back, but the store stays read-only.
        failing.store(false, Ordering::SeqCst);
        let err = store.set("b", NewRecord::say("new", "u1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Storage(StorageError::Poisoned)));
        assert!(matches!(
            store.freeze("a").await,
            Err(StoreError::Storage(StorageError::Poisoned))
        ));
        assert!(matches!(
            store.compact(),
            Err(StoreError::Storage(StorageError::Poisoned))
        ));

        assert_eq!(store.get("a").unwrap().message, "kept");
        assert_eq!(store.log_len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_key_locks_are_released() {
        let store = store();
        store.set("a", NewRecord::say("hi", "u1")).await.unwrap();
        store.freeze("b").await.unwrap();
        assert!(store.locks.locks.lock().is_empty());
    }
}
