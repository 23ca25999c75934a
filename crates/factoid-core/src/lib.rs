//! Factoid Core - persistent reply store for chat bots
//!
//! Stores short text replies under case-insensitive keys, the way a bot's
//! `!learn` / `!reply` / `!forget` commands need them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                       Store                         │
//! ├─────────────────────────────────────────────────────┤
//! │  get ──► AliasResolver (depth-bounded)              │
//! │  set / delete / replace ──► per-key lock            │
//! │        ──► EditorAuthority (frozen records only)    │
//! │        ──► UpdatePolicy (pre-commit hook)           │
//! │        ──► RecordLog.append ──► in-memory map       │
//! └─────────────────────────────────────────────────────┘
//!         ↓ SqliteLog | JsonlLog | MemoryLog
//! ```
//!
//! # Features
//!
//! - **Alias records**: a key can point at another key, resolved up to a
//!   configured depth
//! - **Frozen records**: only privileged editors may change or delete them;
//!   the lock survives deletion
//! - **In-place edits**: regex substitution with `g` / `i` flags
//! - **Append-only persistence**: every mutation is a full snapshot, replayed
//!   on startup
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use factoid_core::log::MemoryLog;
//! use factoid_core::policy::{AcceptAll, AdminList};
//! use factoid_core::{NewRecord, Store, StoreConfig};
//!
//! # tokio_test_block(async {
//! let store = Store::with_log(
//!     Box::new(MemoryLog::new()),
//!     &StoreConfig::default(),
//!     Arc::new(AdminList::new(["op"])),
//!     Arc::new(AcceptAll),
//! )
//! .unwrap();
//!
//! store.set("greeting", NewRecord::say("hi", "u1")).await.unwrap();
//! store.set("hello", NewRecord::alias("greeting", "u1")).await.unwrap();
//! assert_eq!(store.get("HELLO").unwrap().message, "hi");
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, clippy::all)]

pub mod alias;
pub mod config;
pub mod error;
pub mod key;
pub mod log;
pub mod policy;
pub mod record;
pub mod store;
pub mod substitution;

// Re-export commonly used types for convenience
pub use alias::{AliasResolver, DEFAULT_MAX_ALIAS_DEPTH};
pub use config::{StorageBackend, StoreConfig};
pub use error::{Result, StorageError, StoreError};
pub use key::Key;
pub use policy::{EditorAuthority, PolicyRejection, UpdatePolicy};
pub use record::{Intent, NewRecord, Record, Reply};
pub use store::Store;
pub use substitution::Pattern;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
