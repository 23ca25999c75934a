//! Store configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::alias::DEFAULT_MAX_ALIAS_DEPTH;
use crate::error::{Result, StorageError, StoreError};
use crate::log::{JsonlLog, MemoryLog, RecordLog, SqliteLog};
use crate::policy::{AcceptAll, AdminList, CommandPrefixFilter, EditorAuthority, UpdatePolicy};

/// Default database path
pub const DEFAULT_STORAGE_PATH: &str = "factoid.db";

/// Main store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum alias hops before resolution fails (must be >= 1)
    pub max_alias_depth: usize,

    /// Durable log settings
    pub storage: StorageSettings,

    /// Editor and content policy
    pub policy: PolicySettings,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_alias_depth: DEFAULT_MAX_ALIAS_DEPTH,
            storage: StorageSettings::default(),
            policy: PolicySettings::default(),
        }
    }
}

impl StoreConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the alias depth bound
    pub fn with_max_alias_depth(mut self, depth: usize) -> Self {
        self.max_alias_depth = depth;
        self
    }

    /// Set the storage backend and path
    pub fn with_storage(mut self, backend: StorageBackend, path: impl Into<PathBuf>) -> Self {
        self.storage = StorageSettings {
            backend,
            path: path.into(),
        };
        self
    }

    /// Add a privileged editor identity
    pub fn with_admin(mut self, editor: impl Into<String>) -> Self {
        self.policy.admins.push(editor.into());
        self
    }

    /// Enable the command prefix filter
    pub fn with_command_filter(mut self, enabled: bool) -> Self {
        self.policy.command_filter = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_alias_depth == 0 {
            return Err(StoreError::InvalidConfig(
                "max_alias_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(StorageError::from)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| StoreError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| StoreError::InvalidConfig(e.to_string()))?;
        std::fs::write(path, content).map_err(StorageError::from)?;
        Ok(())
    }

    /// Open the configured log backend
    pub fn open_log(&self) -> Result<Box<dyn RecordLog>> {
        let log: Box<dyn RecordLog> = match self.storage.backend {
            StorageBackend::Sqlite => Box::new(SqliteLog::open(&self.storage.path)?),
            StorageBackend::Jsonl => Box::new(JsonlLog::open(&self.storage.path)?),
            StorageBackend::Memory => Box::new(MemoryLog::new()),
        };
        Ok(log)
    }

    /// Authorization predicate built from `policy.admins`
    pub fn authority(&self) -> Arc<dyn EditorAuthority> {
        Arc::new(AdminList::new(self.policy.admins.iter().cloned()))
    }

    /// Pre-commit hook built from `policy.command_filter`
    pub fn update_policy(&self) -> Arc<dyn UpdatePolicy> {
        if self.policy.command_filter {
            Arc::new(CommandPrefixFilter)
        } else {
            Arc::new(AcceptAll)
        }
    }
}

/// Durable log settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            path: PathBuf::from(DEFAULT_STORAGE_PATH),
        }
    }
}

/// Log backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// SQLite table in WAL mode
    Sqlite,
    /// Line-delimited JSON file
    Jsonl,
    /// Not durable
    Memory,
}

/// Policy settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    /// Editor identities allowed to change frozen records
    pub admins: Vec<String>,

    /// Reject `say` replies starting with `!` or `/`
    pub command_filter: bool,
}
