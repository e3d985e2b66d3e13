// crates/tuplevault-store-sqlite/src/config.rs
// ============================================================================
// Module: SQLite Datastore Config
// Description: File, pragma, pool, and migration settings for the datastore.
// Purpose: Validate datastore settings before any connection is opened.
// Dependencies: serde, tuplevault-core
// ============================================================================

//! ## Overview
//! [`SqliteDatastoreConfig`] is deserialized from the `[store]` table of the
//! CLI configuration or built directly by embedders. Validation runs before
//! the database file is touched so misconfiguration fails fast.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use tuplevault_core::DatastoreError;

use crate::tables::validate_table_prefix;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Default bulk-load batch size.
pub const DEFAULT_BULK_LOAD_BATCH_SIZE: usize = 500;
/// Upper bound for the bulk-load batch size.
pub const MAX_BULK_LOAD_BATCH_SIZE: usize = 1_000;
/// Default timeout for automatic migrations (ms).
pub const DEFAULT_MIGRATION_TIMEOUT_MS: u64 = 60_000;
/// Default batch size handed to migration backfills.
pub const DEFAULT_BACKFILL_BATCH_SIZE: u64 = 1_000;

// ============================================================================
// SECTION: Pragma Modes
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// WAL journal mode (recommended; readers never block the writer).
    #[default]
    Wal,
    /// Delete journal mode.
    Delete,
}

impl SqliteJournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

// ============================================================================
// SECTION: Config
// ============================================================================

/// Configuration for the `SQLite` datastore.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `table_prefix` contains only ASCII alphanumerics and underscores.
/// - `read_pool_size` and `bulk_load_batch_size` are greater than zero.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteDatastoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Prefix prepended to every table name.
    #[serde(default)]
    pub table_prefix: String,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Number of read-only connections serving snapshot readers.
    #[serde(default = "default_read_pool_size")]
    pub read_pool_size: usize,
    /// Rows per INSERT statement during bulk loads.
    #[serde(default = "default_bulk_load_batch_size")]
    pub bulk_load_batch_size: usize,
    /// Migrate to head when the datastore is opened.
    #[serde(default)]
    pub auto_migrate: bool,
    /// Timeout applied to automatic migrations (ms).
    #[serde(default = "default_migration_timeout_ms")]
    pub migration_timeout_ms: u64,
    /// Batch size handed to automatic migration backfills.
    #[serde(default = "default_backfill_batch_size")]
    pub backfill_batch_size: u64,
}

impl SqliteDatastoreConfig {
    /// Creates a configuration with defaults for the given database path.
    #[must_use]
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            table_prefix: String::new(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteJournalMode::default(),
            sync_mode: SqliteSyncMode::default(),
            read_pool_size: default_read_pool_size(),
            bulk_load_batch_size: default_bulk_load_batch_size(),
            auto_migrate: false,
            migration_timeout_ms: DEFAULT_MIGRATION_TIMEOUT_MS,
            backfill_batch_size: DEFAULT_BACKFILL_BATCH_SIZE,
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::Invalid`] when a field is out of range.
    pub fn validate(&self) -> Result<(), DatastoreError> {
        validate_store_path(&self.path)?;
        validate_table_prefix(&self.table_prefix)?;
        if self.read_pool_size == 0 {
            return Err(DatastoreError::Invalid(
                "read_pool_size must be greater than zero".to_string(),
            ));
        }
        if self.bulk_load_batch_size == 0 || self.bulk_load_batch_size > MAX_BULK_LOAD_BATCH_SIZE {
            return Err(DatastoreError::Invalid(format!(
                "bulk_load_batch_size out of range: {} (max {MAX_BULK_LOAD_BATCH_SIZE})",
                self.bulk_load_batch_size
            )));
        }
        if self.migration_timeout_ms == 0 {
            return Err(DatastoreError::Invalid(
                "migration_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.backfill_batch_size == 0 {
            return Err(DatastoreError::Invalid(
                "backfill_batch_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default read connection pool size.
const fn default_read_pool_size() -> usize {
    4
}

/// Returns the default bulk-load batch size.
const fn default_bulk_load_batch_size() -> usize {
    DEFAULT_BULK_LOAD_BATCH_SIZE
}

/// Returns the default automatic migration timeout.
const fn default_migration_timeout_ms() -> u64 {
    DEFAULT_MIGRATION_TIMEOUT_MS
}

/// Returns the default automatic migration backfill batch size.
const fn default_backfill_batch_size() -> u64 {
    DEFAULT_BACKFILL_BATCH_SIZE
}

// ============================================================================
// SECTION: Path Validation
// ============================================================================

/// Validates store paths for safety limits.
pub(crate) fn validate_store_path(path: &Path) -> Result<(), DatastoreError> {
    if path.as_os_str().is_empty() {
        return Err(DatastoreError::Invalid("store path must not be empty".to_string()));
    }
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(DatastoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(DatastoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.exists() && path.is_dir() {
        return Err(DatastoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Ensures the parent directory for the store exists.
pub(crate) fn ensure_parent_dir(path: &Path) -> Result<(), DatastoreError> {
    let Some(parent) = path.parent() else {
        return Err(DatastoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| DatastoreError::Io(err.to_string()))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::SqliteDatastoreConfig;
    use tuplevault_core::DatastoreError;

    #[test]
    fn defaults_validate() {
        let config = SqliteDatastoreConfig::for_path("data/tuplevault.db");
        assert!(config.validate().is_ok());
        assert_eq!(config.read_pool_size, 4);
        assert_eq!(config.bulk_load_batch_size, 500);
    }

    #[test]
    fn rejects_bad_prefix_and_limits() {
        let mut config = SqliteDatastoreConfig::for_path("tuplevault.db");
        config.table_prefix = "drop table;".to_string();
        assert!(matches!(config.validate(), Err(DatastoreError::Invalid(_))));

        let mut config = SqliteDatastoreConfig::for_path("tuplevault.db");
        config.read_pool_size = 0;
        assert!(matches!(config.validate(), Err(DatastoreError::Invalid(_))));

        let mut config = SqliteDatastoreConfig::for_path("tuplevault.db");
        config.bulk_load_batch_size = 5_000;
        assert!(matches!(config.validate(), Err(DatastoreError::Invalid(_))));
    }

    #[test]
    fn rejects_empty_path() {
        let config = SqliteDatastoreConfig::for_path("");
        assert!(matches!(config.validate(), Err(DatastoreError::Invalid(_))));
    }
}
