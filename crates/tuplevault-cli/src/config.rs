// crates/tuplevault-cli/src/config.rs
// ============================================================================
// Module: CLI Configuration
// Description: TOML configuration for the `tuplevault` command line.
// Purpose: Resolve, bound, parse, and validate the configuration file.
// Dependencies: serde, thiserror, toml, tuplevault-store-sqlite
// ============================================================================

//! ## Overview
//! The configuration file has three tables: `[store]` (the
//! [`SqliteDatastoreConfig`]), `[migrations]`, and `[logging]`. The file path
//! is taken from the caller, then the `TUPLEVAULT_CONFIG` environment
//! variable, then `tuplevault.toml` in the working directory. Files are read
//! with a size limit and must be UTF-8.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tuplevault_store_sqlite::DatastoreEventSink;
use tuplevault_store_sqlite::FileEventSink;
use tuplevault_store_sqlite::NoopEventSink;
use tuplevault_store_sqlite::SqliteDatastoreConfig;
use tuplevault_store_sqlite::StderrEventSink;
use tuplevault_store_sqlite::config::DEFAULT_BACKFILL_BATCH_SIZE;
use tuplevault_store_sqlite::config::DEFAULT_MIGRATION_TIMEOUT_MS;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default config filename.
pub const DEFAULT_CONFIG_NAME: &str = "tuplevault.toml";
/// Environment variable override for the config path.
pub const CONFIG_ENV_VAR: &str = "TUPLEVAULT_CONFIG";
/// Maximum allowed config file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum total config path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML did not parse into the expected shape.
    #[error("config parse error: {0}")]
    Parse(String),
    /// A value is out of range or inconsistent.
    #[error("config invalid: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Config Types
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TuplevaultConfig {
    /// Datastore settings.
    pub store: SqliteDatastoreConfig,
    /// Settings for explicit `migrate` runs.
    #[serde(default)]
    pub migrations: MigrationsConfig,
    /// Event log settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings for explicit migration runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct MigrationsConfig {
    /// Wall-clock budget for one run (ms).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Row budget handed to backfill steps.
    #[serde(default = "default_backfill_batch_size")]
    pub backfill_batch_size: u64,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_MIGRATION_TIMEOUT_MS,
            backfill_batch_size: DEFAULT_BACKFILL_BATCH_SIZE,
        }
    }
}

/// Event sink selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSinkKind {
    /// JSON lines on stderr.
    #[default]
    Stderr,
    /// JSON lines appended to `logging.path`.
    File,
    /// Discard events.
    None,
}

/// Event log settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Sink kind.
    #[serde(default)]
    pub sink: LogSinkKind,
    /// Log file path; required for the file sink.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds the configured event sink.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the file sink has no path and
    /// [`ConfigError::Io`] when the log file cannot be opened.
    pub fn event_sink(&self) -> Result<Arc<dyn DatastoreEventSink>, ConfigError> {
        match self.sink {
            LogSinkKind::Stderr => Ok(Arc::new(StderrEventSink)),
            LogSinkKind::None => Ok(Arc::new(NoopEventSink)),
            LogSinkKind::File => {
                let path = self.path.as_deref().ok_or_else(|| {
                    ConfigError::Invalid("logging.path is required for the file sink".to_string())
                })?;
                let sink = FileEventSink::new(path).map_err(|err| {
                    ConfigError::Io(format!("unable to open event log {}: {err}", path.display()))
                })?;
                Ok(Arc::new(sink))
            }
        }
    }
}

// ============================================================================
// SECTION: Loading
// ============================================================================

impl TuplevaultConfig {
    /// Builds a configuration with defaults for a datastore file.
    #[must_use]
    pub fn for_store_path(path: impl Into<PathBuf>) -> Self {
        Self {
            store: SqliteDatastoreConfig::for_path(path),
            migrations: MigrationsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Loads and validates configuration from disk.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read, parsed, or
    /// validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| {
            ConfigError::Io(format!("unable to read {}: {err}", resolved.display()))
        })?;
        Self::from_bytes(&bytes)
    }

    /// Parses and validates configuration bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the bytes are oversized, not UTF-8,
    /// malformed, or invalid.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first invalid setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate().map_err(|err| ConfigError::Invalid(format!("[store] {err}")))?;
        if self.migrations.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "migrations.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.migrations.backfill_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "migrations.backfill_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.logging.sink == LogSinkKind::File && self.logging.path.is_none() {
            return Err(ConfigError::Invalid(
                "logging.path is required for the file sink".to_string(),
            ));
        }
        Ok(())
    }
}

/// Returns the default migration timeout.
const fn default_timeout_ms() -> u64 {
    DEFAULT_MIGRATION_TIMEOUT_MS
}

/// Returns the default backfill batch size.
const fn default_backfill_batch_size() -> u64 {
    DEFAULT_BACKFILL_BATCH_SIZE
}

/// Resolves the config path from explicit input or environment.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the config file path length and components.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    if path.to_string_lossy().len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        if component.as_os_str().to_string_lossy().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
