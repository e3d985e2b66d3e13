// crates/tuplevault-store-sqlite/src/events.rs
// ============================================================================
// Module: Datastore Events
// Description: Structured lifecycle, migration, seed, and transaction events.
// Purpose: Emit JSON-lines operational logs without a logging framework.
// Dependencies: serde, serde_json, tuplevault-core
// ============================================================================

//! ## Overview
//! The datastore reports what it does through a [`DatastoreEventSink`].
//! Events are flat serde payloads carrying an `event` label and a
//! millisecond timestamp. Sinks write one JSON object per line to stderr or
//! an append-only file, or drop events entirely.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;
use tuplevault_core::DatastoreError;
use tuplevault_core::Revision;

// ============================================================================
// SECTION: Event Payloads
// ============================================================================

/// Migration progress event.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Human-readable summary.
    pub message: &'static str,
    /// Requested target version.
    pub target_version: String,
    /// Version applied by this step, when the event is per-step.
    pub version: Option<String>,
    /// Version replaced by this step, when the event is per-step.
    pub replaces: Option<String>,
    /// Migration timeout (ms).
    pub timeout_ms: u64,
    /// Backfill batch size handed to migration steps.
    pub backfill_batch_size: u64,
}

impl MigrationEvent {
    /// Event emitted before the first migration step runs.
    #[must_use]
    pub fn started(target_version: &str, timeout_ms: u64, backfill_batch_size: u64) -> Self {
        Self {
            event: "migration_started",
            timestamp_ms: now_millis(),
            message: "running migrations",
            target_version: target_version.to_string(),
            version: None,
            replaces: None,
            timeout_ms,
            backfill_batch_size,
        }
    }

    /// Event emitted after one migration step commits.
    #[must_use]
    pub fn applied(
        target_version: &str,
        version: &str,
        replaces: &str,
        timeout_ms: u64,
        backfill_batch_size: u64,
    ) -> Self {
        Self {
            event: "migration_applied",
            timestamp_ms: now_millis(),
            message: "migration applied",
            target_version: target_version.to_string(),
            version: Some(version.to_string()),
            replaces: Some(replaces.to_string()),
            timeout_ms,
            backfill_batch_size,
        }
    }
}

/// Bootstrap (seed) event.
#[derive(Debug, Clone, Serialize)]
pub struct SeedEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Table prefix of the seeded datastore.
    pub table_prefix: String,
    /// True when this call inserted the base revision.
    pub head_revision_inserted: bool,
    /// Database identifier inserted by this call, if any.
    pub database_ident: Option<String>,
}

impl SeedEvent {
    /// Event emitted after seeding wrote at least one row.
    #[must_use]
    pub fn seeded(
        table_prefix: &str,
        head_revision_inserted: bool,
        database_ident: Option<String>,
    ) -> Self {
        Self {
            event: "datastore_seeded",
            timestamp_ms: now_millis(),
            table_prefix: table_prefix.to_string(),
            head_revision_inserted,
            database_ident,
        }
    }
}

/// Write transaction outcome event.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Revision allocated to the transaction (0 when allocation failed).
    pub revision: Revision,
    /// Wall time spent in the transaction (ms).
    pub duration_ms: u128,
    /// Error kind label when rolled back.
    pub error_kind: Option<&'static str>,
    /// Error message when rolled back.
    pub error: Option<String>,
}

impl TransactionEvent {
    /// Event emitted after a successful commit.
    #[must_use]
    pub fn committed(revision: Revision, duration_ms: u128) -> Self {
        Self {
            event: "transaction_committed",
            timestamp_ms: now_millis(),
            revision,
            duration_ms,
            error_kind: None,
            error: None,
        }
    }

    /// Event emitted after a rollback.
    #[must_use]
    pub fn rolled_back(revision: Revision, duration_ms: u128, error: &DatastoreError) -> Self {
        Self {
            event: "transaction_rolled_back",
            timestamp_ms: now_millis(),
            revision,
            duration_ms,
            error_kind: Some(error_kind(error)),
            error: Some(error.to_string()),
        }
    }
}

/// Datastore open/close event.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Table prefix of the datastore.
    pub table_prefix: String,
    /// True when the datastore owns its connections.
    pub owned: bool,
    /// Database path for owned datastores.
    pub path: Option<String>,
}

impl LifecycleEvent {
    /// Event emitted after a datastore is constructed.
    #[must_use]
    pub fn opened(table_prefix: &str, owned: bool, path: Option<&Path>) -> Self {
        Self::new("datastore_opened", table_prefix, owned, path)
    }

    /// Event emitted after a datastore releases its connections.
    #[must_use]
    pub fn closed(table_prefix: &str, owned: bool) -> Self {
        Self::new("datastore_closed", table_prefix, owned, None)
    }

    /// Builds a lifecycle event.
    fn new(event: &'static str, table_prefix: &str, owned: bool, path: Option<&Path>) -> Self {
        Self {
            event,
            timestamp_ms: now_millis(),
            table_prefix: table_prefix.to_string(),
            owned,
            path: path.map(|path| path.display().to_string()),
        }
    }
}

/// Returns a stable label for an error kind.
#[must_use]
pub const fn error_kind(error: &DatastoreError) -> &'static str {
    match error {
        DatastoreError::NamespaceNotFound(_) => "namespace_not_found",
        DatastoreError::RelationNotFound {
            ..
        } => "relation_not_found",
        DatastoreError::CaveatNotFound(_) => "caveat_not_found",
        DatastoreError::InvalidRevision {
            ..
        } => "invalid_revision",
        DatastoreError::PreconditionFailed(_) => "precondition_failed",
        DatastoreError::WriteConflict(_) => "write_conflict",
        DatastoreError::AlreadyExists(_) => "already_exists",
        DatastoreError::MigrationUnknownVersion(_) => "migration_unknown_version",
        DatastoreError::IntegrityViolation(_) => "integrity_violation",
        DatastoreError::Canceled(_) => "canceled",
        DatastoreError::Invalid(_) => "invalid",
        DatastoreError::Io(_) => "io",
        DatastoreError::Storage(_) => "storage",
        DatastoreError::Closed => "closed",
        DatastoreError::Internal(_) => "internal",
    }
}

/// Returns the current time in milliseconds since the epoch.
fn now_millis() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|duration| duration.as_millis()).unwrap_or(0)
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Sink for datastore operational events.
pub trait DatastoreEventSink: Send + Sync {
    /// Record a migration event.
    fn record_migration(&self, _event: &MigrationEvent) {}

    /// Record a seed event.
    fn record_seed(&self, _event: &SeedEvent) {}

    /// Record a write transaction event.
    fn record_transaction(&self, _event: &TransactionEvent) {}

    /// Record a lifecycle event.
    fn record_lifecycle(&self, _event: &LifecycleEvent) {}
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Event sink that logs JSON lines to stderr.
pub struct StderrEventSink;

impl StderrEventSink {
    /// Writes one event as a JSON line.
    fn emit<T: Serialize>(event: &T) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

impl DatastoreEventSink for StderrEventSink {
    fn record_migration(&self, event: &MigrationEvent) {
        Self::emit(event);
    }

    fn record_seed(&self, event: &SeedEvent) {
        Self::emit(event);
    }

    fn record_transaction(&self, event: &TransactionEvent) {
        Self::emit(event);
    }

    fn record_lifecycle(&self, event: &LifecycleEvent) {
        Self::emit(event);
    }
}

/// Event sink that logs JSON lines to a file.
pub struct FileEventSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileEventSink {
    /// Opens the event log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Appends one event as a JSON line and flushes.
    fn emit<T: Serialize>(&self, event: &T) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

impl DatastoreEventSink for FileEventSink {
    fn record_migration(&self, event: &MigrationEvent) {
        self.emit(event);
    }

    fn record_seed(&self, event: &SeedEvent) {
        self.emit(event);
    }

    fn record_transaction(&self, event: &TransactionEvent) {
        self.emit(event);
    }

    fn record_lifecycle(&self, event: &LifecycleEvent) {
        self.emit(event);
    }
}

/// No-op event sink.
pub struct NoopEventSink;

impl DatastoreEventSink for NoopEventSink {}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::expect_used,
        clippy::unwrap_used,
        reason = "Test assertions use expect/unwrap for clarity."
    )]

    use tuplevault_core::DatastoreError;
    use tuplevault_core::Revision;

    use super::DatastoreEventSink;
    use super::FileEventSink;
    use super::MigrationEvent;
    use super::TransactionEvent;

    #[test]
    fn file_sink_appends_json_lines() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("events.jsonl");
        let sink = FileEventSink::new(&path).expect("sink");
        sink.record_migration(&MigrationEvent::started("head", 1_000, 10));
        sink.record_transaction(&TransactionEvent::rolled_back(
            Revision::new(4),
            2,
            &DatastoreError::WriteConflict("busy".to_string()),
        ));
        let contents = std::fs::read_to_string(&path).expect("read");
        let lines: Vec<serde_json::Value> =
            contents.lines().map(|line| serde_json::from_str(line).expect("json")).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "migration_started");
        assert_eq!(lines[0]["message"], "running migrations");
        assert_eq!(lines[1]["revision"], 4);
        assert_eq!(lines[1]["error_kind"], "write_conflict");
    }
}
