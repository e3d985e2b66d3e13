// crates/tuplevault-store-sqlite/src/errors.rs
// ============================================================================
// Module: SQLite Error Mapping
// Description: Classifies engine failures into datastore error kinds.
// Purpose: Keep retry and conflict semantics independent of rusqlite types.
// Dependencies: rusqlite, tuplevault-core
// ============================================================================

//! ## Overview
//! Engine errors are wrapped with the failing operation's context. Busy and
//! locked results become [`DatastoreError::WriteConflict`] so callers may
//! retry; unique-constraint violations become [`DatastoreError::AlreadyExists`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Display;

use rusqlite::ErrorCode;
use rusqlite::ffi;
use tuplevault_core::DatastoreError;

// ============================================================================
// SECTION: Operation Context
// ============================================================================

/// Context for relationship queries.
pub(crate) const ERR_QUERY_TUPLES: &str = "unable to query tuples";
/// Context for relationship writes.
pub(crate) const ERR_WRITE_TUPLES: &str = "unable to write relationships";
/// Context for filtered relationship deletes.
pub(crate) const ERR_DELETE_TUPLES: &str = "unable to delete relationships";
/// Context for bulk loads.
pub(crate) const ERR_BULK_LOAD: &str = "unable to bulk load relationships";
/// Context for namespace reads.
pub(crate) const ERR_READ_NAMESPACE: &str = "unable to read namespace config";
/// Context for namespace writes.
pub(crate) const ERR_WRITE_NAMESPACE: &str = "unable to write namespace config";
/// Context for namespace deletes.
pub(crate) const ERR_DELETE_NAMESPACE: &str = "unable to delete namespace config";
/// Context for caveat reads.
pub(crate) const ERR_READ_CAVEAT: &str = "unable to read caveat";
/// Context for caveat writes.
pub(crate) const ERR_WRITE_CAVEAT: &str = "unable to write caveat";
/// Context for caveat deletes.
pub(crate) const ERR_DELETE_CAVEAT: &str = "unable to delete caveat";
/// Context for revision reads and allocation.
pub(crate) const ERR_REVISION: &str = "unable to compute revision";
/// Context for write-transaction lifecycle.
pub(crate) const ERR_TRANSACTION: &str = "unable to run read-write transaction";
/// Context for statistics.
pub(crate) const ERR_STATISTICS: &str = "unable to compute statistics";
/// Context for seeding.
pub(crate) const ERR_SEED: &str = "unable to seed datastore";
/// Context for migrations.
pub(crate) const ERR_MIGRATE: &str = "unable to migrate datastore";
/// Context for closing owned connections.
pub(crate) const ERR_CLOSE: &str = "unable to close datastore";

// ============================================================================
// SECTION: Mapping
// ============================================================================

/// Maps an engine error to a datastore error with operation context.
pub(crate) fn db_error(context: &str, err: &rusqlite::Error) -> DatastoreError {
    if let rusqlite::Error::SqliteFailure(failure, _) = err {
        match failure.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                return DatastoreError::WriteConflict(format!("{context}: {err}"));
            }
            ErrorCode::ConstraintViolation
                if failure.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                    || failure.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                return DatastoreError::AlreadyExists(format!("{context}: {err}"));
            }
            _ => {}
        }
    }
    DatastoreError::Storage(format!("{context}: {err}"))
}

/// Returns true when the error reports a missing table.
pub(crate) fn is_missing_table(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(_, Some(message)) if message.contains("no such table"))
}

/// Maps a statement the query builder rejected to an internal error.
pub(crate) fn statement_error(err: &impl Display) -> DatastoreError {
    DatastoreError::Internal(format!("statement rejected: {err}"))
}

/// Maps a poisoned lock to a datastore error.
pub(crate) fn poisoned(lock: &str) -> DatastoreError {
    DatastoreError::Internal(format!("sqlite {lock} mutex poisoned"))
}

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

    use rusqlite::Connection;
    use rusqlite::ErrorCode;
    use rusqlite::ffi;
    use tuplevault_core::DatastoreError;

    use super::db_error;
    use super::is_missing_table;

    #[test]
    fn unique_violation_maps_to_already_exists() {
        let connection = Connection::open_in_memory().expect("open");
        connection
            .execute_batch("CREATE TABLE t (k TEXT NOT NULL UNIQUE); INSERT INTO t (k) VALUES ('a');")
            .expect("setup");
        let result = connection.execute("INSERT INTO t (k) VALUES ('a')", []);
        let mapped = result.map_err(|err| db_error("unable to insert", &err));
        assert!(matches!(
            mapped,
            Err(DatastoreError::AlreadyExists(message)) if message.starts_with("unable to insert")
        ));
    }

    #[test]
    fn engine_interrupt_is_a_storage_failure() {
        let err = rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_INTERRUPT), None);
        assert!(matches!(&err, rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::OperationInterrupted));
        assert!(matches!(db_error("unable to query", &err), DatastoreError::Storage(_)));
    }

    #[test]
    fn busy_engine_maps_to_write_conflict() {
        let err = rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_BUSY), None);
        let mapped = db_error("unable to write", &err);
        assert!(mapped.is_retryable());
        assert!(matches!(mapped, DatastoreError::WriteConflict(_)));
    }

    #[test]
    fn missing_table_is_detected() {
        let connection = Connection::open_in_memory().expect("open");
        let result = connection.query_row("SELECT 1 FROM absent", [], |row| row.get::<_, i64>(0));
        assert!(matches!(result, Err(ref err) if is_missing_table(err)));
    }
}
