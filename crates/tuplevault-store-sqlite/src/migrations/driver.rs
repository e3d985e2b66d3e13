// crates/tuplevault-store-sqlite/src/migrations/driver.rs
// ============================================================================
// Module: SQLite Migration Driver
// Description: Version bookkeeping and transaction scoping for migrations.
// Purpose: Give the migration manager a connection and a version ledger.
// Dependencies: rusqlite, tuplevault-core
// ============================================================================

//! ## Overview
//! The driver reads the current schema version (the newest row of the
//! migration version table, or the empty string when the table does not yet
//! exist), runs transactional steps under an immediate write lock, and
//! appends version rows inside those transactions.

// ============================================================================
// SECTION: Imports
// ============================================================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use tuplevault_core::DatastoreError;

use crate::errors::ERR_MIGRATE;
use crate::errors::db_error;
use crate::errors::is_missing_table;
use crate::executor::SqlBackend;
use crate::tables::Tables;

// ============================================================================
// SECTION: Driver
// ============================================================================

/// Migration driver over one `SQLite` connection.
pub struct SqliteMigrationDriver<'c> {
    /// Connection the migrations run on.
    connection: &'c mut Connection,
    /// Table names of the datastore being migrated.
    tables: Tables,
}

impl<'c> SqliteMigrationDriver<'c> {
    /// Creates a driver for a connection and table prefix.
    #[must_use]
    pub const fn new(connection: &'c mut Connection, tables: Tables) -> Self {
        Self {
            connection,
            tables,
        }
    }

    /// Returns the table names.
    #[must_use]
    pub const fn tables(&self) -> &Tables {
        &self.tables
    }

    /// Returns the connection for non-transactional steps.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        self.connection
    }

    /// Returns the current schema version.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError`] when the version query fails for a reason
    /// other than a missing version table.
    pub fn version(&self) -> Result<String, DatastoreError> {
        read_version(self.connection, &self.tables)
    }

    /// Runs `f` inside an immediate transaction, committing iff it succeeds.
    ///
    /// # Errors
    ///
    /// Returns the error from `f` or a mapped engine error.
    pub fn run_tx<F>(&mut self, f: F) -> Result<(), DatastoreError>
    where
        F: FnOnce(&Transaction<'_>, &Tables) -> Result<(), DatastoreError>,
    {
        let tx = self.connection.begin_write()?;
        match f(&tx, &self.tables) {
            Ok(()) => Connection::commit(tx),
            Err(err) => {
                let _ = tx.rollback();
                Err(err)
            }
        }
    }
}

/// Reads the newest recorded schema version; empty when unmigrated.
///
/// # Errors
///
/// Returns [`DatastoreError::Storage`] when the query fails for a reason
/// other than a missing version table.
pub(crate) fn read_version(
    connection: &Connection,
    tables: &Tables,
) -> Result<String, DatastoreError> {
    let sql = format!("SELECT version FROM {} ORDER BY id DESC LIMIT 1", tables.migration_version());
    let version = connection.query_row(&sql, params![], |row| row.get::<_, String>(0)).optional();
    match version {
        Ok(Some(version)) => Ok(version),
        Ok(None) => Ok(String::new()),
        Err(err) if is_missing_table(&err) => Ok(String::new()),
        Err(err) => Err(db_error("unable to query schema version", &err)),
    }
}

/// Appends a version row inside a migration transaction.
///
/// # Errors
///
/// Returns [`DatastoreError::Storage`] when the insert fails.
pub(crate) fn write_version(
    tx: &Transaction<'_>,
    tables: &Tables,
    version: &str,
) -> Result<(), DatastoreError> {
    let sql = format!("INSERT INTO {} (version) VALUES (?1)", tables.migration_version());
    tx.execute(&sql, params![version]).map_err(|err| db_error(ERR_MIGRATE, &err))?;
    Ok(())
}
