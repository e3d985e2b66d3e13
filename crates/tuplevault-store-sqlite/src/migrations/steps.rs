// crates/tuplevault-store-sqlite/src/migrations/steps.rs
// ============================================================================
// Module: SQLite Schema Steps
// Description: DDL for each registered schema version.
// Purpose: Create the versioned tuple, namespace, caveat, and metadata tables.
// Dependencies: rusqlite, tuplevault-core
// ============================================================================

//! ## Overview
//! `initial` creates the version ledger, transaction, tuple, namespace, and
//! caveat tables. `add-metadata` creates the single-row metadata table that
//! records the database identifier. Partial unique indexes over live rows
//! enforce at most one live row per tuple key, namespace, and caveat while
//! leaving history rows unconstrained.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::LazyLock;

use rusqlite::Transaction;
use tuplevault_core::DatastoreError;

use crate::errors::ERR_MIGRATE;
use crate::errors::db_error;
use crate::migrations::manager::MigrationContext;
use crate::migrations::manager::MigrationManager;
use crate::schema::LIVE_DELETED_TXN_ID;
use crate::tables::Tables;

// ============================================================================
// SECTION: Versions
// ============================================================================

/// First schema version.
pub const VERSION_INITIAL: &str = "initial";
/// Schema version adding the metadata table.
pub const VERSION_ADD_METADATA: &str = "add-metadata";

// ============================================================================
// SECTION: Registration
// ============================================================================

/// `SQLite` step chain, registered once per process.
static SQLITE_MIGRATIONS: LazyLock<Result<MigrationManager, DatastoreError>> =
    LazyLock::new(register_sqlite_steps);

impl MigrationManager {
    /// Returns the shared manager with every `SQLite` schema step registered.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::Internal`] when the step chain is malformed.
    pub fn sqlite() -> Result<&'static Self, DatastoreError> {
        SQLITE_MIGRATIONS.as_ref().map_err(Clone::clone)
    }
}

/// Registers every `SQLite` schema step in order.
fn register_sqlite_steps() -> Result<MigrationManager, DatastoreError> {
    let mut manager = MigrationManager::new();
    manager.register(VERSION_INITIAL, "", None, Some(initial_schema))?;
    manager.register(VERSION_ADD_METADATA, VERSION_INITIAL, None, Some(add_metadata))?;
    Ok(manager)
}

// ============================================================================
// SECTION: DDL
// ============================================================================

/// Creates the version ledger, transaction, tuple, namespace, and caveat tables.
fn initial_schema(tx: &Transaction<'_>, context: &MigrationContext<'_>) -> Result<(), DatastoreError> {
    let statements = [
        create_migration_version(context.tables),
        create_namespace_config(context.tables),
        create_relation_tuple(context.tables),
        create_relation_tuple_transaction(context.tables),
        create_caveat(context.tables),
    ];
    for statement in statements {
        context.cancel.check(ERR_MIGRATE)?;
        tx.execute_batch(&statement).map_err(|err| db_error(ERR_MIGRATE, &err))?;
    }
    Ok(())
}

/// Creates the single-row metadata table.
fn add_metadata(tx: &Transaction<'_>, context: &MigrationContext<'_>) -> Result<(), DatastoreError> {
    context.cancel.check(ERR_MIGRATE)?;
    let statement = format!(
        "CREATE TABLE {} (
            id INTEGER NOT NULL PRIMARY KEY CHECK (id = 1),
            database_ident TEXT NOT NULL);",
        context.tables.metadata()
    );
    tx.execute_batch(&statement).map_err(|err| db_error(ERR_MIGRATE, &err))
}

/// Migration version ledger.
fn create_migration_version(tables: &Tables) -> String {
    format!(
        "CREATE TABLE {} (
            id INTEGER NOT NULL PRIMARY KEY,
            version TEXT NOT NULL);",
        tables.migration_version()
    )
}

/// Versioned namespace definitions.
fn create_namespace_config(tables: &Tables) -> String {
    let table = tables.namespace();
    format!(
        "CREATE TABLE {table} (
            id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
            namespace TEXT NOT NULL,
            serialized_config BLOB NOT NULL,
            created_transaction INTEGER NOT NULL,
            deleted_transaction INTEGER NOT NULL DEFAULT {LIVE_DELETED_TXN_ID},
            UNIQUE (namespace, created_transaction, deleted_transaction));
        CREATE UNIQUE INDEX {live} ON {table} (namespace)
            WHERE deleted_transaction = {LIVE_DELETED_TXN_ID};",
        live = tables.index("ux_namespace_config_live"),
    )
}

/// Versioned relationship tuples.
fn create_relation_tuple(tables: &Tables) -> String {
    let table = tables.tuple();
    format!(
        "CREATE TABLE {table} (
            id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
            namespace TEXT NOT NULL,
            object_id TEXT NOT NULL,
            relation TEXT NOT NULL,
            userset_namespace TEXT NOT NULL,
            userset_object_id TEXT NOT NULL,
            userset_relation TEXT NOT NULL,
            created_transaction INTEGER NOT NULL,
            deleted_transaction INTEGER NOT NULL DEFAULT {LIVE_DELETED_TXN_ID},
            caveat_name TEXT,
            caveat_context JSON,
            UNIQUE (namespace, object_id, relation, userset_namespace, userset_object_id,
                userset_relation, created_transaction, deleted_transaction));
        CREATE UNIQUE INDEX {live} ON {table} (namespace, object_id, relation,
            userset_namespace, userset_object_id, userset_relation)
            WHERE deleted_transaction = {LIVE_DELETED_TXN_ID};
        CREATE INDEX {by_subject} ON {table} (userset_object_id, userset_namespace,
            userset_relation, namespace, relation);
        CREATE INDEX {by_subject_relation} ON {table} (userset_namespace, userset_relation,
            namespace, relation);
        CREATE INDEX {by_deleted} ON {table} (deleted_transaction);",
        live = tables.index("ux_relation_tuple_live"),
        by_subject = tables.index("ix_relation_tuple_by_subject"),
        by_subject_relation = tables.index("ix_relation_tuple_by_subject_relation"),
        by_deleted = tables.index("ix_relation_tuple_by_deleted_transaction"),
    )
}

/// Revision ledger; `AUTOINCREMENT` keeps ids strictly increasing.
fn create_relation_tuple_transaction(tables: &Tables) -> String {
    let table = tables.transaction();
    format!(
        "CREATE TABLE {table} (
            id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
            timestamp DATETIME DEFAULT CURRENT_TIMESTAMP NOT NULL);
        CREATE INDEX {by_timestamp} ON {table} (timestamp);",
        by_timestamp = tables.index("ix_relation_tuple_transaction_by_timestamp"),
    )
}

/// Versioned caveat definitions.
fn create_caveat(tables: &Tables) -> String {
    let table = tables.caveat();
    format!(
        "CREATE TABLE {table} (
            name TEXT NOT NULL,
            definition BLOB NOT NULL,
            created_transaction INTEGER NOT NULL,
            deleted_transaction INTEGER NOT NULL DEFAULT {LIVE_DELETED_TXN_ID},
            UNIQUE (name, created_transaction, deleted_transaction));
        CREATE UNIQUE INDEX {live} ON {table} (name)
            WHERE deleted_transaction = {LIVE_DELETED_TXN_ID};",
        live = tables.index("ux_caveat_live"),
    )
}

// ============================================================================
// SECTION: Tests
// ============================================================================
