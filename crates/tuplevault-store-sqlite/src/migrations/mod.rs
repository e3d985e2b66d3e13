// crates/tuplevault-store-sqlite/src/migrations/mod.rs
// ============================================================================
// Module: Schema Migrations
// Description: Forward-only schema versioning for the SQLite datastore.
// Purpose: Bring a database file to the registered head version.
// Dependencies: rusqlite, tuplevault-core
// ============================================================================

//! ## Overview
//! Migrations form one linear chain of named versions. The current version is
//! the newest row of the migration version table; each step's transactional
//! work and its version row commit together, so an interrupted run resumes at
//! the first uncommitted step.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod driver;
pub mod manager;
pub mod steps;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use tuplevault_core::CancellationToken;
use tuplevault_core::DatastoreError;

use crate::events::DatastoreEventSink;
use crate::events::MigrationEvent;

pub use driver::SqliteMigrationDriver;
pub use manager::HEAD;
pub use manager::Migration;
pub use manager::MigrationContext;
pub use manager::MigrationFn;
pub use manager::MigrationManager;
pub use manager::RunMode;
pub use manager::TxMigrationFn;
pub use steps::VERSION_ADD_METADATA;
pub use steps::VERSION_INITIAL;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// Options for one migration run.
#[derive(Debug, Clone, Copy)]
pub struct MigrateOptions<'a> {
    /// Target version or [`HEAD`].
    pub target: &'a str,
    /// Wall-clock budget for the whole run (ms).
    pub timeout_ms: u64,
    /// Row budget handed to backfill steps.
    pub backfill_batch_size: u64,
    /// Apply or only report.
    pub mode: RunMode,
}

/// Migrates the driver's database to `options.target` under a timeout.
///
/// Returns the versions applied, or the versions that would be applied for a
/// dry run.
///
/// # Errors
///
/// Returns [`DatastoreError::MigrationUnknownVersion`] for unknown versions,
/// [`DatastoreError::Canceled`] when the timeout elapses, and otherwise the
/// failing step's error prefixed with the target.
pub fn migrate_to_version(
    manager: &MigrationManager,
    driver: &mut SqliteMigrationDriver<'_>,
    options: MigrateOptions<'_>,
    sink: &dyn DatastoreEventSink,
) -> Result<Vec<String>, DatastoreError> {
    if options.mode == RunMode::LiveRun {
        sink.record_migration(&MigrationEvent::started(
            options.target,
            options.timeout_ms,
            options.backfill_batch_size,
        ));
    }
    let cancel = CancellationToken::with_timeout(Duration::from_millis(options.timeout_ms));
    let tables = driver.tables().clone();
    let context = MigrationContext {
        tables: &tables,
        backfill_batch_size: options.backfill_batch_size,
        timeout_ms: options.timeout_ms,
        cancel: &cancel,
    };
    manager.run(driver, options.target, options.mode, &context, sink).map_err(|err| match err {
        DatastoreError::Storage(message) => DatastoreError::Storage(format!(
            "unable to migrate to `{}` revision: {message}",
            options.target
        )),
        other => other,
    })
}
