// crates/tuplevault-store-sqlite/tests/migrations.rs
// ============================================================================
// Module: Migration Tests
// Description: Schema migration runs against file-backed databases.
// Purpose: Validate dry runs, partial targets, resumption, and event output.
// Dependencies: tuplevault-core, tuplevault-store-sqlite, tempfile
// ============================================================================

//! ## Overview
//! Exercises the migration chain through [`SqliteDatastore::migrate`] and the
//! auto-migrate path of [`SqliteDatastore::open`].

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

use std::sync::Arc;

use common::RecordingSink;
use tempfile::TempDir;
use tuplevault_core::Datastore;
use tuplevault_core::DatastoreError;
use tuplevault_store_sqlite::HEAD;
use tuplevault_store_sqlite::MigrateOptions;
use tuplevault_store_sqlite::NoopEventSink;
use tuplevault_store_sqlite::RunMode;
use tuplevault_store_sqlite::SqliteDatastore;
use tuplevault_store_sqlite::SqliteDatastoreConfig;
use tuplevault_store_sqlite::migrations::VERSION_ADD_METADATA;
use tuplevault_store_sqlite::migrations::VERSION_INITIAL;

fn options(target: &str, mode: RunMode) -> MigrateOptions<'_> {
    MigrateOptions {
        target,
        timeout_ms: 10_000,
        backfill_batch_size: 1_000,
        mode,
    }
}

fn open_unmigrated(dir: &TempDir) -> SqliteDatastore {
    let config = SqliteDatastoreConfig::for_path(dir.path().join(common::DB_FILE));
    SqliteDatastore::open(&config, Arc::new(NoopEventSink)).expect("open")
}

#[test]
fn dry_run_reports_plan_without_applying() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_unmigrated(&dir);
    assert_eq!(store.schema_version().expect("version"), "");

    let planned = store.migrate(options(HEAD, RunMode::DryRun)).expect("dry run");
    assert_eq!(planned, vec![VERSION_INITIAL.to_string(), VERSION_ADD_METADATA.to_string()]);
    assert_eq!(store.schema_version().expect("version"), "");
}

#[test]
fn migrates_step_by_step_and_then_is_a_no_op() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_unmigrated(&dir);

    let applied = store.migrate(options(VERSION_INITIAL, RunMode::LiveRun)).expect("initial");
    assert_eq!(applied, vec![VERSION_INITIAL.to_string()]);
    assert_eq!(store.schema_version().expect("version"), VERSION_INITIAL);
    assert!(!store.ready_state().expect("ready").is_ready);

    let applied = store.migrate(options(HEAD, RunMode::LiveRun)).expect("head");
    assert_eq!(applied, vec![VERSION_ADD_METADATA.to_string()]);
    assert_eq!(
        store.schema_version().expect("version"),
        store.migrations().head_revision().expect("head")
    );

    let applied = store.migrate(options(HEAD, RunMode::LiveRun)).expect("again");
    assert!(applied.is_empty());
}

#[test]
fn unknown_and_backward_targets_are_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_unmigrated(&dir);
    assert!(matches!(
        store.migrate(options("no-such-version", RunMode::LiveRun)),
        Err(DatastoreError::MigrationUnknownVersion(_))
    ));
    assert_eq!(store.schema_version().expect("version"), "");

    store.migrate(options(HEAD, RunMode::LiveRun)).expect("head");
    assert!(matches!(
        store.migrate(options(VERSION_INITIAL, RunMode::LiveRun)),
        Err(DatastoreError::MigrationUnknownVersion(_))
    ));
}

#[test]
fn expired_timeout_cancels_the_run() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_unmigrated(&dir);
    let result = store.migrate(MigrateOptions {
        timeout_ms: 0,
        ..options(HEAD, RunMode::LiveRun)
    });
    assert!(matches!(result, Err(DatastoreError::Canceled(_))));
    assert_eq!(store.schema_version().expect("version"), "");
}

#[test]
fn auto_migrate_open_emits_lifecycle_events() {
    let dir = TempDir::new().expect("tempdir");
    let sink = Arc::new(RecordingSink::default());
    let store = SqliteDatastore::open(&common::config(dir.path()), Arc::<RecordingSink>::clone(&sink)).expect("open");
    common::write_schema(&store);
    store.close().expect("close");

    assert_eq!(
        sink.names(),
        vec![
            "migration_started".to_string(),
            "migration_applied".to_string(),
            "migration_applied".to_string(),
            "datastore_seeded".to_string(),
            "datastore_opened".to_string(),
            "transaction_committed".to_string(),
            "datastore_closed".to_string(),
        ]
    );

    let reopen_sink = Arc::new(RecordingSink::default());
    let reopened =
        SqliteDatastore::open(&common::config(dir.path()), Arc::<RecordingSink>::clone(&reopen_sink)).expect("reopen");
    assert!(reopened.ready_state().expect("ready").is_ready);
    assert_eq!(
        reopen_sink.names(),
        vec!["migration_started".to_string(), "datastore_opened".to_string()]
    );
}
