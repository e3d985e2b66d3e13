// crates/tuplevault-store-sqlite/src/lib.rs
// ============================================================================
// Module: Tuplevault SQLite Datastore
// Description: MVCC relationship datastore backed by SQLite.
// Purpose: Implement the Tuplevault datastore traits on a single database file.
// Dependencies: rand, rusqlite, sea-query, serde, serde_json, tuplevault-core
// ============================================================================

//! ## Overview
//! Every row carries the revision that created it and the revision that
//! tombstoned it (a sentinel while live). Snapshot reads filter on that
//! range, so a reader bound to a revision sees exactly the rows committed at
//! or before it regardless of later writes. Writes run in `BEGIN IMMEDIATE`
//! transactions that allocate their revision from an autoincrement ledger.
//!
//! The crate is layered bottom-up: table naming ([`tables`]), statement
//! assembly ([`schema`], [`queries`]), execution ([`executor`]),
//! schema versioning ([`migrations`]), bootstrap ([`seed`]), reads and writes
//! ([`reader`], [`readwrite`]), and the [`SqliteDatastore`] facade.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod datastore;
mod errors;
pub mod events;
pub mod executor;
pub mod migrations;
mod pool;
pub mod queries;
pub mod reader;
pub mod readwrite;
mod revision;
pub mod schema;
pub mod seed;
pub mod tables;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::SqliteDatastoreConfig;
pub use config::SqliteJournalMode;
pub use config::SqliteSyncMode;
pub use datastore::CloseHandler;
pub use datastore::SqliteDatastore;
pub use events::DatastoreEventSink;
pub use events::FileEventSink;
pub use events::LifecycleEvent;
pub use events::MigrationEvent;
pub use events::NoopEventSink;
pub use events::SeedEvent;
pub use events::StderrEventSink;
pub use events::TransactionEvent;
pub use migrations::HEAD;
pub use migrations::MigrateOptions;
pub use migrations::MigrationManager;
pub use migrations::RunMode;
pub use reader::SqliteReader;
pub use readwrite::SqliteReadWriteTransaction;
pub use seed::SeedStatus;
pub use tables::Tables;
