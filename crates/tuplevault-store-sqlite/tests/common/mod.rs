// crates/tuplevault-store-sqlite/tests/common/mod.rs
// ============================================================================
// Module: Common Test Utilities
// Description: Shared fixtures for SQLite datastore integration tests.
// Purpose: Open migrated datastores and build schema and tuple fixtures.
// Dependencies: tuplevault-core, tuplevault-store-sqlite, tempfile
// ============================================================================

//! ## Overview
//! Provides datastore openers, a sample schema, tuple builders, and an event
//! sink that records event names for assertions.

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
    reason = "Test-only output and panic-based assertions are permitted."
)]
#![allow(dead_code, reason = "Shared test helpers may be unused in some cases.")]

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use tempfile::TempDir;
use tuplevault_core::CancellationToken;
use tuplevault_core::Datastore;
use tuplevault_core::DatastoreError;
use tuplevault_core::NamespaceDefinition;
use tuplevault_core::QueryOptions;
use tuplevault_core::ReadWriteTransaction;
use tuplevault_core::RelationDefinition;
use tuplevault_core::RelationTuple;
use tuplevault_core::RelationshipMutation;
use tuplevault_core::RelationshipsFilter;
use tuplevault_core::Revision;
use tuplevault_core::SortOrder;
use tuplevault_store_sqlite::DatastoreEventSink;
use tuplevault_store_sqlite::LifecycleEvent;
use tuplevault_store_sqlite::MigrationEvent;
use tuplevault_store_sqlite::NoopEventSink;
use tuplevault_store_sqlite::SeedEvent;
use tuplevault_store_sqlite::SqliteDatastore;
use tuplevault_store_sqlite::SqliteDatastoreConfig;
use tuplevault_store_sqlite::TransactionEvent;

pub const DB_FILE: &str = "tuplevault.db";

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn names(&self) -> Vec<String> {
        self.events.lock().expect("events lock").clone()
    }

    fn push(&self, name: &str) {
        self.events.lock().expect("events lock").push(name.to_string());
    }
}

impl DatastoreEventSink for RecordingSink {
    fn record_migration(&self, event: &MigrationEvent) {
        self.push(event.event);
    }

    fn record_seed(&self, event: &SeedEvent) {
        self.push(event.event);
    }

    fn record_transaction(&self, event: &TransactionEvent) {
        self.push(event.event);
    }

    fn record_lifecycle(&self, event: &LifecycleEvent) {
        self.push(event.event);
    }
}

pub fn config(dir: &Path) -> SqliteDatastoreConfig {
    let mut config = SqliteDatastoreConfig::for_path(dir.join(DB_FILE));
    config.auto_migrate = true;
    config.read_pool_size = 2;
    config
}

pub fn open_store(dir: &TempDir) -> SqliteDatastore {
    SqliteDatastore::open(&config(dir.path()), Arc::new(NoopEventSink)).expect("open datastore")
}

pub fn open_with_prefix(dir: &TempDir, prefix: &str) -> SqliteDatastore {
    let mut config = config(dir.path());
    config.table_prefix = prefix.to_string();
    SqliteDatastore::open(&config, Arc::new(NoopEventSink)).expect("open datastore")
}

pub fn sample_namespaces() -> Vec<NamespaceDefinition> {
    vec![
        NamespaceDefinition::new("user", Vec::new()),
        NamespaceDefinition::new("folder", vec![RelationDefinition::new("viewer", &["user"])]),
        NamespaceDefinition::new(
            "document",
            vec![
                RelationDefinition::new("owner", &["user"]),
                RelationDefinition::new("viewer", &["user", "folder#viewer"]),
                RelationDefinition::new("parent", &["folder"]),
            ],
        ),
    ]
}

pub fn tuple(text: &str) -> RelationTuple {
    RelationTuple::parse(text).expect("tuple text")
}

pub fn write_schema(store: &SqliteDatastore) -> Revision {
    let namespaces = sample_namespaces();
    store
        .read_write_tx(&CancellationToken::new(), &mut |rwt: &mut dyn ReadWriteTransaction| {
            rwt.write_namespaces(&namespaces)
        })
        .expect("write namespaces")
}

pub fn write(
    store: &SqliteDatastore,
    mutations: Vec<RelationshipMutation>,
) -> Result<Revision, DatastoreError> {
    store.read_write_tx(&CancellationToken::new(), &mut |rwt: &mut dyn ReadWriteTransaction| {
        rwt.write_relationships(&mutations)
    })
}

pub fn touch(store: &SqliteDatastore, texts: &[&str]) -> Revision {
    write(store, texts.iter().map(|text| RelationshipMutation::touch(tuple(text))).collect())
        .expect("touch relationships")
}

pub fn documents_at(store: &SqliteDatastore, revision: Revision) -> Vec<String> {
    let reader = store.snapshot_reader(revision, &CancellationToken::new());
    let options = QueryOptions {
        sort: SortOrder::ByResource,
        ..QueryOptions::default()
    };
    reader
        .query_relationships(&RelationshipsFilter::for_resource_type("document"), &options)
        .expect("query documents")
        .map(|tuple| tuple.to_string())
        .collect()
}
