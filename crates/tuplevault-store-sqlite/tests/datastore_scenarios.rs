// crates/tuplevault-store-sqlite/tests/datastore_scenarios.rs
// ============================================================================
// Module: Datastore Scenario Tests
// Description: End-to-end behavior of the SQLite datastore.
// Purpose: Validate snapshot visibility, mutation semantics, and lifecycle.
// Dependencies: tuplevault-core, tuplevault-store-sqlite, rusqlite, tempfile
// ============================================================================

//! ## Overview
//! Drives a file-backed datastore through writes, snapshot reads, schema
//! changes, and shutdown, asserting what each revision observes.

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

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread;

use common::DB_FILE;
use common::documents_at;
use common::open_store;
use common::open_with_prefix;
use common::touch;
use common::tuple;
use common::write;
use common::write_schema;
use rusqlite::Connection;
use serde_json::json;
use tempfile::TempDir;
use tuplevault_core::CancellationToken;
use tuplevault_core::CaveatContext;
use tuplevault_core::CaveatDefinition;
use tuplevault_core::ContextualizedCaveat;
use tuplevault_core::Datastore;
use tuplevault_core::DatastoreError;
use tuplevault_core::InvalidRevisionReason;
use tuplevault_core::NamespaceDefinition;
use tuplevault_core::QueryOptions;
use tuplevault_core::ReadWriteTransaction;
use tuplevault_core::RelationDefinition;
use tuplevault_core::RelationReference;
use tuplevault_core::RelationshipFilter;
use tuplevault_core::RelationshipMutation;
use tuplevault_core::RelationshipsFilter;
use tuplevault_core::ReverseQueryOptions;
use tuplevault_core::Revision;
use tuplevault_core::SortOrder;
use tuplevault_core::SubjectFilter;
use tuplevault_core::SubjectsFilter;
use tuplevault_store_sqlite::HEAD;
use tuplevault_store_sqlite::MigrateOptions;
use tuplevault_store_sqlite::NoopEventSink;
use tuplevault_store_sqlite::RunMode;
use tuplevault_store_sqlite::SqliteDatastore;
use tuplevault_store_sqlite::SqliteDatastoreConfig;

fn by_resource() -> QueryOptions {
    QueryOptions {
        sort: SortOrder::ByResource,
        ..QueryOptions::default()
    }
}

// ============================================================================
// SECTION: Snapshot Visibility
// ============================================================================

#[test]
fn earlier_snapshot_does_not_see_later_create() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    let r1 = write_schema(&store);
    let r2 = write(
        &store,
        vec![RelationshipMutation::create(tuple("document:readme#owner@user:alice"))],
    )
    .expect("create");

    assert!(r2 > r1);
    assert_eq!(store.head_revision().expect("head"), r2);
    assert_eq!(documents_at(&store, r2), vec!["document:readme#owner@user:alice".to_string()]);
    assert!(documents_at(&store, r1).is_empty());
}

#[test]
fn revisions_increase_and_failed_writes_leave_head_unchanged() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    let base = store.head_revision().expect("head");
    assert!(!base.is_none());

    let r1 = write_schema(&store);
    let r2 = touch(&store, &["document:a#viewer@user:alice"]);
    let r3 = touch(&store, &["document:b#viewer@user:alice"]);
    assert!(base < r1 && r1 < r2 && r2 < r3);

    let failed = store.read_write_tx(
        &CancellationToken::new(),
        &mut |rwt: &mut dyn ReadWriteTransaction| {
            rwt.write_relationships(&[RelationshipMutation::touch(tuple(
                "document:c#viewer@user:alice",
            ))])?;
            Err(DatastoreError::PreconditionFailed("caller aborted".to_string()))
        },
    );
    assert!(matches!(failed, Err(DatastoreError::PreconditionFailed(_))));
    assert_eq!(store.head_revision().expect("head"), r3);
    assert_eq!(documents_at(&store, r3).len(), 2);
}

#[test]
fn transaction_reader_sees_its_own_writes() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    write_schema(&store);
    let mut observed = Vec::new();
    store
        .read_write_tx(&CancellationToken::new(), &mut |rwt: &mut dyn ReadWriteTransaction| {
            rwt.write_relationships(&[RelationshipMutation::create(tuple(
                "document:readme#owner@user:alice",
            ))])?;
            let filter = RelationshipsFilter::for_resource("document", "readme");
            observed = rwt
                .query_relationships(&filter, &by_resource())?
                .map(|found| found.to_string())
                .collect();
            Ok(())
        })
        .expect("write");
    assert_eq!(observed, vec!["document:readme#owner@user:alice".to_string()]);
}

// ============================================================================
// SECTION: Mutation Semantics
// ============================================================================

#[test]
fn touch_is_idempotent() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    write_schema(&store);
    let first = touch(&store, &["document:readme#viewer@user:bob"]);
    let second = touch(&store, &["document:readme#viewer@user:bob"]);

    assert!(second > first);
    assert_eq!(documents_at(&store, second), vec!["document:readme#viewer@user:bob".to_string()]);
    assert_eq!(store.statistics().expect("stats").estimated_relationship_count, 1);

    let connection = Connection::open(dir.path().join(DB_FILE)).expect("open database file");
    let mut statement = connection
        .prepare(
            "SELECT created_transaction, deleted_transaction FROM relation_tuple WHERE \
             namespace = ?1 AND object_id = ?2 AND relation = ?3 AND userset_namespace = ?4 \
             AND userset_object_id = ?5 AND userset_relation = ?6",
        )
        .expect("prepare");
    let history: Vec<(i64, i64)> = statement
        .query_map(["document", "readme", "viewer", "user", "bob", "..."], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .expect("query history")
        .collect::<Result<_, _>>()
        .expect("decode history");
    let first_id = i64::try_from(first.transaction_id()).expect("revision fits");
    assert_eq!(history, vec![(first_id, i64::MAX)]);
}

#[test]
fn touch_with_new_caveat_replaces_the_live_row() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    write_schema(&store);
    let plain = touch(&store, &["document:plan#viewer@user:bob"]);
    let caveated = touch(&store, &["document:plan#viewer@user:bob[on_weekdays]"]);

    assert_eq!(documents_at(&store, plain), vec!["document:plan#viewer@user:bob".to_string()]);
    assert_eq!(
        documents_at(&store, caveated),
        vec!["document:plan#viewer@user:bob[on_weekdays]".to_string()]
    );
    assert_eq!(store.statistics().expect("stats").estimated_relationship_count, 1);
}

#[test]
fn create_of_live_key_fails_without_advancing_head() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    write_schema(&store);
    let head = touch(&store, &["document:readme#owner@user:alice"]);

    let result = write(
        &store,
        vec![RelationshipMutation::create(tuple("document:readme#owner@user:alice"))],
    );
    assert!(matches!(result, Err(DatastoreError::AlreadyExists(_))));
    assert_eq!(store.head_revision().expect("head"), head);
}

#[test]
fn delete_then_create_restores_the_relationship() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    write_schema(&store);
    let created = touch(&store, &["document:readme#owner@user:alice"]);
    let deleted = write(
        &store,
        vec![RelationshipMutation::delete(tuple("document:readme#owner@user:alice"))],
    )
    .expect("delete");
    let recreated = write(
        &store,
        vec![RelationshipMutation::create(tuple("document:readme#owner@user:alice"))],
    )
    .expect("create");

    assert_eq!(documents_at(&store, created).len(), 1);
    assert!(documents_at(&store, deleted).is_empty());
    assert_eq!(documents_at(&store, recreated).len(), 1);
}

#[test]
fn delete_of_missing_key_is_a_no_op() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    write_schema(&store);
    let revision = write(
        &store,
        vec![RelationshipMutation::delete(tuple("document:ghost#owner@user:nobody"))],
    )
    .expect("delete");
    assert!(documents_at(&store, revision).is_empty());
}

#[test]
fn key_mutated_twice_in_one_write_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    write_schema(&store);
    let result = write(
        &store,
        vec![
            RelationshipMutation::touch(tuple("document:readme#owner@user:alice")),
            RelationshipMutation::delete(tuple("document:readme#owner@user:alice")),
        ],
    );
    assert!(matches!(result, Err(DatastoreError::Invalid(_))));
}

#[test]
fn delete_relationships_tombstones_matching_rows() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    write_schema(&store);
    let before = touch(
        &store,
        &[
            "document:readme#viewer@user:bob",
            "document:plan#viewer@user:bob",
            "document:plan#viewer@folder:eng#viewer",
            "document:plan#owner@user:alice",
        ],
    );

    let mut deleted = 0;
    let after = store
        .read_write_tx(&CancellationToken::new(), &mut |rwt: &mut dyn ReadWriteTransaction| {
            let filter = RelationshipFilter {
                relation: Some("viewer".to_string()),
                subject: Some(SubjectFilter {
                    subject_type: "user".to_string(),
                    subject_id: None,
                    relation: Some(String::new()),
                }),
                ..RelationshipFilter::for_resource_type("document")
            };
            deleted = rwt.delete_relationships(&filter)?;
            Ok(())
        })
        .expect("delete by filter");

    assert_eq!(deleted, 2);
    assert_eq!(documents_at(&store, before).len(), 4);
    assert_eq!(
        documents_at(&store, after),
        vec![
            "document:plan#owner@user:alice".to_string(),
            "document:plan#viewer@folder:eng#viewer".to_string(),
        ]
    );
}

#[test]
fn caveat_context_survives_storage() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    write_schema(&store);
    let mut context = CaveatContext::new();
    context.insert("cidr", json!("10.0.0.0/8"));
    context.insert("max_hops", json!(3));
    let caveated = tuple("document:plan#viewer@user:bob")
        .with_caveat(ContextualizedCaveat::new("ip_allowlist", context.clone()));
    let revision =
        write(&store, vec![RelationshipMutation::touch(caveated.clone())]).expect("write");

    let reader = store.snapshot_reader(revision, &CancellationToken::new());
    let found: Vec<_> = reader
        .query_relationships(&RelationshipsFilter::for_resource_type("document"), &by_resource())
        .expect("query")
        .collect();
    assert_eq!(found, vec![caveated]);
    let stored = found[0].caveat.as_ref().expect("caveat");
    assert_eq!(stored.context, context);
}

#[test]
fn bulk_load_inserts_across_batches() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    write_schema(&store);
    let tuples: Vec<_> = (0 .. 1_200)
        .map(|index| tuple(&format!("document:doc{index}#viewer@user:u{index}")))
        .collect();

    let mut loaded = 0;
    store
        .read_write_tx(&CancellationToken::new(), &mut |rwt: &mut dyn ReadWriteTransaction| {
            loaded = rwt.bulk_load(&mut tuples.clone().into_iter())?;
            Ok(())
        })
        .expect("bulk load");
    assert_eq!(loaded, 1_200);
    assert_eq!(store.statistics().expect("stats").estimated_relationship_count, 1_200);

    let again = store.read_write_tx(
        &CancellationToken::new(),
        &mut |rwt: &mut dyn ReadWriteTransaction| {
            rwt.bulk_load(&mut tuples.iter().take(1).cloned())?;
            Ok(())
        },
    );
    assert!(matches!(again, Err(DatastoreError::AlreadyExists(_))));
}

// ============================================================================
// SECTION: Queries
// ============================================================================

#[test]
fn forward_query_pages_with_cursor() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    write_schema(&store);
    let revision = touch(
        &store,
        &[
            "document:d1#viewer@user:alice",
            "document:d2#viewer@user:alice",
            "document:d3#viewer@user:alice",
            "document:d4#viewer@user:alice",
            "document:d5#viewer@user:alice",
        ],
    );
    let reader = store.snapshot_reader(revision, &CancellationToken::new());
    let filter = RelationshipsFilter::for_resource_type("document").with_relation("viewer");

    let mut pages = Vec::new();
    let mut after = None;
    loop {
        let options = QueryOptions {
            limit: Some(2),
            after: after.clone(),
            sort: SortOrder::ByResource,
        };
        let page: Vec<_> = reader.query_relationships(&filter, &options).expect("page").collect();
        if page.is_empty() {
            break;
        }
        after = page.last().cloned();
        pages.push(page.iter().map(|found| found.resource.object_id.clone()).collect::<Vec<_>>());
    }
    assert_eq!(
        pages,
        vec![
            vec!["d1".to_string(), "d2".to_string()],
            vec!["d3".to_string(), "d4".to_string()],
            vec!["d5".to_string()],
        ]
    );
}

#[test]
fn reverse_query_filters_by_subject_and_resource_relation() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    write_schema(&store);
    let revision = touch(
        &store,
        &[
            "document:readme#viewer@user:bob",
            "document:plan#owner@user:bob",
            "folder:eng#viewer@user:bob",
            "document:plan#viewer@user:carol",
        ],
    );
    let reader = store.snapshot_reader(revision, &CancellationToken::new());
    let filter = SubjectsFilter {
        subject_type: "user".to_string(),
        subject_ids: vec!["bob".to_string()],
        relation: None,
    };

    let all: Vec<String> = reader
        .reverse_query_relationships(&filter, &ReverseQueryOptions::default())
        .expect("reverse")
        .map(|found| found.to_string())
        .collect();
    assert_eq!(all.len(), 3);

    let options = ReverseQueryOptions {
        resource_relation: Some(RelationReference {
            namespace: "document".to_string(),
            relation: "viewer".to_string(),
        }),
        ..ReverseQueryOptions::default()
    };
    let narrowed: Vec<String> = reader
        .reverse_query_relationships(&filter, &options)
        .expect("reverse")
        .map(|found| found.to_string())
        .collect();
    assert_eq!(narrowed, vec!["document:readme#viewer@user:bob".to_string()]);
}

// ============================================================================
// SECTION: Revisions
// ============================================================================

#[test]
fn check_revision_classifies_revisions() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    let written = write_schema(&store);

    assert_eq!(store.check_revision(written), Ok(()));
    assert_eq!(
        store.check_revision(Revision::NONE),
        Err(DatastoreError::InvalidRevision {
            revision: Revision::NONE,
            reason: InvalidRevisionReason::Unset,
        })
    );
    let future = Revision::new(written.transaction_id() + 100);
    assert_eq!(
        store.check_revision(future),
        Err(DatastoreError::InvalidRevision {
            revision: future,
            reason: InvalidRevisionReason::Unknown,
        })
    );
    assert_eq!(store.optimized_revision().expect("optimized"), written);
}

// ============================================================================
// SECTION: Namespaces and Caveats
// ============================================================================

#[test]
fn namespace_rewrite_keeps_older_version_readable() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    let first = write_schema(&store);
    let updated = NamespaceDefinition::new(
        "document",
        vec![
            RelationDefinition::new("owner", &["user"]),
            RelationDefinition::new("editor", &["user"]),
        ],
    );
    let second = store
        .read_write_tx(&CancellationToken::new(), &mut |rwt: &mut dyn ReadWriteTransaction| {
            rwt.write_namespaces(std::slice::from_ref(&updated))
        })
        .expect("rewrite");

    let old = store
        .snapshot_reader(first, &CancellationToken::new())
        .read_namespace_by_name("document")
        .expect("old namespace");
    assert_eq!(old.last_written_revision, first);
    assert!(old.definition.relation("viewer").is_ok());

    let new = store
        .snapshot_reader(second, &CancellationToken::new())
        .read_namespace_by_name("document")
        .expect("new namespace");
    assert_eq!(new.definition, updated);
    assert_eq!(new.last_written_revision, second);
    assert!(matches!(
        new.definition.relation("viewer"),
        Err(DatastoreError::RelationNotFound { .. })
    ));

    let reader = store.snapshot_reader(second, &CancellationToken::new());
    let names: Vec<String> = reader
        .list_namespaces()
        .expect("list")
        .into_iter()
        .map(|namespace| namespace.definition.name)
        .collect();
    assert_eq!(names, vec!["document".to_string(), "folder".to_string(), "user".to_string()]);
    let found = reader.lookup_namespaces(&["user", "missing"]).expect("lookup");
    assert_eq!(found.len(), 1);
    assert!(reader.lookup_namespaces(&[]).expect("empty lookup").is_empty());
}

#[test]
fn deleting_namespace_cascades_to_relationships() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    write_schema(&store);
    let populated = touch(&store, &["document:readme#owner@user:alice", "folder:eng#viewer@user:bob"]);
    let deleted = store
        .read_write_tx(&CancellationToken::new(), &mut |rwt: &mut dyn ReadWriteTransaction| {
            rwt.delete_namespaces(&["document"])
        })
        .expect("delete namespace");

    assert_eq!(documents_at(&store, populated).len(), 1);
    assert!(documents_at(&store, deleted).is_empty());
    let reader = store.snapshot_reader(deleted, &CancellationToken::new());
    assert_eq!(
        reader.read_namespace_by_name("document"),
        Err(DatastoreError::NamespaceNotFound("document".to_string()))
    );
    let folders = reader
        .query_relationships(&RelationshipsFilter::for_resource_type("folder"), &by_resource())
        .expect("folders");
    assert_eq!(folders.len(), 1);

    let missing = store.read_write_tx(
        &CancellationToken::new(),
        &mut |rwt: &mut dyn ReadWriteTransaction| rwt.delete_namespaces(&["document"]),
    );
    assert_eq!(missing, Err(DatastoreError::NamespaceNotFound("document".to_string())));
}

#[test]
fn caveats_are_versioned_like_namespaces() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    let mut parameters = BTreeMap::new();
    parameters.insert("cidr".to_string(), "string".to_string());
    let caveat = CaveatDefinition::new("ip_allowlist", "ip in cidr", parameters);
    let written = store
        .read_write_tx(&CancellationToken::new(), &mut |rwt: &mut dyn ReadWriteTransaction| {
            rwt.write_caveats(std::slice::from_ref(&caveat))
        })
        .expect("write caveat");
    let removed = store
        .read_write_tx(&CancellationToken::new(), &mut |rwt: &mut dyn ReadWriteTransaction| {
            rwt.delete_caveats(&["ip_allowlist"])
        })
        .expect("delete caveat");

    let reader = store.snapshot_reader(written, &CancellationToken::new());
    let stored = reader.read_caveat_by_name("ip_allowlist").expect("caveat");
    assert_eq!(stored.definition, caveat);
    assert_eq!(stored.last_written_revision, written);
    assert_eq!(reader.list_caveats().expect("list").len(), 1);
    assert_eq!(reader.lookup_caveats(&["ip_allowlist", "other"]).expect("lookup").len(), 1);

    let reader = store.snapshot_reader(removed, &CancellationToken::new());
    assert_eq!(
        reader.read_caveat_by_name("ip_allowlist"),
        Err(DatastoreError::CaveatNotFound("ip_allowlist".to_string()))
    );
    assert!(reader.list_caveats().expect("list").is_empty());
}

// ============================================================================
// SECTION: Cancellation
// ============================================================================

#[test]
fn canceled_token_aborts_reads_and_writes() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    let head = write_schema(&store);

    let token = CancellationToken::new();
    token.cancel();
    let result = store.read_write_tx(&token, &mut |_rwt: &mut dyn ReadWriteTransaction| Ok(()));
    assert!(matches!(result, Err(DatastoreError::Canceled(_))));

    let reader = store.snapshot_reader(head, &token);
    let read = reader
        .query_relationships(&RelationshipsFilter::for_resource_type("document"), &by_resource());
    assert!(matches!(read, Err(DatastoreError::Canceled(_))));

    let token = CancellationToken::new();
    let inner = token.clone();
    let result = store.read_write_tx(&token, &mut |rwt: &mut dyn ReadWriteTransaction| {
        inner.cancel();
        rwt.write_relationships(&[RelationshipMutation::touch(tuple(
            "document:readme#owner@user:alice",
        ))])
    });
    assert!(matches!(result, Err(DatastoreError::Canceled(_))));
    assert_eq!(store.head_revision().expect("head"), head);
}

// ============================================================================
// SECTION: Status
// ============================================================================

#[test]
fn ready_state_reports_pending_migrations() {
    let dir = TempDir::new().expect("tempdir");
    let config = SqliteDatastoreConfig::for_path(dir.path().join(common::DB_FILE));
    let store = SqliteDatastore::open(&config, Arc::new(NoopEventSink)).expect("open");

    let state = store.ready_state().expect("ready state");
    assert!(!state.is_ready);
    assert!(state.message.contains("tuplevault migrate"));

    store
        .migrate(MigrateOptions {
            target: HEAD,
            timeout_ms: 10_000,
            backfill_batch_size: 100,
            mode: RunMode::LiveRun,
        })
        .expect("migrate");
    let state = store.ready_state().expect("ready state");
    assert!(!state.is_ready);
    assert!(state.message.contains("not seeded"));

    assert!(store.seed().expect("seed").is_seeded());
    assert!(store.ready_state().expect("ready state").is_ready);
}

#[test]
fn statistics_count_live_relationships_per_namespace() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    write_schema(&store);
    touch(
        &store,
        &[
            "document:readme#owner@user:alice",
            "document:readme#viewer@user:bob",
            "document:plan#viewer@user:bob",
            "folder:eng#viewer@user:carol",
        ],
    );
    write(&store, vec![RelationshipMutation::delete(tuple("document:plan#viewer@user:bob"))])
        .expect("delete");

    let stats = store.statistics().expect("stats");
    assert_eq!(stats.estimated_relationship_count, 3);
    let counts: Vec<(String, u64, u64)> = stats
        .object_type_statistics
        .into_iter()
        .map(|stat| (stat.name, stat.relationship_count, stat.object_count))
        .collect();
    assert_eq!(
        counts,
        vec![
            ("document".to_string(), 2, 1),
            ("folder".to_string(), 1, 1),
            ("user".to_string(), 0, 0),
        ]
    );
    assert_eq!(stats.unique_id, store.statistics().expect("stats").unique_id);
}

#[test]
fn watch_is_reported_unsupported() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    let features = store.features().expect("features");
    assert!(!features.watch.enabled);
    assert!(!features.watch.reason.is_empty());

    let (changes, errors) = store.watch(Revision::NONE);
    assert!(changes.recv().is_err());
    assert!(errors.recv().is_err());
}

// ============================================================================
// SECTION: Isolation and Lifecycle
// ============================================================================

#[test]
fn table_prefixes_isolate_datastores_in_one_file() {
    let dir = TempDir::new().expect("tempdir");
    let tenant_a = open_with_prefix(&dir, "tenant_a_");
    let tenant_b = open_with_prefix(&dir, "tenant_b_");
    write_schema(&tenant_a);
    write_schema(&tenant_b);
    let revision_a = touch(&tenant_a, &["document:readme#owner@user:alice"]);
    let revision_b = tenant_b.head_revision().expect("head");

    assert_eq!(documents_at(&tenant_a, revision_a).len(), 1);
    assert!(documents_at(&tenant_b, revision_b).is_empty());
    assert_ne!(
        tenant_a.statistics().expect("stats").unique_id,
        tenant_b.statistics().expect("stats").unique_id
    );
    assert_eq!(tenant_a.table_prefix(), "tenant_a_");
}

#[test]
fn reopening_keeps_identity_and_data() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    write_schema(&store);
    let revision = touch(&store, &["document:readme#owner@user:alice"]);
    let ident = store.statistics().expect("stats").unique_id;
    store.close().expect("close");

    let reopened = open_store(&dir);
    assert_eq!(reopened.statistics().expect("stats").unique_id, ident);
    assert_eq!(reopened.head_revision().expect("head"), revision);
    assert_eq!(documents_at(&reopened, revision).len(), 1);
}

#[test]
fn close_is_idempotent_and_rejects_later_work() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    let head = write_schema(&store);
    store.close().expect("close");
    store.close().expect("second close");

    assert_eq!(store.head_revision(), Err(DatastoreError::Closed));
    let reader = store.snapshot_reader(head, &CancellationToken::new());
    assert!(matches!(reader.list_namespaces(), Err(DatastoreError::Closed)));
    let result = store.read_write_tx(
        &CancellationToken::new(),
        &mut |_rwt: &mut dyn ReadWriteTransaction| Ok(()),
    );
    assert_eq!(result, Err(DatastoreError::Closed));
}

#[test]
fn snapshot_read_inside_write_on_single_connection_fails_fast() {
    let store = SqliteDatastore::with_connection(
        Connection::open_in_memory().expect("memory"),
        Box::new(|_connection| Ok(())),
        "",
        Arc::new(NoopEventSink),
    )
    .expect("wrap connection");
    store
        .migrate(MigrateOptions {
            target: HEAD,
            timeout_ms: 10_000,
            backfill_batch_size: 100,
            mode: RunMode::LiveRun,
        })
        .expect("migrate");
    store.seed().expect("seed");

    let mut nested = None;
    store
        .read_write_tx(&CancellationToken::new(), &mut |_rwt: &mut dyn ReadWriteTransaction| {
            nested = Some(store.head_revision());
            Ok(())
        })
        .expect("write");
    assert!(matches!(nested, Some(Err(DatastoreError::Internal(_)))));
    assert!(store.head_revision().is_ok());
}

#[test]
fn borrowed_connection_is_handed_back_on_close() {
    let connection = Connection::open_in_memory().expect("memory");
    let returned = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&returned);
    let store = SqliteDatastore::with_connection(
        connection,
        Box::new(move |_connection| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }),
        "",
        Arc::new(NoopEventSink),
    )
    .expect("wrap connection");

    store
        .migrate(MigrateOptions {
            target: HEAD,
            timeout_ms: 10_000,
            backfill_batch_size: 100,
            mode: RunMode::LiveRun,
        })
        .expect("migrate");
    store.seed().expect("seed");
    write_schema(&store);
    let revision = touch(&store, &["document:readme#owner@user:alice"]);
    assert_eq!(documents_at(&store, revision).len(), 1);

    store.close().expect("close");
    assert!(returned.load(Ordering::SeqCst));
}

// ============================================================================
// SECTION: Concurrency
// ============================================================================

/// Touches one relationship, retrying while another writer holds the lock.
fn touch_with_retry(store: &SqliteDatastore, text: &str) -> Revision {
    loop {
        match write(store, vec![RelationshipMutation::touch(tuple(text))]) {
            Ok(revision) => return revision,
            Err(err) if err.is_retryable() => thread::yield_now(),
            Err(err) => panic!("touch {text} failed: {err}"),
        }
    }
}

#[test]
fn concurrent_writers_allocate_distinct_ordered_revisions() {
    const THREADS: usize = 4;
    const WRITES_PER_THREAD: usize = 25;

    let dir = TempDir::new().expect("tempdir");
    let first = open_store(&dir);
    let second = open_store(&dir);
    write_schema(&first);
    let baseline = touch(&first, &["document:baseline#owner@user:alice"]);

    let per_thread: Vec<Vec<Revision>> = thread::scope(|scope| {
        let writers: Vec<_> = (0 .. THREADS)
            .map(|worker| {
                let store = if worker % 2 == 0 { &first } else { &second };
                scope.spawn(move || {
                    (0 .. WRITES_PER_THREAD)
                        .map(|index| {
                            let text = format!("document:doc_{worker}_{index}#viewer@user:bob");
                            touch_with_retry(store, &text)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let reader = scope.spawn(|| {
            for _ in 0 .. 20 {
                assert_eq!(
                    documents_at(&second, baseline),
                    vec!["document:baseline#owner@user:alice".to_string()]
                );
            }
        });
        reader.join().expect("reader thread");
        writers.into_iter().map(|writer| writer.join().expect("writer thread")).collect()
    });

    let mut all = BTreeSet::new();
    for revisions in &per_thread {
        assert!(revisions.windows(2).all(|pair| pair[0] < pair[1]));
        all.extend(revisions.iter().copied());
    }
    assert_eq!(all.len(), THREADS * WRITES_PER_THREAD);
    assert!(all.iter().all(|revision| *revision > baseline));

    let head = first.head_revision().expect("head");
    assert_eq!(all.last().copied(), Some(head));
    assert_eq!(documents_at(&first, baseline).len(), 1);
    assert_eq!(documents_at(&second, head).len(), THREADS * WRITES_PER_THREAD + 1);
    assert_eq!(
        first.statistics().expect("stats").estimated_relationship_count,
        u64::try_from(THREADS * WRITES_PER_THREAD + 1).expect("count fits")
    );
}
