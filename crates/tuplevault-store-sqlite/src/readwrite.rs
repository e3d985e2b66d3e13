// crates/tuplevault-store-sqlite/src/readwrite.rs
// ============================================================================
// Module: Read-Write Transaction
// Description: Relationship, namespace, and caveat mutations at one revision.
// Purpose: Apply CREATE/TOUCH/DELETE semantics as tombstones plus inserts.
// Dependencies: rusqlite, sea-query, serde_json, tuplevault-core
// ============================================================================

//! ## Overview
//! A [`SqliteReadWriteTransaction`] runs inside an open `BEGIN IMMEDIATE`
//! transaction and stamps every change with the revision allocated for it.
//! Rows are never updated in place except to set `deleted_transaction`;
//! a changed fact is a tombstone of the old row plus an insert of the new.
//!
//! Relationship writes locate the live rows of every TOUCH and DELETE key in
//! one query. A TOUCH whose live row already matches (caveat included) is a
//! no-op; every other located row is tombstoned, then the CREATE and changed
//! TOUCH tuples are inserted. A CREATE against a live key trips the live-row
//! unique index and fails with [`DatastoreError::AlreadyExists`].
//!
//! # Invariants
//! - At most one live row exists per tuple key, namespace name, and caveat name.
//! - A batch never names the same key twice.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use rusqlite::Connection;
use sea_query::Cond;
use sea_query::Condition;
use sea_query::Expr;
use sea_query::ExprTrait;
use sea_query::InsertStatement;
use serde::Serialize;
use tuplevault_core::CancellationToken;
use tuplevault_core::CaveatDefinition;
use tuplevault_core::DatastoreError;
use tuplevault_core::ELLIPSIS;
use tuplevault_core::MutationOperation;
use tuplevault_core::NamespaceDefinition;
use tuplevault_core::QueryOptions;
use tuplevault_core::ReadWriteTransaction;
use tuplevault_core::Reader;
use tuplevault_core::RelationTuple;
use tuplevault_core::RelationshipFilter;
use tuplevault_core::RelationshipIterator;
use tuplevault_core::RelationshipMutation;
use tuplevault_core::RelationshipsFilter;
use tuplevault_core::ReverseQueryOptions;
use tuplevault_core::Revision;
use tuplevault_core::RevisionedCaveat;
use tuplevault_core::RevisionedNamespace;
use tuplevault_core::SubjectsFilter;
use tuplevault_core::TupleKey;

use crate::errors::ERR_BULK_LOAD;
use crate::errors::ERR_DELETE_CAVEAT;
use crate::errors::ERR_DELETE_NAMESPACE;
use crate::errors::ERR_DELETE_TUPLES;
use crate::errors::ERR_WRITE_CAVEAT;
use crate::errors::ERR_WRITE_NAMESPACE;
use crate::errors::ERR_WRITE_TUPLES;
use crate::errors::statement_error;
use crate::executor::SqlBackend;
use crate::executor::SqlQuery;
use crate::executor::TupleRow;
use crate::queries::COL_CAVEAT_DEF_NAME;
use crate::queries::COL_NAMESPACE_NAME;
use crate::queries::SchemaContext;
use crate::queries::live_expr;
use crate::queries::revision_value;
use crate::queries::tuple_key_condition;
use crate::reader::ReadScope;
use crate::reader::Visibility;
use crate::schema::Column;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Rows or key clauses per statement; keeps bind counts under engine limits.
const STATEMENT_CHUNK_SIZE: usize = 1_000;

// ============================================================================
// SECTION: Transaction
// ============================================================================

/// Mutation surface over an open write transaction.
pub struct SqliteReadWriteTransaction<'t> {
    /// Connection inside the open transaction.
    connection: &'t Connection,
    /// Schema context of the owning datastore.
    context: &'t SchemaContext,
    /// Caller cancellation.
    cancel: &'t CancellationToken,
    /// Revision stamped on every change.
    revision: Revision,
    /// Rows per bulk-load insert.
    bulk_load_batch_size: usize,
}

impl<'t> SqliteReadWriteTransaction<'t> {
    /// Wraps a connection whose write transaction is already open.
    pub(crate) const fn new(
        connection: &'t Connection,
        context: &'t SchemaContext,
        cancel: &'t CancellationToken,
        revision: Revision,
        bulk_load_batch_size: usize,
    ) -> Self {
        Self {
            connection,
            context,
            cancel,
            revision,
            bulk_load_batch_size,
        }
    }

    /// Returns the read scope over live rows.
    const fn scope(&self) -> ReadScope<'_> {
        ReadScope {
            context: self.context,
            cancel: self.cancel,
            visibility: Visibility::Live,
        }
    }

    /// Runs an UPDATE or INSERT and returns the changed row count.
    fn execute(&self, query: &SqlQuery, context: &str) -> Result<usize, DatastoreError> {
        self.connection.execute_statement(query, self.cancel, context)
    }

    /// Tombstones the live rows whose `column` is in each chunk of `values`.
    fn tombstone_in_chunks<V: Clone + Into<Expr>>(
        &self,
        tombstone: impl Fn(Condition) -> Result<SqlQuery, DatastoreError>,
        column: Column,
        values: &[V],
        context: &str,
    ) -> Result<usize, DatastoreError> {
        let mut changed = 0;
        for chunk in values.chunks(STATEMENT_CHUNK_SIZE) {
            let filter = Cond::all().add(Expr::col(column).is_in(chunk.iter().cloned()));
            changed += self.execute(&tombstone(filter)?, context)?;
        }
        Ok(changed)
    }

    /// Inserts tuples in statement-sized chunks.
    fn insert_tuples<'a>(
        &self,
        tuples: impl IntoIterator<Item = &'a RelationTuple>,
        chunk_size: usize,
        context: &str,
    ) -> Result<u64, DatastoreError> {
        let mut inserted = 0_u64;
        let mut insert = self.context.queries().insert_tuples();
        let mut rows = 0_usize;
        for tuple in tuples {
            insert.values(tuple_values(tuple, self.revision)?).map_err(|err| statement_error(&err))?;
            rows += 1;
            if rows >= chunk_size {
                inserted += self.flush_insert(&mut insert, context)?;
                rows = 0;
            }
        }
        if rows > 0 {
            inserted += self.flush_insert(&mut insert, context)?;
        }
        Ok(inserted)
    }

    /// Executes a pending tuple insert and resets it to an empty skeleton.
    fn flush_insert(
        &self,
        insert: &mut InsertStatement,
        context: &str,
    ) -> Result<u64, DatastoreError> {
        self.cancel.check(context)?;
        let pending = std::mem::replace(insert, self.context.queries().insert_tuples());
        let changed = self.execute(&SqlQuery::build(&pending)?, context)?;
        Ok(u64::try_from(changed).unwrap_or(u64::MAX))
    }

    /// Loads the live rows (with ids) of the given keys.
    fn live_rows(&self, keys: &[TupleKey]) -> Result<Vec<(i64, RelationTuple)>, DatastoreError> {
        let mut rows = Vec::new();
        for chunk in keys.chunks(STATEMENT_CHUNK_SIZE) {
            let keys = chunk.iter().map(tuple_key_condition).fold(Cond::any(), Condition::add);
            let select = self
                .context
                .queries()
                .select_tuples_with_id()
                .cond_where(Cond::all().add(live_expr()).add(keys))
                .to_owned();
            let query = SqlQuery::build(&select)?;
            let found = self.connection.execute_query(
                &query,
                self.cancel,
                ERR_WRITE_TUPLES,
                TupleRow::from_row_with_id,
            )?;
            for row in found {
                let id = row.id.ok_or_else(|| {
                    DatastoreError::Internal("tuple row selected without id".to_string())
                })?;
                rows.push((id, row.into_tuple()?));
            }
        }
        Ok(rows)
    }
}

// ============================================================================
// SECTION: Row Encoding
// ============================================================================

/// Returns the insert values of a tuple stamped with a revision.
fn tuple_values(tuple: &RelationTuple, revision: Revision) -> Result<Vec<Expr>, DatastoreError> {
    let (caveat_name, caveat_context) = match &tuple.caveat {
        Some(caveat) => {
            let json = String::from_utf8(caveat.context.to_json_bytes()?).map_err(|err| {
                DatastoreError::Internal(format!("caveat context is not utf-8: {err}"))
            })?;
            (Some(caveat.caveat_name.clone()), Some(json))
        }
        None => (None, None),
    };
    Ok(vec![
        Expr::val(tuple.resource.namespace.clone()),
        Expr::val(tuple.resource.object_id.clone()),
        Expr::val(tuple.resource.relation.clone()),
        Expr::val(tuple.subject.namespace.clone()),
        Expr::val(tuple.subject.object_id.clone()),
        Expr::val(tuple.subject.relation.clone()),
        Expr::val(caveat_name),
        Expr::val(caveat_context),
        Expr::val(revision_value(revision)),
    ])
}

/// Serializes definitions keyed by name, rejecting duplicate names.
fn encode_definitions<'a, T: Serialize + 'a>(
    definitions: impl IntoIterator<Item = (&'a str, &'a T)>,
    kind: &str,
) -> Result<Vec<(String, Vec<u8>)>, DatastoreError> {
    let mut seen = BTreeSet::new();
    let mut encoded = Vec::new();
    for (name, definition) in definitions {
        if !seen.insert(name) {
            return Err(DatastoreError::Invalid(format!("{kind} `{name}` written twice")));
        }
        let bytes = serde_json::to_vec(definition).map_err(|err| {
            DatastoreError::Invalid(format!("{kind} `{name}` does not serialize: {err}"))
        })?;
        encoded.push((name.to_string(), bytes));
    }
    Ok(encoded)
}

/// Copies names into owned bind values.
fn name_values<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    names.into_iter().map(str::to_string).collect()
}

// ============================================================================
// SECTION: Shared Definition Writes
// ============================================================================

impl SqliteReadWriteTransaction<'_> {
    /// Supersedes live definitions of the same names with new rows.
    fn replace_definitions(
        &self,
        encoded: Vec<(String, Vec<u8>)>,
        tombstone: impl Fn(Condition) -> Result<SqlQuery, DatastoreError>,
        insert: impl Fn() -> InsertStatement,
        name_column: Column,
        context: &str,
    ) -> Result<(), DatastoreError> {
        if encoded.is_empty() {
            return Ok(());
        }
        self.cancel.check(context)?;
        let names = name_values(encoded.iter().map(|(name, _)| name.as_str()));
        self.tombstone_in_chunks(tombstone, name_column, &names, context)?;
        for chunk in encoded.chunks(STATEMENT_CHUNK_SIZE) {
            let mut statement = insert();
            for (name, bytes) in chunk {
                statement
                    .values([
                        Expr::val(name.clone()),
                        Expr::val(bytes.clone()),
                        Expr::val(revision_value(self.revision)),
                    ])
                    .map_err(|err| statement_error(&err))?;
            }
            self.execute(&SqlQuery::build(&statement)?, context)?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Reader
// ============================================================================

impl Reader for SqliteReadWriteTransaction<'_> {
    fn query_relationships(
        &self,
        filter: &RelationshipsFilter,
        options: &QueryOptions,
    ) -> Result<RelationshipIterator, DatastoreError> {
        self.scope()
            .query_relationships(self.connection, filter, options)
            .map(RelationshipIterator::new)
    }

    fn reverse_query_relationships(
        &self,
        filter: &SubjectsFilter,
        options: &ReverseQueryOptions,
    ) -> Result<RelationshipIterator, DatastoreError> {
        self.scope()
            .reverse_query_relationships(self.connection, filter, options)
            .map(RelationshipIterator::new)
    }

    fn read_namespace_by_name(&self, name: &str) -> Result<RevisionedNamespace, DatastoreError> {
        self.scope().namespace_by_name(self.connection, name)
    }

    fn list_namespaces(&self) -> Result<Vec<RevisionedNamespace>, DatastoreError> {
        self.scope().namespaces(self.connection, None)
    }

    fn lookup_namespaces(
        &self,
        names: &[&str],
    ) -> Result<Vec<RevisionedNamespace>, DatastoreError> {
        self.scope().namespaces(self.connection, Some(names))
    }

    fn read_caveat_by_name(&self, name: &str) -> Result<RevisionedCaveat, DatastoreError> {
        self.scope().caveat_by_name(self.connection, name)
    }

    fn list_caveats(&self) -> Result<Vec<RevisionedCaveat>, DatastoreError> {
        self.scope().caveats(self.connection, None)
    }

    fn lookup_caveats(&self, names: &[&str]) -> Result<Vec<RevisionedCaveat>, DatastoreError> {
        self.scope().caveats(self.connection, Some(names))
    }
}

// ============================================================================
// SECTION: Mutations
// ============================================================================

impl ReadWriteTransaction for SqliteReadWriteTransaction<'_> {
    fn revision(&self) -> Revision {
        self.revision
    }

    fn write_relationships(
        &mut self,
        mutations: &[RelationshipMutation],
    ) -> Result<(), DatastoreError> {
        self.cancel.check(ERR_WRITE_TUPLES)?;
        let mut seen = BTreeSet::new();
        let mut pending: BTreeMap<TupleKey, &RelationTuple> = BTreeMap::new();
        let mut located = Vec::new();
        for mutation in mutations {
            let key = mutation.tuple.key();
            if !seen.insert(key.clone()) {
                return Err(DatastoreError::Invalid(format!(
                    "relationship `{}` mutated twice in one write",
                    mutation.tuple
                )));
            }
            match mutation.operation {
                MutationOperation::Create => {
                    pending.insert(key, &mutation.tuple);
                }
                MutationOperation::Touch => {
                    located.push(key.clone());
                    pending.insert(key, &mutation.tuple);
                }
                MutationOperation::Delete => located.push(key),
            }
        }

        let mut superseded = Vec::new();
        for (id, live) in self.live_rows(&located)? {
            let key = live.key();
            if pending.get(&key).is_some_and(|tuple| **tuple == live) {
                pending.remove(&key);
            } else {
                superseded.push(id);
            }
        }
        let revision = self.revision;
        let queries = self.context.queries();
        self.tombstone_in_chunks(
            |filter| queries.tombstone_tuples(revision, filter),
            Column::Id,
            &superseded,
            ERR_WRITE_TUPLES,
        )?;
        self.insert_tuples(pending.into_values(), STATEMENT_CHUNK_SIZE, ERR_WRITE_TUPLES)?;
        Ok(())
    }

    fn delete_relationships(&mut self, filter: &RelationshipFilter) -> Result<u64, DatastoreError> {
        self.cancel.check(ERR_DELETE_TUPLES)?;
        let mut condition =
            Cond::all().add(Expr::col(Column::Namespace).eq(filter.resource_type.clone()));
        if let Some(resource_id) = &filter.resource_id {
            condition = condition.add(Expr::col(Column::ObjectId).eq(resource_id.clone()));
        }
        if let Some(relation) = &filter.relation {
            condition = condition.add(Expr::col(Column::Relation).eq(relation.clone()));
        }
        if let Some(subject) = &filter.subject {
            condition = condition
                .add(Expr::col(Column::UsersetNamespace).eq(subject.subject_type.clone()));
            if let Some(subject_id) = &subject.subject_id {
                condition = condition.add(Expr::col(Column::UsersetObjectId).eq(subject_id.clone()));
            }
            if let Some(relation) = &subject.relation {
                let relation = if relation.is_empty() { ELLIPSIS } else { relation.as_str() };
                condition =
                    condition.add(Expr::col(Column::UsersetRelation).eq(relation.to_string()));
            }
        }
        let update = self.context.queries().tombstone_tuples(self.revision, condition)?;
        let changed = self.execute(&update, ERR_DELETE_TUPLES)?;
        Ok(u64::try_from(changed).unwrap_or(u64::MAX))
    }

    fn write_namespaces(
        &mut self,
        definitions: &[NamespaceDefinition],
    ) -> Result<(), DatastoreError> {
        let encoded = encode_definitions(
            definitions.iter().map(|definition| (definition.name.as_str(), definition)),
            "namespace",
        )?;
        let revision = self.revision;
        let queries = self.context.queries();
        self.replace_definitions(
            encoded,
            |filter| queries.tombstone_namespaces(revision, filter),
            || queries.insert_namespaces(),
            COL_NAMESPACE_NAME,
            ERR_WRITE_NAMESPACE,
        )
    }

    fn delete_namespaces(&mut self, names: &[&str]) -> Result<(), DatastoreError> {
        if names.is_empty() {
            return Ok(());
        }
        self.cancel.check(ERR_DELETE_NAMESPACE)?;
        let live: BTreeSet<String> = self
            .scope()
            .namespaces(self.connection, Some(names))?
            .into_iter()
            .map(|namespace| namespace.definition.name)
            .collect();
        if let Some(missing) = names.iter().find(|name| !live.contains(**name)) {
            return Err(DatastoreError::NamespaceNotFound((*missing).to_string()));
        }
        let values = name_values(names.iter().copied());
        let revision = self.revision;
        let queries = self.context.queries();
        self.tombstone_in_chunks(
            |filter| queries.tombstone_namespaces(revision, filter),
            COL_NAMESPACE_NAME,
            &values,
            ERR_DELETE_NAMESPACE,
        )?;
        self.tombstone_in_chunks(
            |filter| queries.tombstone_tuples(revision, filter),
            Column::Namespace,
            &values,
            ERR_DELETE_NAMESPACE,
        )?;
        Ok(())
    }

    fn write_caveats(&mut self, definitions: &[CaveatDefinition]) -> Result<(), DatastoreError> {
        let encoded = encode_definitions(
            definitions.iter().map(|definition| (definition.name.as_str(), definition)),
            "caveat",
        )?;
        let revision = self.revision;
        let queries = self.context.queries();
        self.replace_definitions(
            encoded,
            |filter| queries.tombstone_caveats(revision, filter),
            || queries.insert_caveats(),
            COL_CAVEAT_DEF_NAME,
            ERR_WRITE_CAVEAT,
        )
    }

    fn delete_caveats(&mut self, names: &[&str]) -> Result<(), DatastoreError> {
        if names.is_empty() {
            return Ok(());
        }
        self.cancel.check(ERR_DELETE_CAVEAT)?;
        let values = name_values(names.iter().copied());
        let revision = self.revision;
        let queries = self.context.queries();
        self.tombstone_in_chunks(
            |filter| queries.tombstone_caveats(revision, filter),
            COL_CAVEAT_DEF_NAME,
            &values,
            ERR_DELETE_CAVEAT,
        )?;
        Ok(())
    }

    fn bulk_load(
        &mut self,
        source: &mut dyn Iterator<Item = RelationTuple>,
    ) -> Result<u64, DatastoreError> {
        let batch_size = self.bulk_load_batch_size.max(1);
        let mut loaded = 0_u64;
        loop {
            self.cancel.check(ERR_BULK_LOAD)?;
            let batch: Vec<RelationTuple> = (&mut *source).take(batch_size).collect();
            if batch.is_empty() {
                return Ok(loaded);
            }
            loaded += self.insert_tuples(&batch, batch_size, ERR_BULK_LOAD)?;
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
