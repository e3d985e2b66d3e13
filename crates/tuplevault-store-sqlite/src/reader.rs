// crates/tuplevault-store-sqlite/src/reader.rs
// ============================================================================
// Module: Snapshot Reader
// Description: Relationship, namespace, and caveat reads at one revision.
// Purpose: Serve point-in-time queries through the reader connection pool.
// Dependencies: rusqlite, sea-query, serde_json, tuplevault-core
// ============================================================================

//! ## Overview
//! Every read runs through a [`ReadScope`], which pairs the schema context
//! with a visibility rule. Snapshot readers see rows created at or before
//! their revision and not yet tombstoned as of it. The reader embedded in a
//! write transaction sees live rows, including its own uncommitted writes.
//! [`SqliteReader`] performs no I/O until its first query.

// ============================================================================
// SECTION: Imports
// ============================================================================

use sea_query::Cond;
use sea_query::Condition;
use sea_query::Expr;
use sea_query::ExprTrait;
use sea_query::Order;
use sea_query::SelectStatement;
use serde::de::DeserializeOwned;
use tuplevault_core::CancellationToken;
use tuplevault_core::CaveatDefinition;
use tuplevault_core::DatastoreError;
use tuplevault_core::NamespaceDefinition;
use tuplevault_core::QueryOptions;
use tuplevault_core::Reader;
use tuplevault_core::RelationTuple;
use tuplevault_core::RelationshipIterator;
use tuplevault_core::RelationshipsFilter;
use tuplevault_core::ReverseQueryOptions;
use tuplevault_core::Revision;
use tuplevault_core::Revisioned;
use tuplevault_core::RevisionedCaveat;
use tuplevault_core::RevisionedNamespace;
use tuplevault_core::SortOrder;
use tuplevault_core::SubjectsFilter;

use crate::errors::ERR_QUERY_TUPLES;
use crate::errors::ERR_READ_CAVEAT;
use crate::errors::ERR_READ_NAMESPACE;
use crate::executor::SqlBackend;
use crate::executor::SqlQuery;
use crate::executor::query_tuples;
use crate::pool::ConnectionPool;
use crate::queries::COL_CAVEAT_DEF_NAME;
use crate::queries::COL_NAMESPACE_NAME;
use crate::queries::SchemaContext;
use crate::queries::live_condition;
use crate::queries::revision_from_stored;
use crate::queries::visible_at_condition;
use crate::schema::Column;
use crate::schema::SchemaQueryFilterer;

// ============================================================================
// SECTION: Visibility
// ============================================================================

/// Which row versions a read observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Visibility {
    /// Rows visible at a committed revision.
    Snapshot(Revision),
    /// Live rows, as seen from inside a write transaction.
    Live,
}

impl Visibility {
    /// Returns the row condition for this visibility.
    fn condition(self) -> Condition {
        match self {
            Self::Snapshot(revision) => visible_at_condition(revision),
            Self::Live => live_condition(),
        }
    }
}

/// Returns the order a query runs in; a cursor without an explicit order
/// uses the call's natural order.
const fn effective_sort(sort: SortOrder, has_cursor: bool, natural: SortOrder) -> SortOrder {
    match sort {
        SortOrder::Unsorted if has_cursor => natural,
        other => other,
    }
}

// ============================================================================
// SECTION: Read Scope
// ============================================================================

/// Schema context, cancellation, and visibility shared by one reader.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReadScope<'a> {
    /// Table names and statement skeletons.
    pub(crate) context: &'a SchemaContext,
    /// Caller cancellation.
    pub(crate) cancel: &'a CancellationToken,
    /// Row visibility rule.
    pub(crate) visibility: Visibility,
}

impl ReadScope<'_> {
    /// Runs a forward relationship query.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError`] when the query fails or is canceled.
    pub(crate) fn query_relationships<B: SqlBackend>(
        &self,
        backend: &B,
        filter: &RelationshipsFilter,
        options: &QueryOptions,
    ) -> Result<Vec<RelationTuple>, DatastoreError> {
        let sort = effective_sort(options.sort, options.after.is_some(), SortOrder::ByResource);
        let query = SchemaQueryFilterer::new(
            self.context.schema(),
            self.context.queries().select_tuples(),
        )
        .filter_with_condition(self.visibility.condition())
        .filter_with_relationships_filter(filter)
        .paginate(sort, options.after.as_ref(), options.limit)
        .into_query()?;
        query_tuples(backend, &query, self.cancel, ERR_QUERY_TUPLES)
    }

    /// Runs a subject-first relationship query.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError`] when the query fails or is canceled.
    pub(crate) fn reverse_query_relationships<B: SqlBackend>(
        &self,
        backend: &B,
        filter: &SubjectsFilter,
        options: &ReverseQueryOptions,
    ) -> Result<Vec<RelationTuple>, DatastoreError> {
        let sort = effective_sort(options.sort, options.after.is_some(), SortOrder::BySubject);
        let mut filterer = SchemaQueryFilterer::new(
            self.context.schema(),
            self.context.queries().select_tuples(),
        )
        .filter_with_condition(self.visibility.condition())
        .filter_with_subjects_selectors(&[filter.as_selector()]);
        if let Some(resource_relation) = &options.resource_relation {
            filterer = filterer
                .filter_to_resource_type(&resource_relation.namespace)
                .filter_to_relation(&resource_relation.relation);
        }
        let query = filterer.paginate(sort, options.after.as_ref(), options.limit).into_query()?;
        query_tuples(backend, &query, self.cancel, ERR_QUERY_TUPLES)
    }

    /// Loads visible namespaces, optionally restricted to `names`.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::IntegrityViolation`] when a stored config
    /// does not decode, or another [`DatastoreError`] when the query fails.
    pub(crate) fn namespaces<B: SqlBackend>(
        &self,
        backend: &B,
        names: Option<&[&str]>,
    ) -> Result<Vec<RevisionedNamespace>, DatastoreError> {
        let select = self.context.queries().select_namespaces();
        self.definitions(backend, select, COL_NAMESPACE_NAME, names, ERR_READ_NAMESPACE)
    }

    /// Loads visible caveats, optionally restricted to `names`.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::IntegrityViolation`] when a stored
    /// definition does not decode, or another [`DatastoreError`] when the
    /// query fails.
    pub(crate) fn caveats<B: SqlBackend>(
        &self,
        backend: &B,
        names: Option<&[&str]>,
    ) -> Result<Vec<RevisionedCaveat>, DatastoreError> {
        let select = self.context.queries().select_caveats();
        self.definitions(backend, select, COL_CAVEAT_DEF_NAME, names, ERR_READ_CAVEAT)
    }

    /// Reads one visible namespace.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::NamespaceNotFound`] when absent and
    /// [`DatastoreError::IntegrityViolation`] when several rows are visible.
    pub(crate) fn namespace_by_name<B: SqlBackend>(
        &self,
        backend: &B,
        name: &str,
    ) -> Result<RevisionedNamespace, DatastoreError> {
        let rows = self.namespaces(backend, Some(&[name]))?;
        single_definition(rows, name, "namespace")?
            .ok_or_else(|| DatastoreError::NamespaceNotFound(name.to_string()))
    }

    /// Reads one visible caveat.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::CaveatNotFound`] when absent and
    /// [`DatastoreError::IntegrityViolation`] when several rows are visible.
    pub(crate) fn caveat_by_name<B: SqlBackend>(
        &self,
        backend: &B,
        name: &str,
    ) -> Result<RevisionedCaveat, DatastoreError> {
        let rows = self.caveats(backend, Some(&[name]))?;
        single_definition(rows, name, "caveat")?
            .ok_or_else(|| DatastoreError::CaveatNotFound(name.to_string()))
    }

    /// Loads and decodes `(name, json, created_transaction)` rows.
    fn definitions<B: SqlBackend, T: DeserializeOwned>(
        &self,
        backend: &B,
        mut select: SelectStatement,
        name_column: Column,
        names: Option<&[&str]>,
        context: &str,
    ) -> Result<Vec<Revisioned<T>>, DatastoreError> {
        let mut condition = Cond::all().add(self.visibility.condition());
        if let Some(names) = names {
            if names.is_empty() {
                return Ok(Vec::new());
            }
            let names = names.iter().map(|name| (*name).to_string());
            condition = condition.add(Expr::col(name_column).is_in(names));
        }
        select.cond_where(condition).order_by(name_column, Order::Asc);
        let query = SqlQuery::build(&select)?;
        let rows = backend.execute_query(&query, self.cancel, context, |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?, row.get::<_, i64>(2)?))
        })?;
        rows.into_iter()
            .map(|(name, bytes, created)| {
                let definition = serde_json::from_slice(&bytes).map_err(|err| {
                    DatastoreError::IntegrityViolation(format!(
                        "stored definition `{name}` does not decode: {err}"
                    ))
                })?;
                Ok(Revisioned {
                    definition,
                    last_written_revision: revision_from_stored(created)?,
                })
            })
            .collect()
    }
}

/// Returns the only row, `None` for no rows, or an integrity error for more.
fn single_definition<T>(
    rows: Vec<Revisioned<T>>,
    name: &str,
    kind: &str,
) -> Result<Option<Revisioned<T>>, DatastoreError> {
    if rows.len() > 1 {
        return Err(DatastoreError::IntegrityViolation(format!(
            "{} visible rows for {kind} `{name}`",
            rows.len()
        )));
    }
    Ok(rows.into_iter().next())
}

// ============================================================================
// SECTION: Snapshot Reader
// ============================================================================

/// Reader bound to one revision, served by the reader pool.
pub struct SqliteReader<'a> {
    /// Connections to read from.
    pool: &'a ConnectionPool,
    /// Schema context of the owning datastore.
    context: &'a SchemaContext,
    /// Caller cancellation.
    cancel: CancellationToken,
    /// Snapshot revision.
    revision: Revision,
}

impl<'a> SqliteReader<'a> {
    /// Creates a reader; no statement runs until the first query.
    pub(crate) const fn new(
        pool: &'a ConnectionPool,
        context: &'a SchemaContext,
        cancel: CancellationToken,
        revision: Revision,
    ) -> Self {
        Self {
            pool,
            context,
            cancel,
            revision,
        }
    }

    /// Returns the snapshot revision.
    #[must_use]
    pub const fn revision(&self) -> Revision {
        self.revision
    }

    /// Returns the read scope for this snapshot.
    const fn scope(&self) -> ReadScope<'_> {
        ReadScope {
            context: self.context,
            cancel: &self.cancel,
            visibility: Visibility::Snapshot(self.revision),
        }
    }
}

impl Reader for SqliteReader<'_> {
    fn query_relationships(
        &self,
        filter: &RelationshipsFilter,
        options: &QueryOptions,
    ) -> Result<RelationshipIterator, DatastoreError> {
        self.pool
            .with_reader(|conn| self.scope().query_relationships(conn, filter, options))
            .map(RelationshipIterator::new)
    }

    fn reverse_query_relationships(
        &self,
        filter: &SubjectsFilter,
        options: &ReverseQueryOptions,
    ) -> Result<RelationshipIterator, DatastoreError> {
        self.pool
            .with_reader(|conn| self.scope().reverse_query_relationships(conn, filter, options))
            .map(RelationshipIterator::new)
    }

    fn read_namespace_by_name(&self, name: &str) -> Result<RevisionedNamespace, DatastoreError> {
        self.pool.with_reader(|conn| self.scope().namespace_by_name(conn, name))
    }

    fn list_namespaces(&self) -> Result<Vec<RevisionedNamespace>, DatastoreError> {
        self.pool.with_reader(|conn| self.scope().namespaces(conn, None))
    }

    fn lookup_namespaces(
        &self,
        names: &[&str],
    ) -> Result<Vec<Revisioned<NamespaceDefinition>>, DatastoreError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        self.pool.with_reader(|conn| self.scope().namespaces(conn, Some(names)))
    }

    fn read_caveat_by_name(&self, name: &str) -> Result<RevisionedCaveat, DatastoreError> {
        self.pool.with_reader(|conn| self.scope().caveat_by_name(conn, name))
    }

    fn list_caveats(&self) -> Result<Vec<RevisionedCaveat>, DatastoreError> {
        self.pool.with_reader(|conn| self.scope().caveats(conn, None))
    }

    fn lookup_caveats(
        &self,
        names: &[&str],
    ) -> Result<Vec<Revisioned<CaveatDefinition>>, DatastoreError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        self.pool.with_reader(|conn| self.scope().caveats(conn, Some(names)))
    }
}
