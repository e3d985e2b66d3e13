// crates/tuplevault-store-sqlite/src/queries.rs
// ============================================================================
// Module: Statement Skeletons
// Description: Prebuilt statement templates bound to one table-name set.
// Purpose: Build every statement skeleton once per datastore instance.
// Dependencies: sea-query, tuplevault-core
// ============================================================================

//! ## Overview
//! [`SchemaContext`] bundles the resolved [`Tables`], the tuple
//! [`SchemaInformation`], and [`Queries`]. It is built once when a datastore
//! is constructed and shared immutably by readers and write transactions.
//! Fixed statements are rendered once; filtered statements are returned as
//! `sea-query` skeletons that callers finish with a single WHERE condition.

// ============================================================================
// SECTION: Imports
// ============================================================================

use sea_query::Alias;
use sea_query::Cond;
use sea_query::Condition;
use sea_query::Expr;
use sea_query::ExprTrait;
use sea_query::Func;
use sea_query::InsertStatement;
use sea_query::OnConflict;
use sea_query::Query;
use sea_query::SelectStatement;
use tuplevault_core::DatastoreError;
use tuplevault_core::Revision;
use tuplevault_core::TupleKey;

use crate::errors::statement_error;
use crate::executor::SqlQuery;
use crate::schema::Column;
use crate::schema::LIVE_DELETED_TXN_ID;
use crate::schema::SchemaInformation;
use crate::tables::Tables;

// ============================================================================
// SECTION: Column Sets
// ============================================================================

/// Columns read for every tuple.
pub const TUPLE_COLUMNS: [Column; 8] = [
    Column::Namespace,
    Column::ObjectId,
    Column::Relation,
    Column::UsersetNamespace,
    Column::UsersetObjectId,
    Column::UsersetRelation,
    Column::CaveatName,
    Column::CaveatContext,
];

/// Tuple columns prefixed by the row id.
const TUPLE_COLUMNS_WITH_ID: [Column; 9] = [
    Column::Id,
    Column::Namespace,
    Column::ObjectId,
    Column::Relation,
    Column::UsersetNamespace,
    Column::UsersetObjectId,
    Column::UsersetRelation,
    Column::CaveatName,
    Column::CaveatContext,
];

/// Columns written for every tuple insert.
const TUPLE_INSERT_COLUMNS: [Column; 9] = [
    Column::Namespace,
    Column::ObjectId,
    Column::Relation,
    Column::UsersetNamespace,
    Column::UsersetObjectId,
    Column::UsersetRelation,
    Column::CaveatName,
    Column::CaveatContext,
    Column::CreatedTransaction,
];

/// Namespace definition name column.
pub const COL_NAMESPACE_NAME: Column = Column::Namespace;
/// Caveat definition name column.
pub const COL_CAVEAT_DEF_NAME: Column = Column::Name;

/// Namespace definition columns, name first.
const NAMESPACE_COLUMNS: [Column; 3] =
    [COL_NAMESPACE_NAME, Column::SerializedConfig, Column::CreatedTransaction];

/// Caveat definition columns, name first.
const CAVEAT_COLUMNS: [Column; 3] =
    [COL_CAVEAT_DEF_NAME, Column::Definition, Column::CreatedTransaction];

/// Transaction id of the seeded base revision.
const BASE_TRANSACTION_ID: i64 = 1;

/// Metadata row id; the table holds a single row.
const METADATA_ROW_ID: i64 = 1;

// ============================================================================
// SECTION: Queries
// ============================================================================

/// Statement skeletons for one set of table names.
#[derive(Debug, Clone)]
pub struct Queries {
    /// Table names the skeletons target.
    tables: Tables,
    /// Revision allocation.
    insert_transaction: SqlQuery,
    /// `MAX(id)` over the transaction table.
    select_head_revision: SqlQuery,
    /// Seed insert for the base revision.
    insert_base_revision: SqlQuery,
    /// Database identifier read.
    select_metadata: SqlQuery,
    /// Live tuple count.
    select_live_tuple_count: SqlQuery,
    /// Per-namespace live relationship and object counts.
    select_namespace_counts: SqlQuery,
}

impl Queries {
    /// Builds skeletons for the given tables.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::Internal`] when a fixed statement cannot be rendered.
    pub fn new(tables: Tables) -> Result<Self, DatastoreError> {
        let transaction = table(tables.transaction());
        let tuple = table(tables.tuple());

        let mut insert_transaction = Query::insert();
        insert_transaction
            .into_table(transaction.clone())
            .columns([Column::Timestamp])
            .values([Expr::cust("CURRENT_TIMESTAMP")])
            .map_err(|err| statement_error(&err))?;

        let mut insert_base_revision = Query::insert();
        insert_base_revision
            .into_table(transaction.clone())
            .columns([Column::Id, Column::Timestamp])
            .values([Expr::val(BASE_TRANSACTION_ID), Expr::cust("datetime(1, 'unixepoch')")])
            .map_err(|err| statement_error(&err))?
            .on_conflict(OnConflict::column(Column::Id).do_nothing().to_owned());

        let select_head_revision =
            Query::select().expr(Func::max(Expr::col(Column::Id))).from(transaction).to_owned();
        let select_metadata = Query::select()
            .column(Column::DatabaseIdent)
            .from(table(tables.metadata()))
            .limit(1)
            .to_owned();
        let select_live_tuple_count = Query::select()
            .expr(Func::count(Expr::col(Column::Id)))
            .from(tuple.clone())
            .and_where(live_expr())
            .to_owned();
        let select_namespace_counts = Query::select()
            .column(Column::Namespace)
            .expr(Func::count(Expr::col(Column::Id)))
            .expr(Func::count_distinct(Expr::col(Column::ObjectId)))
            .from(tuple)
            .and_where(live_expr())
            .group_by_col(Column::Namespace)
            .to_owned();

        Ok(Self {
            insert_transaction: SqlQuery::build(&insert_transaction)?,
            select_head_revision: SqlQuery::build(&select_head_revision)?,
            insert_base_revision: SqlQuery::build(&insert_base_revision)?,
            select_metadata: SqlQuery::build(&select_metadata)?,
            select_live_tuple_count: SqlQuery::build(&select_live_tuple_count)?,
            select_namespace_counts: SqlQuery::build(&select_namespace_counts)?,
            tables,
        })
    }

    /// Returns the table names.
    #[must_use]
    pub const fn tables(&self) -> &Tables {
        &self.tables
    }

    /// Revision allocation statement.
    #[must_use]
    pub const fn insert_transaction(&self) -> &SqlQuery {
        &self.insert_transaction
    }

    /// Head revision statement.
    #[must_use]
    pub const fn select_head_revision(&self) -> &SqlQuery {
        &self.select_head_revision
    }

    /// Revision existence statement.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::Internal`] when the statement cannot be rendered.
    pub fn select_transaction_exists(&self, revision: Revision) -> Result<SqlQuery, DatastoreError> {
        let select = Query::select()
            .column(Column::Id)
            .from(table(self.tables.transaction()))
            .and_where(Expr::col(Column::Id).eq(revision_value(revision)))
            .to_owned();
        SqlQuery::build(&select)
    }

    /// Base revision seed statement.
    #[must_use]
    pub const fn insert_base_revision(&self) -> &SqlQuery {
        &self.insert_base_revision
    }

    /// Database identifier read statement.
    #[must_use]
    pub const fn select_metadata(&self) -> &SqlQuery {
        &self.select_metadata
    }

    /// Database identifier insert; a recorded identifier is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::Internal`] when the statement cannot be rendered.
    pub fn insert_metadata(&self, database_ident: &str) -> Result<SqlQuery, DatastoreError> {
        let mut insert = Query::insert();
        insert
            .into_table(table(self.tables.metadata()))
            .columns([Column::Id, Column::DatabaseIdent])
            .values([Expr::val(METADATA_ROW_ID), Expr::val(database_ident.to_string())])
            .map_err(|err| statement_error(&err))?
            .on_conflict(OnConflict::column(Column::Id).do_nothing().to_owned());
        SqlQuery::build(&insert)
    }

    /// Live tuple count statement.
    #[must_use]
    pub const fn select_live_tuple_count(&self) -> &SqlQuery {
        &self.select_live_tuple_count
    }

    /// Per-namespace `(namespace, relationships, objects)` over live tuples.
    #[must_use]
    pub const fn select_namespace_counts(&self) -> &SqlQuery {
        &self.select_namespace_counts
    }

    /// Tuple SELECT skeleton.
    #[must_use]
    pub fn select_tuples(&self) -> SelectStatement {
        Query::select().columns(TUPLE_COLUMNS).from(table(self.tables.tuple())).to_owned()
    }

    /// Tuple SELECT skeleton including the row id.
    #[must_use]
    pub fn select_tuples_with_id(&self) -> SelectStatement {
        Query::select().columns(TUPLE_COLUMNS_WITH_ID).from(table(self.tables.tuple())).to_owned()
    }

    /// Tuple INSERT skeleton.
    #[must_use]
    pub fn insert_tuples(&self) -> InsertStatement {
        Query::insert()
            .into_table(table(self.tables.tuple()))
            .columns(TUPLE_INSERT_COLUMNS)
            .to_owned()
    }

    /// Tombstones the live tuples matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::Internal`] when the statement cannot be rendered.
    pub fn tombstone_tuples(
        &self,
        revision: Revision,
        filter: Condition,
    ) -> Result<SqlQuery, DatastoreError> {
        tombstone(self.tables.tuple(), revision, filter)
    }

    /// Namespace SELECT skeleton.
    #[must_use]
    pub fn select_namespaces(&self) -> SelectStatement {
        Query::select().columns(NAMESPACE_COLUMNS).from(table(self.tables.namespace())).to_owned()
    }

    /// Namespace INSERT skeleton.
    #[must_use]
    pub fn insert_namespaces(&self) -> InsertStatement {
        Query::insert()
            .into_table(table(self.tables.namespace()))
            .columns(NAMESPACE_COLUMNS)
            .to_owned()
    }

    /// Tombstones the live namespaces matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::Internal`] when the statement cannot be rendered.
    pub fn tombstone_namespaces(
        &self,
        revision: Revision,
        filter: Condition,
    ) -> Result<SqlQuery, DatastoreError> {
        tombstone(self.tables.namespace(), revision, filter)
    }

    /// Caveat SELECT skeleton.
    #[must_use]
    pub fn select_caveats(&self) -> SelectStatement {
        Query::select().columns(CAVEAT_COLUMNS).from(table(self.tables.caveat())).to_owned()
    }

    /// Caveat INSERT skeleton.
    #[must_use]
    pub fn insert_caveats(&self) -> InsertStatement {
        Query::insert().into_table(table(self.tables.caveat())).columns(CAVEAT_COLUMNS).to_owned()
    }

    /// Tombstones the live caveats matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::Internal`] when the statement cannot be rendered.
    pub fn tombstone_caveats(
        &self,
        revision: Revision,
        filter: Condition,
    ) -> Result<SqlQuery, DatastoreError> {
        tombstone(self.tables.caveat(), revision, filter)
    }
}

/// Identifier for a prefixed table name.
fn table(name: &str) -> Alias {
    Alias::new(name.to_string())
}

/// `UPDATE table SET deleted_transaction = revision` over live rows matching `filter`.
fn tombstone(
    table_name: &str,
    revision: Revision,
    filter: Condition,
) -> Result<SqlQuery, DatastoreError> {
    let update = Query::update()
        .table(table(table_name))
        .value(Column::DeletedTransaction, revision_value(revision))
        .cond_where(Cond::all().add(live_expr()).add(filter))
        .to_owned();
    SqlQuery::build(&update)
}

// ============================================================================
// SECTION: Shared Predicates
// ============================================================================

/// `deleted_transaction = LIVE`.
#[must_use]
pub fn live_expr() -> Expr {
    Expr::col(Column::DeletedTransaction).eq(LIVE_DELETED_TXN_ID)
}

/// Live rows as a condition.
#[must_use]
pub fn live_condition() -> Condition {
    Cond::all().add(live_expr())
}

/// Rows visible at a revision: created at or before it and not yet tombstoned.
#[must_use]
pub fn visible_at_condition(revision: Revision) -> Condition {
    let value = revision_value(revision);
    Cond::all().add(Expr::col(Column::CreatedTransaction).lte(value)).add(
        Cond::any().add(live_expr()).add(Expr::col(Column::DeletedTransaction).gt(value)),
    )
}

/// Equality over the six identity columns of a tuple.
#[must_use]
pub fn tuple_key_condition(key: &TupleKey) -> Condition {
    Cond::all()
        .add(Expr::col(Column::Namespace).eq(key.resource.namespace.clone()))
        .add(Expr::col(Column::ObjectId).eq(key.resource.object_id.clone()))
        .add(Expr::col(Column::Relation).eq(key.resource.relation.clone()))
        .add(Expr::col(Column::UsersetNamespace).eq(key.subject.namespace.clone()))
        .add(Expr::col(Column::UsersetObjectId).eq(key.subject.object_id.clone()))
        .add(Expr::col(Column::UsersetRelation).eq(key.subject.relation.clone()))
}

/// Converts a revision to its stored integer form, saturating at the live sentinel.
#[must_use]
pub fn revision_value(revision: Revision) -> i64 {
    i64::try_from(revision.transaction_id()).unwrap_or(LIVE_DELETED_TXN_ID)
}

/// Converts a stored transaction id into a revision.
///
/// # Errors
///
/// Returns [`DatastoreError::IntegrityViolation`] for negative ids.
pub fn revision_from_stored(transaction_id: i64) -> Result<Revision, DatastoreError> {
    u64::try_from(transaction_id).map(Revision::new).map_err(|_| {
        DatastoreError::IntegrityViolation(format!("negative transaction id {transaction_id}"))
    })
}

// ============================================================================
// SECTION: Schema Context
// ============================================================================

/// Immutable schema knowledge shared by readers and writers.
#[derive(Debug, Clone)]
pub struct SchemaContext {
    /// Statement skeletons (owning the table names).
    queries: Queries,
    /// Tuple column information.
    schema: SchemaInformation,
}

impl SchemaContext {
    /// Builds the context for a table prefix.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::Invalid`] when the prefix is unsafe.
    pub fn new(table_prefix: &str) -> Result<Self, DatastoreError> {
        Ok(Self {
            queries: Queries::new(Tables::new(table_prefix)?)?,
            schema: SchemaInformation::sqlite(),
        })
    }

    /// Returns the statement skeletons.
    #[must_use]
    pub const fn queries(&self) -> &Queries {
        &self.queries
    }

    /// Returns the table names.
    #[must_use]
    pub const fn tables(&self) -> &Tables {
        self.queries.tables()
    }

    /// Returns the tuple column information.
    #[must_use]
    pub const fn schema(&self) -> &SchemaInformation {
        &self.schema
    }
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

    use rusqlite::types::Value;
    use sea_query::Cond;
    use sea_query::Expr;
    use sea_query::ExprTrait;
    use tuplevault_core::Revision;

    use super::SchemaContext;
    use super::visible_at_condition;
    use crate::executor::SqlQuery;
    use crate::schema::Column;

    #[test]
    fn skeletons_use_prefixed_tables() {
        let context = SchemaContext::new("t1_").expect("context");
        let queries = context.queries();
        assert!(queries.insert_transaction().sql.contains("\"t1_relation_tuple_transaction\""));
        let select = SqlQuery::build(&queries.select_tuples()).expect("render");
        assert!(select.sql.starts_with("SELECT \"namespace\", \"object_id\""));
        assert!(select.sql.ends_with("FROM \"t1_relation_tuple\""));
    }

    #[test]
    fn snapshot_condition_binds_revision_and_sentinel() {
        let select = SchemaContext::new("")
            .expect("context")
            .queries()
            .select_tuples()
            .cond_where(visible_at_condition(Revision::new(12)))
            .to_owned();
        let query = SqlQuery::build(&select).expect("render");
        assert_eq!(
            query.params,
            vec![Value::Integer(12), Value::Integer(i64::MAX), Value::Integer(12)]
        );
    }

    #[test]
    fn tombstone_sets_revision_before_filters() {
        let context = SchemaContext::new("").expect("context");
        let update = context
            .queries()
            .tombstone_caveats(
                Revision::new(4),
                Cond::all().add(Expr::col(Column::Name).eq("ip_allowed".to_string())),
            )
            .expect("render");
        assert!(update.sql.starts_with("UPDATE \"caveat\" SET \"deleted_transaction\" = ?"));
        assert_eq!(
            update.params,
            vec![
                Value::Integer(4),
                Value::Integer(i64::MAX),
                Value::Text("ip_allowed".to_string())
            ]
        );
    }
}
