// crates/tuplevault-store-sqlite/src/executor.rs
// ============================================================================
// Module: Statement Executor
// Description: Statement rendering, engine capability trait, row decoding.
// Purpose: Run built statements with cancellation checks between rows.
// Dependencies: rusqlite, sea-query, tuplevault-core
// ============================================================================

//! ## Overview
//! [`SqlBackend`] is the narrow capability the MVCC logic needs from an
//! engine: run a query, run a statement, begin and commit a transaction,
//! and report the last inserted row id. Readers and write transactions only
//! touch the database through it. Query execution checks the caller's
//! [`CancellationToken`] before preparing and before decoding each row.
//!
//! Statements are assembled with `sea-query` and rendered once into a
//! [`SqlQuery`], whose bind values are converted to `SQLite` storage classes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::ops::Deref;

use rusqlite::Connection;
use rusqlite::Row;
use rusqlite::Transaction;
use rusqlite::TransactionBehavior;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use rusqlite::types::ValueRef;
use sea_query::QueryStatementWriter;
use sea_query::SqliteQueryBuilder;
use sea_query::Value as BindValue;
use tuplevault_core::CancellationToken;
use tuplevault_core::ContextualizedCaveat;
use tuplevault_core::DatastoreError;
use tuplevault_core::ObjectAndRelation;
use tuplevault_core::RelationTuple;

use crate::errors::ERR_TRANSACTION;
use crate::errors::db_error;

// ============================================================================
// SECTION: Rendered Statements
// ============================================================================

/// Rendered statement text with positional bind values.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    /// Statement text with `?` placeholders.
    pub sql: String,
    /// Values bound to the placeholders in order.
    pub params: Vec<Value>,
}

impl SqlQuery {
    /// Renders a statement in the `SQLite` dialect.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::Internal`] when a bind value has no `SQLite`
    /// storage class.
    pub fn build<S: QueryStatementWriter>(statement: &S) -> Result<Self, DatastoreError> {
        let (sql, values) = statement.build(SqliteQueryBuilder);
        let params = values.0.into_iter().map(bind_value).collect::<Result<_, _>>()?;
        Ok(Self {
            sql,
            params,
        })
    }
}

/// Converts a builder value into the `SQLite` value it binds as.
fn bind_value(value: BindValue) -> Result<Value, DatastoreError> {
    let converted = match value {
        BindValue::Bool(flag) => flag.map(|flag| Value::Integer(i64::from(flag))),
        BindValue::Int(number) => number.map(|number| Value::Integer(i64::from(number))),
        BindValue::Unsigned(number) => number.map(|number| Value::Integer(i64::from(number))),
        BindValue::BigInt(number) => number.map(Value::Integer),
        BindValue::BigUnsigned(number) => number
            .map(|number| {
                i64::try_from(number).map(Value::Integer).map_err(|_| {
                    DatastoreError::Internal(format!("bind value {number} overflows i64"))
                })
            })
            .transpose()?,
        BindValue::String(text) => text.map(|text| Value::Text(text.to_string())),
        BindValue::Bytes(bytes) => bytes.map(|bytes| Value::Blob(bytes.to_vec())),
        _ => {
            return Err(DatastoreError::Internal(
                "bind value has no sqlite storage class".to_string(),
            ));
        }
    };
    Ok(converted.unwrap_or(Value::Null))
}

// ============================================================================
// SECTION: Backend Capability
// ============================================================================

/// Engine operations required by readers, writers, and migrations.
pub trait SqlBackend {
    /// Open write transaction; dereferences to the backend so statements can
    /// run inside it.
    type Transaction<'a>: Deref<Target = Self>
    where
        Self: 'a;

    /// Runs a query and maps every row.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::Canceled`] when `cancel` fires, or a mapped
    /// engine error with `context`.
    fn execute_query<T, F>(
        &self,
        query: &SqlQuery,
        cancel: &CancellationToken,
        context: &str,
        map_row: F,
    ) -> Result<Vec<T>, DatastoreError>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>;

    /// Runs a statement and returns the number of changed rows.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::Canceled`] when `cancel` fires, or a mapped
    /// engine error with `context`.
    fn execute_statement(
        &self,
        query: &SqlQuery,
        cancel: &CancellationToken,
        context: &str,
    ) -> Result<usize, DatastoreError>;

    /// Returns the row id assigned by the most recent insert.
    fn last_insert_id(&self) -> i64;

    /// Begins a write transaction that takes the write lock immediately.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::WriteConflict`] when the lock is unavailable.
    fn begin_write(&mut self) -> Result<Self::Transaction<'_>, DatastoreError>;

    /// Commits a write transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::WriteConflict`] when the engine reports a
    /// lock conflict at commit.
    fn commit(transaction: Self::Transaction<'_>) -> Result<(), DatastoreError>;
}

impl SqlBackend for Connection {
    type Transaction<'a> = Transaction<'a>;

    fn execute_query<T, F>(
        &self,
        query: &SqlQuery,
        cancel: &CancellationToken,
        context: &str,
        mut map_row: F,
    ) -> Result<Vec<T>, DatastoreError>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        cancel.check(context)?;
        let mut stmt = self.prepare_cached(&query.sql).map_err(|err| db_error(context, &err))?;
        let mut rows = stmt
            .query(params_from_iter(query.params.iter()))
            .map_err(|err| db_error(context, &err))?;
        let mut output = Vec::new();
        while let Some(row) = rows.next().map_err(|err| db_error(context, &err))? {
            cancel.check(context)?;
            output.push(map_row(row).map_err(|err| db_error(context, &err))?);
        }
        Ok(output)
    }

    fn execute_statement(
        &self,
        query: &SqlQuery,
        cancel: &CancellationToken,
        context: &str,
    ) -> Result<usize, DatastoreError> {
        cancel.check(context)?;
        let mut stmt = self.prepare_cached(&query.sql).map_err(|err| db_error(context, &err))?;
        stmt.execute(params_from_iter(query.params.iter())).map_err(|err| db_error(context, &err))
    }

    fn last_insert_id(&self) -> i64 {
        self.last_insert_rowid()
    }

    fn begin_write(&mut self) -> Result<Self::Transaction<'_>, DatastoreError> {
        self.transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| db_error(ERR_TRANSACTION, &err))
    }

    fn commit(transaction: Self::Transaction<'_>) -> Result<(), DatastoreError> {
        transaction.commit().map_err(|err| db_error(ERR_TRANSACTION, &err))
    }
}

// ============================================================================
// SECTION: Row Decoding
// ============================================================================

/// Raw tuple columns as stored.
#[derive(Debug)]
pub(crate) struct TupleRow {
    /// Row id, when selected.
    pub id: Option<i64>,
    /// Resource namespace.
    pub namespace: String,
    /// Resource object id.
    pub object_id: String,
    /// Resource relation.
    pub relation: String,
    /// Subject namespace.
    pub userset_namespace: String,
    /// Subject object id.
    pub userset_object_id: String,
    /// Subject relation.
    pub userset_relation: String,
    /// Caveat name (absent or empty when uncaveated).
    pub caveat_name: Option<String>,
    /// Caveat context JSON.
    pub caveat_context: Option<Vec<u8>>,
}

impl TupleRow {
    /// Reads the eight tuple columns starting at `offset`.
    fn read(row: &Row<'_>, id: Option<i64>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            id,
            namespace: row.get(offset)?,
            object_id: row.get(offset + 1)?,
            relation: row.get(offset + 2)?,
            userset_namespace: row.get(offset + 3)?,
            userset_object_id: row.get(offset + 4)?,
            userset_relation: row.get(offset + 5)?,
            caveat_name: row.get(offset + 6)?,
            caveat_context: column_bytes(row, offset + 7)?,
        })
    }

    /// Reads a row selected with the tuple column set.
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Self::read(row, None, 0)
    }

    /// Reads a row selected with the id-prefixed tuple column set.
    pub(crate) fn from_row_with_id(row: &Row<'_>) -> rusqlite::Result<Self> {
        let id: i64 = row.get(0)?;
        Self::read(row, Some(id), 1)
    }

    /// Converts stored columns into a tuple.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::IntegrityViolation`] when the stored caveat
    /// context is not a JSON object.
    pub(crate) fn into_tuple(self) -> Result<RelationTuple, DatastoreError> {
        let caveat =
            ContextualizedCaveat::from_stored(self.caveat_name, self.caveat_context.as_deref())
                .map_err(|err| DatastoreError::IntegrityViolation(err.to_string()))?;
        let resource = ObjectAndRelation::new(self.namespace, self.object_id, self.relation);
        let subject = ObjectAndRelation::new(
            self.userset_namespace,
            self.userset_object_id,
            self.userset_relation,
        );
        let tuple = RelationTuple::new(resource, subject);
        Ok(match caveat {
            Some(caveat) => tuple.with_caveat(caveat),
            None => tuple,
        })
    }
}

/// Reads a TEXT or BLOB column as bytes.
pub(crate) fn column_bytes(row: &Row<'_>, index: usize) -> rusqlite::Result<Option<Vec<u8>>> {
    match row.get_ref(index)? {
        ValueRef::Null => Ok(None),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => Ok(Some(bytes.to_vec())),
        other => Err(rusqlite::Error::InvalidColumnType(
            index,
            format!("column {index}"),
            other.data_type(),
        )),
    }
}

/// Runs a tuple query and decodes every row.
///
/// # Errors
///
/// Returns [`DatastoreError`] when the query fails, is canceled, or a row
/// fails to decode.
pub(crate) fn query_tuples<B: SqlBackend>(
    backend: &B,
    query: &SqlQuery,
    cancel: &CancellationToken,
    context: &str,
) -> Result<Vec<RelationTuple>, DatastoreError> {
    backend
        .execute_query(query, cancel, context, TupleRow::from_row)?
        .into_iter()
        .map(TupleRow::into_tuple)
        .collect()
}

// ============================================================================
// SECTION: Tests
// ============================================================================
