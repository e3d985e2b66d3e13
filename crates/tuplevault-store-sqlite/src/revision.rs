// crates/tuplevault-store-sqlite/src/revision.rs
// ============================================================================
// Module: Revisions
// Description: Revision allocation, head lookup, and existence checks.
// Purpose: Map transaction-table row ids onto datastore revisions.
// Dependencies: rusqlite, tuplevault-core
// ============================================================================

//! ## Overview
//! Each write transaction inserts one row into the transaction table; the
//! engine-assigned autoincrement id is the transaction's revision. The head
//! revision is the largest id. `AUTOINCREMENT` keeps ids strictly
//! increasing even after rollbacks, so revisions are never reused.

// ============================================================================
// SECTION: Imports
// ============================================================================

use tuplevault_core::CancellationToken;
use tuplevault_core::DatastoreError;
use tuplevault_core::InvalidRevisionReason;
use tuplevault_core::Revision;

use crate::errors::ERR_REVISION;
use crate::executor::SqlBackend;
use crate::queries::SchemaContext;
use crate::queries::revision_from_stored;

// ============================================================================
// SECTION: Allocation
// ============================================================================

/// Allocates the revision for the current write transaction.
///
/// # Errors
///
/// Returns [`DatastoreError`] when the insert fails or the id is invalid.
pub(crate) fn create_transaction<B: SqlBackend>(
    backend: &B,
    context: &SchemaContext,
    cancel: &CancellationToken,
) -> Result<Revision, DatastoreError> {
    let insert = context.queries().insert_transaction();
    backend.execute_statement(insert, cancel, ERR_REVISION)?;
    let revision = revision_from_stored(backend.last_insert_id())?;
    if revision.is_none() {
        return Err(DatastoreError::IntegrityViolation(
            "transaction table assigned revision 0".to_string(),
        ));
    }
    Ok(revision)
}

// ============================================================================
// SECTION: Lookup
// ============================================================================

/// Loads the largest committed revision; [`Revision::NONE`] on an empty table.
///
/// # Errors
///
/// Returns [`DatastoreError`] when the query fails.
pub(crate) fn load_head_revision<B: SqlBackend>(
    backend: &B,
    context: &SchemaContext,
) -> Result<Revision, DatastoreError> {
    let query = context.queries().select_head_revision();
    let rows = backend.execute_query(query, &CancellationToken::new(), ERR_REVISION, |row| {
        row.get::<_, Option<i64>>(0)
    })?;
    match rows.into_iter().next().flatten() {
        Some(id) => revision_from_stored(id),
        None => Ok(Revision::NONE),
    }
}

/// Verifies a revision names a committed transaction.
///
/// # Errors
///
/// Returns [`DatastoreError::InvalidRevision`] for the unset revision or an
/// id with no transaction row.
pub(crate) fn check_revision<B: SqlBackend>(
    backend: &B,
    context: &SchemaContext,
    revision: Revision,
) -> Result<(), DatastoreError> {
    if revision.is_none() {
        return Err(DatastoreError::InvalidRevision {
            revision,
            reason: InvalidRevisionReason::Unset,
        });
    }
    let query = context.queries().select_transaction_exists(revision)?;
    let rows =
        backend.execute_query(&query, &CancellationToken::new(), ERR_REVISION, |row| {
            row.get::<_, i64>(0)
        })?;
    if rows.is_empty() {
        return Err(DatastoreError::InvalidRevision {
            revision,
            reason: InvalidRevisionReason::Unknown,
        });
    }
    Ok(())
}
