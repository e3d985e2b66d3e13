// crates/tuplevault-store-sqlite/src/seed.rs
// ============================================================================
// Module: Bootstrap
// Description: Base revision and database identifier seeding.
// Purpose: Make a migrated database ready to serve reads and writes.
// Dependencies: rand, rusqlite, tuplevault-core
// ============================================================================

//! ## Overview
//! Seeding inserts the base revision (transaction id 1) and a random database
//! identifier. Both inserts use `ON CONFLICT DO NOTHING` against single-row
//! keys, so repeated or concurrent seeding converges on one row of each and
//! an existing identifier is never replaced.

// ============================================================================
// SECTION: Imports
// ============================================================================

use rand::RngCore;
use rusqlite::Connection;
use tuplevault_core::CancellationToken;
use tuplevault_core::DatabaseIdent;
use tuplevault_core::DatastoreError;

use crate::errors::ERR_SEED;
use crate::events::DatastoreEventSink;
use crate::events::SeedEvent;
use crate::executor::SqlBackend;
use crate::queries::SchemaContext;
use crate::revision::load_head_revision;

// ============================================================================
// SECTION: Status
// ============================================================================

/// Which bootstrap rows are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedStatus {
    /// True when at least one revision exists.
    pub has_revision: bool,
    /// True when a database identifier is recorded.
    pub has_database_ident: bool,
}

impl SeedStatus {
    /// Returns true when both bootstrap rows exist.
    #[must_use]
    pub const fn is_seeded(self) -> bool {
        self.has_revision && self.has_database_ident
    }
}

/// Reads the bootstrap status.
///
/// # Errors
///
/// Returns [`DatastoreError`] when a query fails (including missing tables).
pub(crate) fn seed_status<B: SqlBackend>(
    backend: &B,
    context: &SchemaContext,
) -> Result<SeedStatus, DatastoreError> {
    let has_revision = !load_head_revision(backend, context)?.is_none();
    let has_database_ident = read_database_ident(backend, context)?.is_some();
    Ok(SeedStatus {
        has_revision,
        has_database_ident,
    })
}

/// Reads the recorded database identifier.
///
/// # Errors
///
/// Returns [`DatastoreError::IntegrityViolation`] when the stored value is
/// not a UUID, or another [`DatastoreError`] when the query fails.
pub(crate) fn read_database_ident<B: SqlBackend>(
    backend: &B,
    context: &SchemaContext,
) -> Result<Option<DatabaseIdent>, DatastoreError> {
    let query = context.queries().select_metadata();
    let rows = backend.execute_query(query, &CancellationToken::new(), ERR_SEED, |row| {
        row.get::<_, String>(0)
    })?;
    let Some(stored) = rows.into_iter().next() else {
        return Ok(None);
    };
    DatabaseIdent::parse(&stored).map(Some).ok_or_else(|| {
        DatastoreError::IntegrityViolation("stored database identifier is not a UUID".to_string())
    })
}

// ============================================================================
// SECTION: Seeding
// ============================================================================

/// Seeds the base revision and database identifier if absent.
///
/// # Errors
///
/// Returns [`DatastoreError`] when the schema is missing or an insert fails.
pub(crate) fn seed_database(
    connection: &mut Connection,
    context: &SchemaContext,
    sink: &dyn DatastoreEventSink,
) -> Result<SeedStatus, DatastoreError> {
    let status = seed_status(connection, context)?;
    if status.is_seeded() {
        return Ok(status);
    }
    let cancel = CancellationToken::new();
    let tx = connection.begin_write()?;
    let mut head_revision_inserted = false;
    if !status.has_revision {
        let insert = context.queries().insert_base_revision();
        head_revision_inserted = tx.execute_statement(insert, &cancel, ERR_SEED)? > 0;
    }
    let mut inserted_ident = None;
    if !status.has_database_ident {
        let ident = DatabaseIdent::from_random_bytes(random_ident_bytes());
        let insert = context.queries().insert_metadata(ident.as_str())?;
        if tx.execute_statement(&insert, &cancel, ERR_SEED)? > 0 {
            inserted_ident = Some(ident.to_string());
        }
    }
    Connection::commit(tx)?;
    if head_revision_inserted || inserted_ident.is_some() {
        sink.record_seed(&SeedEvent::seeded(
            context.tables().prefix(),
            head_revision_inserted,
            inserted_ident,
        ));
    }
    Ok(SeedStatus {
        has_revision: true,
        has_database_ident: true,
    })
}

/// Draws 16 random bytes for a database identifier.
fn random_ident_bytes() -> [u8; 16] {
    let mut bytes = [0_u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}
