// crates/tuplevault-store-sqlite/src/migrations/manager.rs
// ============================================================================
// Module: Migration Manager
// Description: Registry of versioned schema steps forming a single chain.
// Purpose: Plan and apply forward-only migrations from the current version.
// Dependencies: rusqlite, tuplevault-core
// ============================================================================

//! ## Overview
//! Each [`Migration`] names the version it produces and the version it
//! replaces; the empty string is the pre-migration state. Registration
//! enforces a single linear chain, so the head is unique and every plan is
//! the path from the current version to the target. A step runs its
//! optional non-transactional function first, then its transactional
//! function and the version-row write inside one transaction.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use rusqlite::Connection;
use rusqlite::Transaction;
use tuplevault_core::CancellationToken;
use tuplevault_core::DatastoreError;

use crate::errors::ERR_MIGRATE;
use crate::events::DatastoreEventSink;
use crate::events::MigrationEvent;
use crate::migrations::driver::SqliteMigrationDriver;
use crate::migrations::driver::write_version;
use crate::tables::Tables;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Target alias resolving to the newest registered version.
pub const HEAD: &str = "head";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Inputs shared by every migration step in one run.
#[derive(Debug, Clone, Copy)]
pub struct MigrationContext<'a> {
    /// Table names of the datastore being migrated.
    pub tables: &'a Tables,
    /// Row budget for backfill steps.
    pub backfill_batch_size: u64,
    /// Timeout applied to the run (ms).
    pub timeout_ms: u64,
    /// Timeout and caller cancellation for the run.
    pub cancel: &'a CancellationToken,
}

/// Step run outside a transaction (long-running backfills, index builds).
pub type MigrationFn = fn(&Connection, &MigrationContext<'_>) -> Result<(), DatastoreError>;

/// Step run inside the transaction that records the new version.
pub type TxMigrationFn = fn(&Transaction<'_>, &MigrationContext<'_>) -> Result<(), DatastoreError>;

/// One registered schema step.
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version produced by the step.
    pub version: String,
    /// Version the step replaces (empty for the first step).
    pub replaces: String,
    /// Optional non-transactional step.
    pub up: Option<MigrationFn>,
    /// Optional transactional step.
    pub up_tx: Option<TxMigrationFn>,
}

/// Whether a run applies steps or only reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Apply every planned step.
    LiveRun,
    /// Compute and return the plan without writing.
    DryRun,
}

// ============================================================================
// SECTION: Manager
// ============================================================================

/// Registry of migrations forming one linear chain.
///
/// # Invariants
/// - Versions are unique and non-empty.
/// - Exactly one step replaces the empty version; every other step replaces a
///   registered version, and no version is replaced twice.
#[derive(Debug, Clone, Default)]
pub struct MigrationManager {
    /// Steps keyed by the version they produce.
    migrations: BTreeMap<String, Migration>,
    /// Successor of each version (including the empty version).
    successors: BTreeMap<String, String>,
}

impl MigrationManager {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a step.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::Internal`] when the step would duplicate a
    /// version, replace an unknown version, or fork the chain.
    pub fn register(
        &mut self,
        version: &str,
        replaces: &str,
        up: Option<MigrationFn>,
        up_tx: Option<TxMigrationFn>,
    ) -> Result<(), DatastoreError> {
        if version.is_empty() || version == HEAD {
            return Err(DatastoreError::Internal(format!(
                "migration version `{version}` is reserved"
            )));
        }
        if self.migrations.contains_key(version) {
            return Err(DatastoreError::Internal(format!(
                "migration `{version}` registered twice"
            )));
        }
        if !replaces.is_empty() && !self.migrations.contains_key(replaces) {
            return Err(DatastoreError::Internal(format!(
                "migration `{version}` replaces unknown version `{replaces}`"
            )));
        }
        if let Some(existing) = self.successors.get(replaces) {
            return Err(DatastoreError::Internal(format!(
                "migrations `{existing}` and `{version}` both replace `{replaces}`"
            )));
        }
        self.successors.insert(replaces.to_string(), version.to_string());
        self.migrations.insert(
            version.to_string(),
            Migration {
                version: version.to_string(),
                replaces: replaces.to_string(),
                up,
                up_tx,
            },
        );
        Ok(())
    }

    /// Returns the newest registered version.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::Internal`] when nothing is registered.
    pub fn head_revision(&self) -> Result<String, DatastoreError> {
        let mut cursor = "";
        while let Some(next) = self.successors.get(cursor) {
            cursor = next;
        }
        if cursor.is_empty() {
            return Err(DatastoreError::Internal("no migrations registered".to_string()));
        }
        Ok(cursor.to_string())
    }

    /// Returns true when a version is registered.
    #[must_use]
    pub fn is_registered(&self, version: &str) -> bool {
        self.migrations.contains_key(version)
    }

    /// Returns the ordered steps leading from `current` to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::MigrationUnknownVersion`] when either version
    /// is unregistered or the target precedes the current version.
    pub fn plan(&self, current: &str, target: &str) -> Result<Vec<&Migration>, DatastoreError> {
        let target = if target == HEAD { self.head_revision()? } else { target.to_string() };
        if !current.is_empty() && !self.is_registered(current) {
            return Err(DatastoreError::MigrationUnknownVersion(current.to_string()));
        }
        if !target.is_empty() && !self.is_registered(&target) {
            return Err(DatastoreError::MigrationUnknownVersion(target));
        }
        let mut steps = Vec::new();
        let mut cursor = target.as_str();
        while cursor != current {
            let Some(step) = self.migrations.get(cursor) else {
                return Err(DatastoreError::MigrationUnknownVersion(format!(
                    "{target} (cannot migrate backwards from `{current}`)"
                )));
            };
            steps.push(step);
            cursor = &step.replaces;
        }
        steps.reverse();
        Ok(steps)
    }

    /// Migrates the driver's database to `target`.
    ///
    /// Returns the versions applied (or, in [`RunMode::DryRun`], the versions
    /// that would be applied).
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::MigrationUnknownVersion`] for unknown
    /// versions, [`DatastoreError::Canceled`] when the context's token fires,
    /// or the failing step's error. Steps committed before the failure stay
    /// applied.
    pub fn run(
        &self,
        driver: &mut SqliteMigrationDriver<'_>,
        target: &str,
        mode: RunMode,
        context: &MigrationContext<'_>,
        sink: &dyn DatastoreEventSink,
    ) -> Result<Vec<String>, DatastoreError> {
        let current = driver.version()?;
        let plan = self.plan(&current, target)?;
        let versions: Vec<String> = plan.iter().map(|step| step.version.clone()).collect();
        if mode == RunMode::DryRun {
            return Ok(versions);
        }
        for step in plan {
            context.cancel.check(ERR_MIGRATE)?;
            if let Some(up) = step.up {
                up(driver.connection(), context)?;
            }
            context.cancel.check(ERR_MIGRATE)?;
            driver.run_tx(|tx, tables| {
                if let Some(up_tx) = step.up_tx {
                    up_tx(tx, context)?;
                }
                write_version(tx, tables, &step.version)
            })?;
            sink.record_migration(&MigrationEvent::applied(
                target,
                &step.version,
                &step.replaces,
                context.timeout_ms,
                context.backfill_batch_size,
            ));
        }
        Ok(versions)
    }
}
