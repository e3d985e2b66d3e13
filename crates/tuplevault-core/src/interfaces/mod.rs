// crates/tuplevault-core/src/interfaces/mod.rs
// ============================================================================
// Module: Tuplevault Interfaces
// Description: Backend-agnostic datastore, reader, and writer contracts.
// Purpose: Define the surfaces consumed by resolution and caching layers.
// Dependencies: crate::core, thiserror
// ============================================================================

//! ## Overview
//! Interfaces describe how callers read relationship and schema data at a
//! revision and how they apply mutations atomically. Backends implement
//! these traits without exposing dialect details; the MVCC rules (snapshot
//! predicate, tombstoning, revision allocation) are part of the contract.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::mpsc::Receiver;

use thiserror::Error;

use crate::core::cancel::CancellationToken;
use crate::core::filter::QueryOptions;
use crate::core::filter::RelationshipFilter;
use crate::core::filter::RelationshipIterator;
use crate::core::filter::RelationshipsFilter;
use crate::core::filter::ReverseQueryOptions;
use crate::core::filter::SubjectsFilter;
use crate::core::revision::Revision;
use crate::core::schema::CaveatDefinition;
use crate::core::schema::NamespaceDefinition;
use crate::core::schema::RevisionedCaveat;
use crate::core::schema::RevisionedNamespace;
use crate::core::status::Features;
use crate::core::status::ReadyState;
use crate::core::status::RevisionChanges;
use crate::core::status::Stats;
use crate::core::tuple::RelationTuple;
use crate::core::tuple::RelationshipMutation;
use crate::core::tuple::TupleParseError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Reason a revision was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidRevisionReason {
    /// The unset revision was supplied where a real one is required.
    Unset,
    /// No committed transaction has the revision.
    Unknown,
}

impl fmt::Display for InvalidRevisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => f.write_str("could not determine revision"),
            Self::Unknown => f.write_str("revision not found"),
        }
    }
}

/// Datastore errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
/// - Messages carry operation context, never tuple payload bodies beyond names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatastoreError {
    /// No live namespace has the requested name.
    #[error("unable to find namespace `{0}`")]
    NamespaceNotFound(String),
    /// The namespace does not declare the requested relation.
    #[error("unable to find relation `{relation}` in namespace `{namespace}`")]
    RelationNotFound {
        /// Namespace that was searched.
        namespace: String,
        /// Relation that was requested.
        relation: String,
    },
    /// No live caveat has the requested name.
    #[error("unable to find caveat `{0}`")]
    CaveatNotFound(String),
    /// Revision is unset or has no committed transaction.
    #[error("revision {revision} was invalid: {reason}")]
    InvalidRevision {
        /// Rejected revision.
        revision: Revision,
        /// Rejection reason.
        reason: InvalidRevisionReason,
    },
    /// A caller-declared write precondition does not hold.
    #[error("unable to satisfy write precondition: {0}")]
    PreconditionFailed(String),
    /// The backing engine reported a serialization or lock conflict.
    #[error("write conflict: {0}")]
    WriteConflict(String),
    /// A CREATE targeted a key that already has a live row.
    #[error("relationship already exists: {0}")]
    AlreadyExists(String),
    /// A migration target is not registered.
    #[error("unknown migration version `{0}`")]
    MigrationUnknownVersion(String),
    /// A stored invariant is broken.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),
    /// The operation's cancellation token fired.
    #[error("operation canceled: {0}")]
    Canceled(String),
    /// Input or configuration is invalid.
    #[error("invalid input: {0}")]
    Invalid(String),
    /// File system failure.
    #[error("datastore io error: {0}")]
    Io(String),
    /// Backing engine failure with operation context.
    #[error("{0}")]
    Storage(String),
    /// The datastore was closed.
    #[error("datastore is closed")]
    Closed,
    /// An internal invariant was violated by the caller or the build.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DatastoreError {
    /// Returns true when re-running the whole mutation function may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::WriteConflict(_))
    }
}

impl From<TupleParseError> for DatastoreError {
    fn from(error: TupleParseError) -> Self {
        Self::Invalid(error.to_string())
    }
}

// ============================================================================
// SECTION: Reader
// ============================================================================

/// Read-only view of relationships, namespaces, and caveats at one revision.
pub trait Reader {
    /// Returns tuples matching a forward filter.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError`] when the query fails or is canceled.
    fn query_relationships(
        &self,
        filter: &RelationshipsFilter,
        options: &QueryOptions,
    ) -> Result<RelationshipIterator, DatastoreError>;

    /// Returns tuples matching a subject-first filter.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError`] when the query fails or is canceled.
    fn reverse_query_relationships(
        &self,
        filter: &SubjectsFilter,
        options: &ReverseQueryOptions,
    ) -> Result<RelationshipIterator, DatastoreError>;

    /// Reads a namespace definition by name.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::NamespaceNotFound`] when no live row matches.
    fn read_namespace_by_name(&self, name: &str) -> Result<RevisionedNamespace, DatastoreError>;

    /// Lists every live namespace.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError`] when the query fails.
    fn list_namespaces(&self) -> Result<Vec<RevisionedNamespace>, DatastoreError>;

    /// Looks up live namespaces by name; unknown names are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError`] when the query fails.
    fn lookup_namespaces(
        &self,
        names: &[&str],
    ) -> Result<Vec<RevisionedNamespace>, DatastoreError>;

    /// Reads a caveat definition by name.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::CaveatNotFound`] when no live row matches and
    /// [`DatastoreError::IntegrityViolation`] when more than one does.
    fn read_caveat_by_name(&self, name: &str) -> Result<RevisionedCaveat, DatastoreError>;

    /// Lists every live caveat.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError`] when the query fails.
    fn list_caveats(&self) -> Result<Vec<RevisionedCaveat>, DatastoreError>;

    /// Looks up live caveats by name; unknown names are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError`] when the query fails.
    fn lookup_caveats(&self, names: &[&str]) -> Result<Vec<RevisionedCaveat>, DatastoreError>;
}

// ============================================================================
// SECTION: Read-Write Transaction
// ============================================================================

/// Reader over the in-flight transaction plus mutation operations.
///
/// # Invariants
/// - Every mutation is stamped with [`ReadWriteTransaction::revision`].
/// - Nothing becomes visible to other readers until the transaction commits.
pub trait ReadWriteTransaction: Reader {
    /// Returns the revision allocated to this transaction.
    fn revision(&self) -> Revision;

    /// Applies CREATE, TOUCH, and DELETE mutations.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::AlreadyExists`] when a CREATE targets a live
    /// key, or another [`DatastoreError`] when a statement fails.
    fn write_relationships(
        &mut self,
        mutations: &[RelationshipMutation],
    ) -> Result<(), DatastoreError>;

    /// Tombstones every live tuple matching the filter.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError`] when the statement fails.
    fn delete_relationships(&mut self, filter: &RelationshipFilter) -> Result<u64, DatastoreError>;

    /// Writes new namespace versions, superseding live rows of the same name.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError`] when a statement fails.
    fn write_namespaces(
        &mut self,
        definitions: &[NamespaceDefinition],
    ) -> Result<(), DatastoreError>;

    /// Tombstones namespaces and their live relationships.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::NamespaceNotFound`] when a name has no live row.
    fn delete_namespaces(&mut self, names: &[&str]) -> Result<(), DatastoreError>;

    /// Writes new caveat versions, superseding live rows of the same name.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError`] when a statement fails.
    fn write_caveats(&mut self, definitions: &[CaveatDefinition]) -> Result<(), DatastoreError>;

    /// Tombstones caveats by name.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError`] when the statement fails.
    fn delete_caveats(&mut self, names: &[&str]) -> Result<(), DatastoreError>;

    /// Inserts relationships directly, bypassing TOUCH/DELETE reconciliation.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::AlreadyExists`] when a tuple key is already live.
    fn bulk_load(
        &mut self,
        source: &mut dyn Iterator<Item = RelationTuple>,
    ) -> Result<u64, DatastoreError>;
}

// ============================================================================
// SECTION: Datastore
// ============================================================================

/// Caller-supplied mutation logic run inside a write transaction.
pub type TxUserFn<'f> =
    dyn FnMut(&mut dyn ReadWriteTransaction) -> Result<(), DatastoreError> + 'f;

/// Versioned relationship datastore.
pub trait Datastore: Send + Sync {
    /// Returns a reader bound to a revision. No I/O happens until the first query.
    fn snapshot_reader<'a>(
        &'a self,
        revision: Revision,
        cancel: &CancellationToken,
    ) -> Box<dyn Reader + 'a>;

    /// Runs `f` once inside a fresh write transaction, committing iff it succeeds.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, [`DatastoreError::Canceled`], or a
    /// [`DatastoreError::WriteConflict`] raised at commit.
    fn read_write_tx(
        &self,
        cancel: &CancellationToken,
        f: &mut TxUserFn<'_>,
    ) -> Result<Revision, DatastoreError>;

    /// Returns the latest committed revision.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError`] when the revision cannot be loaded.
    fn head_revision(&self) -> Result<Revision, DatastoreError>;

    /// Returns a recent revision that is cheap to compute.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError`] when the revision cannot be loaded.
    fn optimized_revision(&self) -> Result<Revision, DatastoreError> {
        self.head_revision()
    }

    /// Verifies a revision was committed.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::InvalidRevision`] when it was not.
    fn check_revision(&self, revision: Revision) -> Result<(), DatastoreError>;

    /// Streams changes committed after a revision.
    fn watch(&self, after: Revision) -> (Receiver<RevisionChanges>, Receiver<DatastoreError>);

    /// Reports readiness.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError`] only for backend failures; an unmigrated or
    /// unseeded store reports not-ready instead.
    fn ready_state(&self) -> Result<ReadyState, DatastoreError>;

    /// Reports optional feature support.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError`] when feature discovery fails.
    fn features(&self) -> Result<Features, DatastoreError>;

    /// Returns identifier and relationship statistics.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError`] when a statistics query fails.
    fn statistics(&self) -> Result<Stats, DatastoreError>;

    /// Releases backing resources.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError`] when the backend fails to close.
    fn close(&self) -> Result<(), DatastoreError>;
}
