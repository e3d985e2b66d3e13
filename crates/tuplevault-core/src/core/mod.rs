// crates/tuplevault-core/src/core/mod.rs
// ============================================================================
// Module: Tuplevault Core Types
// Description: Domain types shared by every datastore backend.
// Purpose: Group revisions, tuples, schema definitions, filters, and status.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Core types are backend-agnostic and serializable. Backends translate them
//! to and from their physical representation at the storage boundary.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod cancel;
pub mod filter;
pub mod revision;
pub mod schema;
pub mod status;
pub mod tuple;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use cancel::CancellationToken;
pub use filter::QueryOptions;
pub use filter::RelationReference;
pub use filter::RelationshipFilter;
pub use filter::RelationshipIterator;
pub use filter::RelationshipsFilter;
pub use filter::ReverseQueryOptions;
pub use filter::SortOrder;
pub use filter::SubjectFilter;
pub use filter::SubjectsFilter;
pub use filter::SubjectsSelector;
pub use revision::Revision;
pub use revision::RevisionParseError;
pub use schema::CaveatDefinition;
pub use schema::NamespaceDefinition;
pub use schema::RelationDefinition;
pub use schema::Revisioned;
pub use schema::RevisionedCaveat;
pub use schema::RevisionedNamespace;
pub use status::DatabaseIdent;
pub use status::Feature;
pub use status::Features;
pub use status::ObjectTypeStat;
pub use status::ReadyState;
pub use status::RevisionChanges;
pub use status::Stats;
pub use tuple::CaveatContext;
pub use tuple::ContextualizedCaveat;
pub use tuple::ELLIPSIS;
pub use tuple::MutationOperation;
pub use tuple::ObjectAndRelation;
pub use tuple::RelationTuple;
pub use tuple::RelationshipMutation;
pub use tuple::TupleKey;
pub use tuple::TupleParseError;
