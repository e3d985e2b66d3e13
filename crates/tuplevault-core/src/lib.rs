// crates/tuplevault-core/src/lib.rs
// ============================================================================
// Module: Tuplevault Core Library
// Description: Public API surface for the Tuplevault storage core.
// Purpose: Expose domain types and backend-agnostic datastore interfaces.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Tuplevault stores relationship tuples and versioned schema for a
//! relationship-based authorization engine. Every write commits at a new
//! revision and every read is bound to one, so callers observe consistent
//! point-in-time snapshots while writes proceed concurrently. This crate
//! holds the shared types and traits; backends live in their own crates.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use crate::core::*;

pub use interfaces::Datastore;
pub use interfaces::DatastoreError;
pub use interfaces::InvalidRevisionReason;
pub use interfaces::ReadWriteTransaction;
pub use interfaces::Reader;
pub use interfaces::TxUserFn;
