// crates/tuplevault-core/src/core/revision.rs
// ============================================================================
// Module: Revisions
// Description: Totally ordered revision identifiers for committed writes.
// Purpose: Provide the unit of snapshot time shared by readers and writers.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A [`Revision`] is the sequence number of a committed write transaction.
//! Revisions are compared numerically; the zero value is reserved as the
//! unset revision and is never allocated by a datastore. Revisions travel
//! through text surfaces in their decimal form.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Revision
// ============================================================================

/// Revision of a committed write transaction.
///
/// # Invariants
/// - [`Revision::NONE`] (zero) is never allocated by a datastore.
/// - Allocated revisions are strictly increasing in commit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(u64);

impl Revision {
    /// The unset revision.
    pub const NONE: Self = Self(0);

    /// Creates a revision from a transaction sequence number.
    #[must_use]
    pub const fn new(transaction_id: u64) -> Self {
        Self(transaction_id)
    }

    /// Returns the transaction sequence number.
    #[must_use]
    pub const fn transaction_id(self) -> u64 {
        self.0
    }

    /// Returns true when this is the unset revision.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Error returned when a revision string cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid revision format: {0}")]
pub struct RevisionParseError(String);

impl FromStr for Revision {
    type Err = RevisionParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(RevisionParseError(value.to_string()));
        }
        trimmed.parse::<u64>().map(Self).map_err(|_| RevisionParseError(value.to_string()))
    }
}
