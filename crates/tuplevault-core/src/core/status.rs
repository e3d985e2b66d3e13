// crates/tuplevault-core/src/core/status.rs
// ============================================================================
// Module: Datastore Status
// Description: Readiness, feature, statistics, and change-feed payloads.
// Purpose: Report operational state of a datastore to its callers.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Value types returned by the datastore facade for readiness probes,
//! feature discovery, statistics, and watch change feeds.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::core::revision::Revision;
use crate::core::tuple::RelationshipMutation;

// ============================================================================
// SECTION: Readiness
// ============================================================================

/// Readiness report for a datastore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyState {
    /// True when the datastore can serve traffic.
    pub is_ready: bool,
    /// Human-readable reason when not ready.
    pub message: String,
}

impl ReadyState {
    /// Ready state with no message.
    #[must_use]
    pub const fn ready() -> Self {
        Self {
            is_ready: true,
            message: String::new(),
        }
    }

    /// Not-ready state with a reason.
    #[must_use]
    pub fn not_ready(message: impl Into<String>) -> Self {
        Self {
            is_ready: false,
            message: message.into(),
        }
    }
}

// ============================================================================
// SECTION: Features
// ============================================================================

/// Availability of one optional datastore feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    /// True when the feature is supported.
    pub enabled: bool,
    /// Reason the feature is unavailable, if disabled.
    pub reason: String,
}

/// Optional features supported by a datastore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features {
    /// Change-feed support.
    pub watch: Feature,
}

// ============================================================================
// SECTION: Statistics
// ============================================================================

/// Live relationship counts for one object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectTypeStat {
    /// Namespace name.
    pub name: String,
    /// Live relationships whose resource is of this type.
    pub relationship_count: u64,
    /// Distinct resource objects of this type with live relationships.
    pub object_count: u64,
}

/// Datastore statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Database identifier recorded at bootstrap.
    pub unique_id: DatabaseIdent,
    /// Approximate number of live relationships.
    pub estimated_relationship_count: u64,
    /// Per-namespace counts for live namespaces.
    pub object_type_statistics: Vec<ObjectTypeStat>,
}

/// Random identifier recorded once per database.
///
/// # Invariants
/// - Canonical lowercase UUID text form (8-4-4-4-12 hex digits).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatabaseIdent(String);

impl DatabaseIdent {
    /// Parses and normalizes a UUID text form.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let bytes = value.as_bytes();
        if bytes.len() != 36 {
            return None;
        }
        let well_formed = bytes.iter().enumerate().all(|(index, byte)| match index {
            8 | 13 | 18 | 23 => *byte == b'-',
            _ => byte.is_ascii_hexdigit(),
        });
        well_formed.then(|| Self(value.to_ascii_lowercase()))
    }

    /// Builds an identifier from 16 random bytes, stamping the UUID v4
    /// version and variant bits.
    #[must_use]
    pub fn from_random_bytes(mut bytes: [u8; 16]) -> Self {
        bytes[6] = (bytes[6] & 0x0f) | 0x40;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;
        let hex: String = bytes.iter().map(|byte| format!("{byte:02x}")).collect();
        Self(format!(
            "{}-{}-{}-{}-{}",
            &hex[0 .. 8],
            &hex[8 .. 12],
            &hex[12 .. 16],
            &hex[16 .. 20],
            &hex[20 .. 32]
        ))
    }

    /// Returns the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatabaseIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// SECTION: Change Feed
// ============================================================================

/// Changes committed at one revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionChanges {
    /// Revision that committed the changes.
    pub revision: Revision,
    /// Mutations applied at the revision.
    pub changes: Vec<RelationshipMutation>,
}

#[cfg(test)]
mod tests {
    use super::DatabaseIdent;

    #[test]
    fn random_ident_has_uuid_v4_shape() {
        let ident = DatabaseIdent::from_random_bytes([0xff; 16]);
        assert_eq!(ident.as_str(), "ffffffff-ffff-4fff-bfff-ffffffffffff");
        assert_eq!(DatabaseIdent::parse(ident.as_str()), Some(ident));
    }

    #[test]
    fn malformed_ident_is_rejected() {
        assert_eq!(DatabaseIdent::parse("not-a-uuid"), None);
        assert_eq!(DatabaseIdent::parse("ffffffff_ffff-4fff-bfff-ffffffffffff"), None);
    }
}
