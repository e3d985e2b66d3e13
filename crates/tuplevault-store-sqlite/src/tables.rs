// crates/tuplevault-store-sqlite/src/tables.rs
// ============================================================================
// Module: Table Names
// Description: Physical table names with an optional shared prefix.
// Purpose: Let several datastores share one database file without collisions.
// Dependencies: tuplevault-core
// ============================================================================

//! ## Overview
//! Every SQL statement reaches tables through [`Tables`]. The prefix is
//! spliced into statement text, so it is validated to a conservative
//! identifier alphabet before any name is built.

// ============================================================================
// SECTION: Imports
// ============================================================================

use tuplevault_core::DatastoreError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum accepted table prefix length.
const MAX_TABLE_PREFIX_LENGTH: usize = 64;

/// Unprefixed migration version table.
const MIGRATION_VERSION: &str = "migration_version";
/// Unprefixed transaction table.
const TRANSACTION: &str = "relation_tuple_transaction";
/// Unprefixed tuple table.
const TUPLE: &str = "relation_tuple";
/// Unprefixed namespace table.
const NAMESPACE: &str = "namespace_config";
/// Unprefixed metadata table.
const METADATA: &str = "metadata";
/// Unprefixed caveat table.
const CAVEAT: &str = "caveat";

// ============================================================================
// SECTION: Tables
// ============================================================================

/// Resolved table names for one datastore.
///
/// # Invariants
/// - Every name is `prefix + base` with a validated prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tables {
    /// Prefix applied to every table.
    prefix: String,
    /// Migration version table.
    migration_version: String,
    /// Transaction (revision) table.
    transaction: String,
    /// Relationship tuple table.
    tuple: String,
    /// Namespace definition table.
    namespace: String,
    /// Database metadata table.
    metadata: String,
    /// Caveat definition table.
    caveat: String,
}

impl Tables {
    /// Builds table names for a prefix.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::Invalid`] when the prefix is not a safe identifier.
    pub fn new(prefix: &str) -> Result<Self, DatastoreError> {
        validate_table_prefix(prefix)?;
        Ok(Self {
            prefix: prefix.to_string(),
            migration_version: format!("{prefix}{MIGRATION_VERSION}"),
            transaction: format!("{prefix}{TRANSACTION}"),
            tuple: format!("{prefix}{TUPLE}"),
            namespace: format!("{prefix}{NAMESPACE}"),
            metadata: format!("{prefix}{METADATA}"),
            caveat: format!("{prefix}{CAVEAT}"),
        })
    }

    /// Returns the configured prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the migration version table name.
    #[must_use]
    pub fn migration_version(&self) -> &str {
        &self.migration_version
    }

    /// Returns the transaction table name.
    #[must_use]
    pub fn transaction(&self) -> &str {
        &self.transaction
    }

    /// Returns the tuple table name.
    #[must_use]
    pub fn tuple(&self) -> &str {
        &self.tuple
    }

    /// Returns the namespace table name.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the metadata table name.
    #[must_use]
    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    /// Returns the caveat table name.
    #[must_use]
    pub fn caveat(&self) -> &str {
        &self.caveat
    }

    /// Returns an index or constraint name carrying the table prefix.
    #[must_use]
    pub fn index(&self, name: &str) -> String {
        format!("{}{name}", self.prefix)
    }
}

/// Validates a table prefix.
///
/// # Errors
///
/// Returns [`DatastoreError::Invalid`] when the prefix is too long or contains
/// characters outside `[A-Za-z0-9_]`.
pub fn validate_table_prefix(prefix: &str) -> Result<(), DatastoreError> {
    if prefix.len() > MAX_TABLE_PREFIX_LENGTH {
        return Err(DatastoreError::Invalid(format!(
            "table prefix exceeds {MAX_TABLE_PREFIX_LENGTH} characters"
        )));
    }
    if !prefix.bytes().all(|byte| byte.is_ascii_alphanumeric() || byte == b'_') {
        return Err(DatastoreError::Invalid(
            "table prefix may only contain ASCII letters, digits, and underscores".to_string(),
        ));
    }
    Ok(())
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

    use super::Tables;

    #[test]
    fn prefix_is_applied_to_every_table() {
        let tables = Tables::new("tenant_a_").expect("valid prefix");
        assert_eq!(tables.tuple(), "tenant_a_relation_tuple");
        assert_eq!(tables.transaction(), "tenant_a_relation_tuple_transaction");
        assert_eq!(tables.namespace(), "tenant_a_namespace_config");
        assert_eq!(tables.caveat(), "tenant_a_caveat");
        assert_eq!(tables.metadata(), "tenant_a_metadata");
        assert_eq!(tables.migration_version(), "tenant_a_migration_version");
    }

    #[test]
    fn empty_prefix_keeps_base_names() {
        let tables = Tables::new("").expect("empty prefix");
        assert_eq!(tables.tuple(), "relation_tuple");
        assert_eq!(tables.index("ix_example"), "ix_example");
    }

    #[test]
    fn unsafe_prefix_is_rejected() {
        assert!(Tables::new("a; DROP TABLE x").is_err());
        assert!(Tables::new("quote\"").is_err());
    }
}
