// crates/tuplevault-core/src/core/schema.rs
// ============================================================================
// Module: Schema Definitions
// Description: Namespace and caveat definitions stored alongside tuples.
// Purpose: Model versioned schema objects as opaque, serializable blobs.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Namespaces describe an object type and its relations; caveats describe a
//! named condition expression. The storage core treats both as opaque blobs
//! keyed by name and versioned by the revision that wrote them. Rewrite rules
//! and caveat expressions are interpreted by the resolution layer, not here.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::revision::Revision;
use crate::interfaces::DatastoreError;

// ============================================================================
// SECTION: Namespaces
// ============================================================================

/// Relation declared by a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDefinition {
    /// Relation name.
    pub name: String,
    /// Subject types permitted directly on the relation (`user`, `group#member`).
    #[serde(default)]
    pub allowed_subjects: Vec<String>,
    /// Opaque userset rewrite consumed by the resolution layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite: Option<Value>,
}

impl RelationDefinition {
    /// Creates a relation with no rewrite.
    #[must_use]
    pub fn new(name: impl Into<String>, allowed_subjects: &[&str]) -> Self {
        Self {
            name: name.into(),
            allowed_subjects: allowed_subjects.iter().map(|subject| (*subject).to_string()).collect(),
            rewrite: None,
        }
    }
}

/// Namespace (object type) definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceDefinition {
    /// Namespace name.
    pub name: String,
    /// Relations declared on the namespace.
    #[serde(default)]
    pub relations: Vec<RelationDefinition>,
}

impl NamespaceDefinition {
    /// Creates a namespace definition.
    #[must_use]
    pub fn new(name: impl Into<String>, relations: Vec<RelationDefinition>) -> Self {
        Self {
            name: name.into(),
            relations,
        }
    }

    /// Looks up a relation by name.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::RelationNotFound`] when the relation is not declared.
    pub fn relation(&self, name: &str) -> Result<&RelationDefinition, DatastoreError> {
        self.relations.iter().find(|relation| relation.name == name).ok_or_else(|| {
            DatastoreError::RelationNotFound {
                namespace: self.name.clone(),
                relation: name.to_string(),
            }
        })
    }
}

// ============================================================================
// SECTION: Caveats
// ============================================================================

/// Caveat (conditional expression) definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaveatDefinition {
    /// Caveat name.
    pub name: String,
    /// Opaque expression source.
    pub expression: String,
    /// Parameter names mapped to their declared type names.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl CaveatDefinition {
    /// Creates a caveat definition.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        expression: impl Into<String>,
        parameters: BTreeMap<String, String>,
    ) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
            parameters,
        }
    }
}

// ============================================================================
// SECTION: Revisioned
// ============================================================================

/// Definition paired with the revision that last wrote it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revisioned<T> {
    /// Stored definition.
    pub definition: T,
    /// Revision at which the definition was written.
    pub last_written_revision: Revision,
}

/// Revisioned namespace definition.
pub type RevisionedNamespace = Revisioned<NamespaceDefinition>;
/// Revisioned caveat definition.
pub type RevisionedCaveat = Revisioned<CaveatDefinition>;

#[cfg(test)]
mod tests {
    use super::NamespaceDefinition;
    use super::RelationDefinition;
    use crate::interfaces::DatastoreError;

    #[test]
    fn missing_relation_reports_namespace_and_relation() {
        let namespace = NamespaceDefinition::new(
            "document",
            vec![RelationDefinition::new("viewer", &["user"])],
        );
        assert!(namespace.relation("viewer").is_ok());
        assert!(matches!(
            namespace.relation("editor"),
            Err(DatastoreError::RelationNotFound { namespace, relation })
                if namespace == "document" && relation == "editor"
        ));
    }
}
