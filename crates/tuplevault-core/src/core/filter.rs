// crates/tuplevault-core/src/core/filter.rs
// ============================================================================
// Module: Relationship Filters
// Description: Filters, pagination options, and result iterators.
// Purpose: Describe which tuples a read or bulk delete targets.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Filters narrow relationship reads by resource and subject fields. Forward
//! queries use [`RelationshipsFilter`], reverse (subject-first) queries use
//! [`SubjectsFilter`], and bulk deletes use [`RelationshipFilter`]. Results
//! are returned as a [`RelationshipIterator`]; pagination uses an exclusive
//! tuple cursor compared against the sort key.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::tuple::RelationTuple;

// ============================================================================
// SECTION: Read Filters
// ============================================================================

/// Selects subjects by type, identifiers, and relation.
///
/// # Invariants
/// - Empty `subject_ids` matches any identifier.
/// - `relation` of `None` matches any subject relation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectsSelector {
    /// Optional subject type.
    #[serde(default)]
    pub subject_type: Option<String>,
    /// Subject identifiers to match (any when empty).
    #[serde(default)]
    pub subject_ids: Vec<String>,
    /// Optional subject relation.
    #[serde(default)]
    pub relation: Option<String>,
}

/// Filter for forward relationship queries.
///
/// # Invariants
/// - Multiple subject selectors are combined with OR.
/// - All other fields are combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipsFilter {
    /// Optional resource type.
    #[serde(default)]
    pub resource_type: Option<String>,
    /// Resource identifiers to match (any when empty).
    #[serde(default)]
    pub resource_ids: Vec<String>,
    /// Optional resource relation.
    #[serde(default)]
    pub relation: Option<String>,
    /// Subject selectors (any subject when empty).
    #[serde(default)]
    pub subjects: Vec<SubjectsSelector>,
    /// Optional caveat name.
    #[serde(default)]
    pub caveat_name: Option<String>,
}

impl RelationshipsFilter {
    /// Filter matching every relationship of a resource type.
    #[must_use]
    pub fn for_resource_type(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: Some(resource_type.into()),
            ..Self::default()
        }
    }

    /// Filter matching one resource object.
    #[must_use]
    pub fn for_resource(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type: Some(resource_type.into()),
            resource_ids: vec![resource_id.into()],
            ..Self::default()
        }
    }

    /// Returns the filter narrowed to a relation.
    #[must_use]
    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = Some(relation.into());
        self
    }

    /// Returns the filter narrowed to a subject selector.
    #[must_use]
    pub fn with_subjects(mut self, selector: SubjectsSelector) -> Self {
        self.subjects.push(selector);
        self
    }
}

/// Filter for reverse (subject-first) relationship queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectsFilter {
    /// Subject type.
    pub subject_type: String,
    /// Subject identifiers to match (any when empty).
    #[serde(default)]
    pub subject_ids: Vec<String>,
    /// Optional subject relation.
    #[serde(default)]
    pub relation: Option<String>,
}

impl SubjectsFilter {
    /// Converts the filter into the equivalent subjects selector.
    #[must_use]
    pub fn as_selector(&self) -> SubjectsSelector {
        SubjectsSelector {
            subject_type: Some(self.subject_type.clone()),
            subject_ids: self.subject_ids.clone(),
            relation: self.relation.clone(),
        }
    }
}

/// Namespace and relation pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationReference {
    /// Namespace name.
    pub namespace: String,
    /// Relation name.
    pub relation: String,
}

// ============================================================================
// SECTION: Delete Filters
// ============================================================================

/// Subject portion of a bulk delete filter.
///
/// # Invariants
/// - `relation` of `Some("")` targets the ellipsis relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectFilter {
    /// Subject type.
    pub subject_type: String,
    /// Optional subject identifier.
    #[serde(default)]
    pub subject_id: Option<String>,
    /// Optional subject relation.
    #[serde(default)]
    pub relation: Option<String>,
}

/// Filter for bulk relationship deletes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipFilter {
    /// Resource type (required).
    pub resource_type: String,
    /// Optional resource identifier.
    #[serde(default)]
    pub resource_id: Option<String>,
    /// Optional resource relation.
    #[serde(default)]
    pub relation: Option<String>,
    /// Optional subject filter.
    #[serde(default)]
    pub subject: Option<SubjectFilter>,
}

impl RelationshipFilter {
    /// Filter matching every relationship of a resource type.
    #[must_use]
    pub fn for_resource_type(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: None,
            relation: None,
            subject: None,
        }
    }
}

// ============================================================================
// SECTION: Query Options
// ============================================================================

/// Result ordering for relationship queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Backend order; no ordering guarantee.
    #[default]
    Unsorted,
    /// Ordered by resource fields, then subject fields.
    ByResource,
    /// Ordered by subject fields, then resource fields.
    BySubject,
}

/// Options for forward relationship queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Maximum number of tuples returned.
    #[serde(default)]
    pub limit: Option<u64>,
    /// Exclusive cursor; only tuples sorting after it are returned.
    #[serde(default)]
    pub after: Option<RelationTuple>,
    /// Result ordering.
    #[serde(default)]
    pub sort: SortOrder,
}

/// Options for reverse relationship queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseQueryOptions {
    /// Optional resource type and relation narrowing.
    #[serde(default)]
    pub resource_relation: Option<RelationReference>,
    /// Maximum number of tuples returned.
    #[serde(default)]
    pub limit: Option<u64>,
    /// Exclusive cursor; only tuples sorting after it are returned.
    #[serde(default)]
    pub after: Option<RelationTuple>,
    /// Result ordering.
    #[serde(default)]
    pub sort: SortOrder,
}

// ============================================================================
// SECTION: Iterator
// ============================================================================

/// Owned iterator over relationship query results.
#[derive(Debug, Default)]
pub struct RelationshipIterator {
    /// Remaining tuples.
    inner: std::vec::IntoIter<RelationTuple>,
}

impl RelationshipIterator {
    /// Wraps loaded tuples.
    #[must_use]
    pub fn new(tuples: Vec<RelationTuple>) -> Self {
        Self {
            inner: tuples.into_iter(),
        }
    }
}

impl Iterator for RelationshipIterator {
    type Item = RelationTuple;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for RelationshipIterator {}
