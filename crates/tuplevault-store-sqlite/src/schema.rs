// crates/tuplevault-store-sqlite/src/schema.rs
// ============================================================================
// Module: Tuple Schema Information
// Description: Tuple column names and the filter builder that targets them.
// Purpose: Translate relationship filters and cursors into SQL predicates.
// Dependencies: sea-query, tuplevault-core
// ============================================================================

//! ## Overview
//! [`Column`] names every column the datastore tables share.
//! [`SchemaInformation`] maps the tuple sort keys onto those columns, and
//! [`SchemaQueryFilterer`] layers resource, subject, caveat, snapshot,
//! ordering, cursor, and limit clauses onto a tuple SELECT skeleton. Cursors
//! compare the sort key as a row value, `(a, b, ...) > (?, ?, ...)`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use sea_query::Cond;
use sea_query::Condition;
use sea_query::Expr;
use sea_query::ExprTrait;
use sea_query::Iden;
use sea_query::Order;
use sea_query::SelectStatement;
use tuplevault_core::DatastoreError;
use tuplevault_core::RelationTuple;
use tuplevault_core::RelationshipsFilter;
use tuplevault_core::SortOrder;
use tuplevault_core::SubjectsSelector;

use crate::executor::SqlQuery;

// ============================================================================
// SECTION: Columns
// ============================================================================

/// `deleted_transaction` value of rows that have not been tombstoned.
pub const LIVE_DELETED_TXN_ID: i64 = i64::MAX;

/// Column identifiers across the datastore tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Iden)]
pub enum Column {
    /// Row or transaction id.
    Id,
    /// Resource namespace; also the namespace definition name.
    Namespace,
    /// Resource object id.
    ObjectId,
    /// Resource relation.
    Relation,
    /// Subject namespace.
    UsersetNamespace,
    /// Subject object id.
    UsersetObjectId,
    /// Subject relation.
    UsersetRelation,
    /// Caveat name on a tuple.
    CaveatName,
    /// Caveat context JSON on a tuple.
    CaveatContext,
    /// Creating revision.
    CreatedTransaction,
    /// Tombstoning revision.
    DeletedTransaction,
    /// Namespace definition payload.
    SerializedConfig,
    /// Caveat definition name.
    Name,
    /// Caveat definition payload.
    Definition,
    /// Transaction commit time.
    Timestamp,
    /// Database identifier.
    DatabaseIdent,
}

// ============================================================================
// SECTION: Schema Information
// ============================================================================

/// Tuple columns that make up the sort keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaInformation {
    /// Resource namespace column.
    pub col_namespace: Column,
    /// Resource object id column.
    pub col_object_id: Column,
    /// Resource relation column.
    pub col_relation: Column,
    /// Subject namespace column.
    pub col_userset_namespace: Column,
    /// Subject object id column.
    pub col_userset_object_id: Column,
    /// Subject relation column.
    pub col_userset_relation: Column,
    /// Caveat name column.
    pub col_caveat_name: Column,
}

impl SchemaInformation {
    /// Schema information for the `SQLite` tuple table.
    #[must_use]
    pub const fn sqlite() -> Self {
        Self {
            col_namespace: Column::Namespace,
            col_object_id: Column::ObjectId,
            col_relation: Column::Relation,
            col_userset_namespace: Column::UsersetNamespace,
            col_userset_object_id: Column::UsersetObjectId,
            col_userset_relation: Column::UsersetRelation,
            col_caveat_name: Column::CaveatName,
        }
    }

    /// Returns the sort-key columns for an order.
    #[must_use]
    pub const fn sort_columns(&self, sort: SortOrder) -> Option<[Column; 6]> {
        match sort {
            SortOrder::Unsorted => None,
            SortOrder::ByResource => Some([
                self.col_namespace,
                self.col_object_id,
                self.col_relation,
                self.col_userset_namespace,
                self.col_userset_object_id,
                self.col_userset_relation,
            ]),
            SortOrder::BySubject => Some([
                self.col_userset_namespace,
                self.col_userset_object_id,
                self.col_userset_relation,
                self.col_namespace,
                self.col_object_id,
                self.col_relation,
            ]),
        }
    }
}

/// Returns the sort-key values of a tuple for an order.
fn sort_values(tuple: &RelationTuple, sort: SortOrder) -> [&str; 6] {
    let resource = [
        tuple.resource.namespace.as_str(),
        tuple.resource.object_id.as_str(),
        tuple.resource.relation.as_str(),
    ];
    let subject = [
        tuple.subject.namespace.as_str(),
        tuple.subject.object_id.as_str(),
        tuple.subject.relation.as_str(),
    ];
    match sort {
        SortOrder::BySubject => {
            [subject[0], subject[1], subject[2], resource[0], resource[1], resource[2]]
        }
        SortOrder::Unsorted | SortOrder::ByResource => {
            [resource[0], resource[1], resource[2], subject[0], subject[1], subject[2]]
        }
    }
}

// ============================================================================
// SECTION: Filterer
// ============================================================================

/// Tuple SELECT with relationship filters applied incrementally.
#[derive(Debug, Clone)]
pub struct SchemaQueryFilterer<'s> {
    /// Sort-key columns.
    schema: &'s SchemaInformation,
    /// Statement under construction, without its WHERE clause.
    query: SelectStatement,
    /// Conjunction of every filter added so far.
    condition: Condition,
}

impl<'s> SchemaQueryFilterer<'s> {
    /// Wraps a tuple SELECT skeleton.
    #[must_use]
    pub fn new(schema: &'s SchemaInformation, base: SelectStatement) -> Self {
        Self {
            schema,
            query: base,
            condition: Cond::all(),
        }
    }

    /// Adds an arbitrary condition (snapshot or liveness clauses).
    #[must_use]
    pub fn filter_with_condition(mut self, condition: Condition) -> Self {
        self.condition = self.condition.add(condition);
        self
    }

    /// Adds a single boolean expression.
    fn filter_with_expr(mut self, expr: Expr) -> Self {
        self.condition = self.condition.add(expr);
        self
    }

    /// Restricts results to a resource type.
    #[must_use]
    pub fn filter_to_resource_type(self, resource_type: &str) -> Self {
        let column = self.schema.col_namespace;
        self.filter_with_expr(Expr::col(column).eq(resource_type.to_string()))
    }

    /// Restricts results to resource ids.
    #[must_use]
    pub fn filter_to_resource_ids(self, resource_ids: &[String]) -> Self {
        let column = self.schema.col_object_id;
        self.filter_with_expr(Expr::col(column).is_in(resource_ids.iter().cloned()))
    }

    /// Restricts results to a resource relation.
    #[must_use]
    pub fn filter_to_relation(self, relation: &str) -> Self {
        let column = self.schema.col_relation;
        self.filter_with_expr(Expr::col(column).eq(relation.to_string()))
    }

    /// Restricts results to tuples carrying a caveat.
    #[must_use]
    pub fn filter_to_caveat_name(self, caveat_name: &str) -> Self {
        let column = self.schema.col_caveat_name;
        self.filter_with_expr(Expr::col(column).eq(caveat_name.to_string()))
    }

    /// Applies every populated field of a forward filter.
    #[must_use]
    pub fn filter_with_relationships_filter(self, filter: &RelationshipsFilter) -> Self {
        let mut filterer = self;
        if let Some(resource_type) = &filter.resource_type {
            filterer = filterer.filter_to_resource_type(resource_type);
        }
        if !filter.resource_ids.is_empty() {
            filterer = filterer.filter_to_resource_ids(&filter.resource_ids);
        }
        if let Some(relation) = &filter.relation {
            filterer = filterer.filter_to_relation(relation);
        }
        if !filter.subjects.is_empty() {
            filterer = filterer.filter_with_subjects_selectors(&filter.subjects);
        }
        if let Some(caveat_name) = &filter.caveat_name {
            filterer = filterer.filter_to_caveat_name(caveat_name);
        }
        filterer
    }

    /// Restricts results to subjects matching any of the selectors.
    ///
    /// A selector with no populated field matches every subject, so it
    /// leaves the query unrestricted.
    #[must_use]
    pub fn filter_with_subjects_selectors(self, selectors: &[SubjectsSelector]) -> Self {
        let mut alternatives = Cond::any();
        for selector in selectors {
            if selector.subject_type.is_none()
                && selector.subject_ids.is_empty()
                && selector.relation.is_none()
            {
                return self;
            }
            alternatives = alternatives.add(self.subjects_selector_condition(selector));
        }
        self.filter_with_condition(alternatives)
    }

    /// Builds the conjunction for one subjects selector.
    fn subjects_selector_condition(&self, selector: &SubjectsSelector) -> Condition {
        let mut parts = Cond::all();
        if let Some(subject_type) = &selector.subject_type {
            parts = parts.add(Expr::col(self.schema.col_userset_namespace).eq(subject_type.clone()));
        }
        if !selector.subject_ids.is_empty() {
            parts = parts.add(
                Expr::col(self.schema.col_userset_object_id)
                    .is_in(selector.subject_ids.iter().cloned()),
            );
        }
        if let Some(relation) = &selector.relation {
            parts = parts.add(Expr::col(self.schema.col_userset_relation).eq(relation.clone()));
        }
        parts
    }

    /// Applies ordering, an exclusive cursor, and a limit.
    ///
    /// The cursor is compared against the sort key of `sort`; with
    /// [`SortOrder::Unsorted`] the caller must resolve a concrete order first.
    #[must_use]
    pub fn paginate(
        mut self,
        sort: SortOrder,
        after: Option<&RelationTuple>,
        limit: Option<u64>,
    ) -> Self {
        if let Some(columns) = self.schema.sort_columns(sort) {
            if let Some(cursor) = after {
                self = self.filter_with_expr(cursor_expr(&columns, &sort_values(cursor, sort)));
            }
            for column in columns {
                self.query.order_by(column, Order::Asc);
            }
        }
        if let Some(limit) = limit {
            self.query.limit(limit);
        }
        self
    }

    /// Finishes and renders the statement.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::Internal`] when the statement cannot be rendered.
    pub fn into_query(mut self) -> Result<SqlQuery, DatastoreError> {
        self.query.cond_where(self.condition);
        SqlQuery::build(&self.query)
    }
}

/// Renders `(columns) > (values)`, a lexicographic comparison of the sort key.
fn cursor_expr(columns: &[Column; 6], values: &[&str; 6]) -> Expr {
    Expr::tuple(columns.iter().map(|column| Expr::col(*column)))
        .gt(Expr::tuple(values.iter().map(|value| Expr::val((*value).to_string()))))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
