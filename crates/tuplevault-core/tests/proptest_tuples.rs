// crates/tuplevault-core/tests/proptest_tuples.rs
// ============================================================================
// Module: Tuple Property Tests
// Description: Property-based checks for tuple text and revision ordering.
// Purpose: Keep the canonical tuple form and revision order stable.
// Dependencies: proptest, tuplevault-core
// ============================================================================

//! ## Overview
//! Property-based tests for [`RelationTuple`] text handling and [`Revision`]
//! ordering.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use proptest::prelude::*;
use tuplevault_core::ELLIPSIS;
use tuplevault_core::ObjectAndRelation;
use tuplevault_core::RelationTuple;
use tuplevault_core::Revision;

fn identifier() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,11}"
}

proptest! {
    #[test]
    fn canonical_text_parses_back(
        namespace in identifier(),
        object_id in identifier(),
        relation in identifier(),
        subject_type in identifier(),
        subject_id in identifier(),
        subject_relation in prop::option::of(identifier()),
    ) {
        let subject_relation = subject_relation.unwrap_or_else(|| ELLIPSIS.to_string());
        let original = RelationTuple::new(
            ObjectAndRelation::new(namespace, object_id, relation),
            ObjectAndRelation::new(subject_type, subject_id, subject_relation),
        );
        let parsed = RelationTuple::parse(&original.to_string()).expect("canonical text");
        prop_assert_eq!(parsed.key(), original.key());
        prop_assert_eq!(parsed, original);
    }

    #[test]
    fn revision_order_follows_transaction_ids(left in 1_u64 .., right in 1_u64 ..) {
        let (a, b) = (Revision::new(left), Revision::new(right));
        prop_assert_eq!(a.cmp(&b), left.cmp(&right));
        prop_assert_eq!(a.to_string().parse::<Revision>(), Ok(a));
    }
}
