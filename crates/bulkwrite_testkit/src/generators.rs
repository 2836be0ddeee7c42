//! Property-based test generators using proptest.
//!
//! Batches generated here always carry unique, valid row keys of the form
//! `row0000`, `row0001`, ... matching their position, so a key identifies
//! the original index of its mutation.

use crate::chaos::{AttemptPlan, ItemOutcome};
use bulkwrite_protocol::{Mutation, SingleRowMutation, Status, StatusCode, TimestampRange};
use bytes::Bytes;
use proptest::prelude::*;

/// Row key for the mutation at `index` of a generated batch.
pub fn row_key_for(index: usize) -> Bytes {
    Bytes::from(format!("row{index:04}"))
}

/// Strategy for column qualifiers.
pub fn column_strategy() -> impl Strategy<Value = Bytes> {
    prop::string::string_regex("[a-z]{1,8}")
        .expect("Invalid regex")
        .prop_map(Bytes::from)
}

/// Strategy for cell values.
pub fn value_strategy() -> impl Strategy<Value = Bytes> {
    prop::collection::vec(any::<u8>(), 0..32).prop_map(Bytes::from)
}

/// Strategy for sub-operations that are safe to replay.
pub fn idempotent_mutation_strategy() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        4 => (column_strategy(), 0i64..1_000_000, value_strategy())
            .prop_map(|(column, ts, value)| Mutation::set_cell("cf", column, ts, value)),
        1 => (column_strategy(), 0i64..1_000, 0i64..1_000).prop_map(|(column, a, b)| {
            let range = TimestampRange {
                start_micros: a.min(b),
                end_micros: a.max(b),
            };
            Mutation::delete_from_column("cf", column, range)
        }),
        1 => Just(Mutation::delete_from_family("cf")),
        1 => Just(Mutation::delete_from_row()),
    ]
}

/// Strategy for cells stamped by the server, which must not be replayed.
pub fn server_stamped_mutation_strategy() -> impl Strategy<Value = Mutation> {
    (column_strategy(), value_strategy())
        .prop_map(|(column, value)| Mutation::set_cell_server_time("cf", column, value))
}

/// Strategy for one row's operations; roughly one row in four contains a
/// server-stamped cell.
pub fn row_operations_strategy() -> impl Strategy<Value = Vec<Mutation>> {
    prop_oneof![
        3 => prop::collection::vec(idempotent_mutation_strategy(), 1..4),
        1 => (
            prop::collection::vec(idempotent_mutation_strategy(), 0..3),
            server_stamped_mutation_strategy(),
        )
            .prop_map(|(mut ops, stamped)| {
                ops.push(stamped);
                ops
            }),
    ]
}

/// Strategy for batches of `min..max` valid row mutations with unique keys.
pub fn batch_strategy(min: usize, max: usize) -> impl Strategy<Value = Vec<SingleRowMutation>> {
    prop::collection::vec(row_operations_strategy(), min..max).prop_map(|rows| {
        rows.into_iter()
            .enumerate()
            .map(|(i, ops)| SingleRowMutation::new(row_key_for(i), ops))
            .collect()
    })
}

/// Strategy for per-item outcomes, biased toward success.
pub fn item_outcome_strategy() -> impl Strategy<Value = ItemOutcome> {
    prop_oneof![
        5 => Just(ItemOutcome::Ok),
        3 => Just(ItemOutcome::Transient),
        1 => Just(ItemOutcome::Permanent),
        1 => Just(ItemOutcome::Omitted),
    ]
}

/// Strategy for call-level statuses.
pub fn call_status_strategy() -> impl Strategy<Value = Status> {
    prop_oneof![
        4 => Just(Status::ok()),
        1 => Just(Status::unavailable("connection reset")),
        1 => Just(Status::new(StatusCode::DeadlineExceeded, "deadline")),
        1 => Just(Status::new(StatusCode::PermissionDenied, "revoked")),
    ]
}

/// Strategy for the plan of one attempt.
pub fn attempt_plan_strategy() -> impl Strategy<Value = AttemptPlan> {
    (
        prop::collection::vec(item_outcome_strategy(), 1..8),
        call_status_strategy(),
        any::<bool>(),
    )
        .prop_map(|(outcomes, call_status, reverse)| AttemptPlan {
            outcomes,
            call_status,
            reverse,
        })
}

/// Strategy for a sequence of attempt plans.
pub fn attempt_plans_strategy(max_attempts: usize) -> impl Strategy<Value = Vec<AttemptPlan>> {
    prop::collection::vec(attempt_plan_strategy(), 0..max_attempts)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn batch_rows_are_valid_and_keyed_by_position(batch in batch_strategy(1, 30)) {
            let mut keys = HashSet::new();
            for (i, row) in batch.iter().enumerate() {
                prop_assert!(row.validate().is_ok());
                prop_assert_eq!(&row.row_key, &row_key_for(i));
                prop_assert!(keys.insert(row.row_key.clone()));
            }
        }

        #[test]
        fn idempotent_strategy_never_uses_server_time(m in idempotent_mutation_strategy()) {
            prop_assert!(!m.uses_server_timestamp());
        }

        #[test]
        fn plans_are_never_empty(plan in attempt_plan_strategy()) {
            prop_assert!(!plan.outcomes.is_empty());
        }
    }
}
