//! Property tests: batch outcomes under randomly planned server behavior.

use bulkwrite_engine::{
    Idempotency, IdempotencyClassifier, SafeClassifier, MISSING_CONFIRMATION_MESSAGE,
};
use bulkwrite_protocol::{SingleRowMutation, Status, StatusCode};
use bulkwrite_testkit::prelude::*;
use bytes::Bytes;
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

fn index_by_key(batch: &[SingleRowMutation]) -> HashMap<Bytes, usize> {
    batch
        .iter()
        .enumerate()
        .map(|(i, row)| (row.row_key.clone(), i))
        .collect()
}

fn is_idempotent(row: &SingleRowMutation) -> bool {
    SafeClassifier.classify_row(row) == Idempotency::Idempotent
}

proptest! {
    #![proptest_config(PropTestConfig::default().to_proptest_config())]

    #[test]
    fn every_mutation_is_confirmed_or_failed_exactly_once(
        batch in batch_strategy(0, 40),
        plans in attempt_plans_strategy(6),
        max_failures in 0u32..5,
    ) {
        let mutator = test_mutator(ChaosTransport::new(plans), max_failures);
        let failures = mutator.apply(batch.clone());
        let keys = index_by_key(&batch);

        let mut confirmed = HashSet::new();
        for call in mutator.transport().calls() {
            for key in call.confirmed_keys() {
                prop_assert!(confirmed.insert(keys[&key]), "confirmed twice: {:?}", key);
            }
        }

        let mut failed = HashSet::new();
        for failure in &failures {
            prop_assert!(failed.insert(failure.original_index()));
            prop_assert!(!confirmed.contains(&failure.original_index()));
        }
        prop_assert_eq!(confirmed.len() + failed.len(), batch.len());
    }

    #[test]
    fn failures_point_at_their_original_position(
        batch in batch_strategy(1, 40),
        plans in attempt_plans_strategy(6),
    ) {
        let mutator = test_mutator(ChaosTransport::new(plans), 4);
        let failures = mutator.apply(batch.clone());

        for failure in &failures {
            let index = failure.original_index();
            prop_assert!(index < batch.len());
            prop_assert_eq!(failure.mutation(), &batch[index]);
            prop_assert_eq!(&failure.mutation().row_key, &row_key_for(index));
        }
    }

    #[test]
    fn transient_item_failures_of_non_idempotent_rows_are_final(
        batch in batch_strategy(1, 40),
        plans in attempt_plans_strategy(6),
    ) {
        let mutator = test_mutator(ChaosTransport::new(plans), 5);
        let failures = mutator.apply(batch.clone());
        let keys = index_by_key(&batch);
        let calls = mutator.transport().calls();

        let by_index: HashMap<usize, &Status> = failures
            .iter()
            .map(|f| (f.original_index(), f.status()))
            .collect();

        for (n, call) in calls.iter().enumerate() {
            for reported in &call.reported {
                let entry = &call.request.entries[reported.index as usize];
                if is_idempotent(entry) || reported.status.code != StatusCode::Unavailable {
                    continue;
                }
                let index = keys[&entry.row_key];
                prop_assert_eq!(by_index.get(&index).copied(), Some(&reported.status));
                for later in &calls[n + 1..] {
                    prop_assert!(later
                        .request
                        .entries
                        .iter()
                        .all(|e| e.row_key != entry.row_key));
                }
            }
        }
    }

    #[test]
    fn unreported_entries_follow_the_call_status(
        batch in batch_strategy(1, 30),
        reported in prop::collection::vec(any::<bool>(), 30),
        call_status in call_status_strategy(),
    ) {
        let mut state = test_batch_state(batch.clone());
        state.begin_attempt();
        for i in 0..batch.len() {
            if reported[i] {
                state.on_item_response(i as i64, Status::ok());
            }
        }
        state.on_stream_end(call_status.clone());

        let transient = matches!(
            call_status.code,
            StatusCode::Unavailable | StatusCode::DeadlineExceeded
        );
        let pending: HashSet<usize> = state
            .pending_annotations()
            .iter()
            .map(|a| a.original_index)
            .collect();
        let failures: HashMap<usize, Status> = state
            .final_failures()
            .into_iter()
            .map(|f| {
                let (_, status, index) = f.into_parts();
                (index, status)
            })
            .collect();

        for (i, row) in batch.iter().enumerate() {
            if reported[i] {
                prop_assert!(!pending.contains(&i));
                prop_assert!(!failures.contains_key(&i));
            } else if is_idempotent(row) || transient {
                prop_assert!(pending.contains(&i));
            } else if call_status.is_ok() {
                prop_assert_eq!(failures[&i].code, StatusCode::Internal);
                prop_assert_eq!(failures[&i].message.as_str(), MISSING_CONFIRMATION_MESSAGE);
            } else {
                prop_assert_eq!(&failures[&i], &call_status);
            }
        }
    }
}

#[test]
fn confirmed_entries_are_never_resent() {
    let batch = mixed_batch(12, 4);
    let plans = vec![
        AttemptPlan {
            outcomes: vec![ItemOutcome::Ok, ItemOutcome::Transient, ItemOutcome::Omitted],
            call_status: Status::unavailable("reset"),
            reverse: true,
        },
        AttemptPlan {
            outcomes: vec![ItemOutcome::Transient, ItemOutcome::Ok],
            call_status: Status::ok(),
            reverse: false,
        },
    ];
    let mutator = test_mutator(ChaosTransport::new(plans), 5);

    let failures = mutator.apply(batch);

    let calls = mutator.transport().calls();
    let mut seen = HashSet::new();
    for (n, call) in calls.iter().enumerate() {
        for key in call.confirmed_keys() {
            assert!(seen.insert(key.clone()));
            for later in &calls[n + 1..] {
                assert!(later.request.entries.iter().all(|e| e.row_key != key));
            }
        }
    }
    assert_eq!(seen.len() + failures.len(), 12);
}
