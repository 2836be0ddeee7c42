//! Test fixtures and mutator helpers.
//!
//! Provides ready-made rows, batches and mutators wired to the test
//! transports, so tests only spell out what they actually check.

use bulkwrite_emulator::{Emulator, EmulatorConfig, FaultConfig};
use bulkwrite_engine::{
    BackoffConfig, BatchState, BulkMutator, DefaultStatusClassifier, IdempotencyMode,
    MutateRowsTransport, MutatorConfig, RetryConfig, SafeClassifier,
};
use bulkwrite_protocol::{Mutation, SingleRowMutation};
use bytes::Bytes;
use std::sync::Arc;

/// Table name used by every fixture.
pub const TEST_TABLE: &str = "projects/test/instances/test/tables/events";

/// A row whose operations are all safe to replay.
pub fn idempotent_row(key: impl Into<Bytes>) -> SingleRowMutation {
    SingleRowMutation::new(
        key,
        vec![
            Mutation::set_cell("cf", "payload", 1_000, "v1"),
            Mutation::set_cell("cf", "kind", 1_000, "event"),
        ],
    )
}

/// A row containing a cell stamped by the server clock.
pub fn server_stamped_row(key: impl Into<Bytes>) -> SingleRowMutation {
    SingleRowMutation::new(
        key,
        vec![
            Mutation::set_cell("cf", "payload", 1_000, "v1"),
            Mutation::set_cell_server_time("cf", "seen", "1"),
        ],
    )
}

/// A batch of `len` rows keyed `row0000`, `row0001`, ...; every
/// `stamped_every`-th row (when non-zero) carries a server-stamped cell.
pub fn mixed_batch(len: usize, stamped_every: usize) -> Vec<SingleRowMutation> {
    (0..len)
        .map(|i| {
            let key = crate::generators::row_key_for(i);
            if stamped_every != 0 && i % stamped_every == 0 {
                server_stamped_row(key)
            } else {
                idempotent_row(key)
            }
        })
        .collect()
}

/// A mutator over `transport` that retries up to `max_failures` times and
/// never sleeps between attempts.
pub fn test_mutator<T: MutateRowsTransport>(transport: T, max_failures: u32) -> BulkMutator<T> {
    let config = MutatorConfig::new(TEST_TABLE)
        .with_retry(RetryConfig::error_count(max_failures))
        .with_backoff(BackoffConfig::none());
    BulkMutator::new(config, transport).expect("Failed to create test mutator")
}

/// Like [`test_mutator`], with the given idempotency mode.
pub fn test_mutator_with_mode<T: MutateRowsTransport>(
    transport: T,
    max_failures: u32,
    mode: IdempotencyMode,
) -> BulkMutator<T> {
    let config = MutatorConfig::new(TEST_TABLE)
        .with_retry(RetryConfig::error_count(max_failures))
        .with_backoff(BackoffConfig::none())
        .with_idempotency(mode);
    BulkMutator::new(config, transport).expect("Failed to create test mutator")
}

/// A batch state over `mutations` with the default classifiers.
pub fn test_batch_state(mutations: Vec<SingleRowMutation>) -> BatchState {
    BatchState::new(
        TEST_TABLE,
        "",
        mutations,
        &SafeClassifier,
        Arc::new(DefaultStatusClassifier),
    )
}

/// An emulator serving [`TEST_TABLE`] with the given faults.
pub fn test_emulator(faults: FaultConfig) -> Emulator {
    Emulator::new(EmulatorConfig::new(TEST_TABLE).with_faults(faults))
        .expect("Failed to create test emulator")
}

/// Runs `f` with a mutator over a fault-free emulator.
///
/// # Example
///
/// ```rust
/// use bulkwrite_testkit::{idempotent_row, with_emulator};
///
/// with_emulator(|mutator| {
///     assert!(mutator.apply(vec![idempotent_row("a")]).is_empty());
///     assert_eq!(mutator.transport().table().row_count(), 1);
/// });
/// ```
pub fn with_emulator<F, R>(f: F) -> R
where
    F: FnOnce(&BulkMutator<Emulator>) -> R,
{
    let mutator = test_mutator(test_emulator(FaultConfig::default()), 10);
    f(&mutator)
}
