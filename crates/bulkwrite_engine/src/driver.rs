//! The bulk apply driver.
//!
//! [`BulkMutator`] owns a transport and a set of policy prototypes. Every call
//! to [`BulkMutator::apply`] builds a [`BatchState`], clones fresh policies and
//! runs the batch through `Attempting -> (Retrying -> Attempting)* -> Done`.
//! Each attempt sends whatever is pending, folds the streamed per-item results
//! into the batch and then lets the retry policy decide whether another
//! attempt is worth making.

use crate::batch::{BatchState, FailedMutation};
use crate::cancel::CancellationToken;
use crate::config::MutatorConfig;
use crate::error::{EngineError, EngineResult};
use crate::idempotency::IdempotencyClassifier;
use crate::policy::{BackoffPolicy, RetryPolicy};
use crate::status::{DefaultStatusClassifier, StatusClass, StatusClassifier};
use crate::transport::MutateRowsTransport;
use bulkwrite_protocol::{SingleRowMutation, Status};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Where a batch is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Sending the pending entries and reading results.
    Attempting,
    /// Waiting out a backoff delay before the next attempt.
    Retrying,
    /// No further attempts will be made.
    Done,
}

impl DriverState {
    /// Returns true for the terminal state.
    pub fn is_done(&self) -> bool {
        matches!(self, DriverState::Done)
    }
}

/// Statistics about bulk apply operations.
#[derive(Debug, Clone, Default)]
pub struct MutatorStats {
    /// Number of batches that ran to completion.
    pub batches_completed: u64,
    /// Total number of streaming calls made.
    pub attempts: u64,
    /// Attempts beyond the first one of each batch.
    pub retries: u64,
    /// Mutations handed to `apply`.
    pub mutations_submitted: u64,
    /// Mutations confirmed by the server.
    pub mutations_succeeded: u64,
    /// Mutations reported back as failed.
    pub mutations_failed: u64,
    /// Wall time of the most recent batch.
    pub last_batch_duration: Option<Duration>,
}

/// Applies batches of row mutations with per-item retries.
pub struct BulkMutator<T: MutateRowsTransport> {
    table_name: String,
    app_profile_id: String,
    transport: T,
    retry: Box<dyn RetryPolicy>,
    backoff: Box<dyn BackoffPolicy>,
    idempotency: Box<dyn IdempotencyClassifier>,
    classifier: Arc<dyn StatusClassifier>,
    cancel: CancellationToken,
    stats: RwLock<MutatorStats>,
}

impl<T: MutateRowsTransport> BulkMutator<T> {
    /// Creates a mutator from a validated configuration.
    pub fn new(config: MutatorConfig, transport: T) -> EngineResult<Self> {
        config.validate()?;
        let classifier: Arc<dyn StatusClassifier> = Arc::new(DefaultStatusClassifier);
        let retry = config.retry.build(Arc::clone(&classifier));
        let backoff = config.backoff.build();
        let idempotency = config.idempotency.build();
        Ok(Self::with_policies(
            config.table_name,
            config.app_profile_id,
            transport,
            retry,
            backoff,
            idempotency,
            classifier,
        ))
    }

    /// Creates a mutator from explicit policy prototypes.
    ///
    /// Each batch works on fresh clones of `retry` and `backoff`.
    pub fn with_policies(
        table_name: impl Into<String>,
        app_profile_id: impl Into<String>,
        transport: T,
        retry: Box<dyn RetryPolicy>,
        backoff: Box<dyn BackoffPolicy>,
        idempotency: Box<dyn IdempotencyClassifier>,
        classifier: Arc<dyn StatusClassifier>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            app_profile_id: app_profile_id.into(),
            transport,
            retry,
            backoff,
            idempotency,
            classifier,
            cancel: CancellationToken::new(),
            stats: RwLock::new(MutatorStats::default()),
        }
    }

    /// Shares `token` with this mutator, replacing its own.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the target table.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Returns a snapshot of the statistics.
    pub fn stats(&self) -> MutatorStats {
        self.stats.read().clone()
    }

    /// Returns a handle that cancels running batches.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancels every running batch.
    ///
    /// Mutations that were not confirmed are reported as cancelled.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resets the cancelled flag so that new batches run again.
    pub fn reset_cancel(&self) {
        self.cancel.reset();
    }

    /// Applies `mutations` and returns the ones that did not succeed.
    ///
    /// Each failure carries its final status and its position in `mutations`.
    /// An empty result means every mutation was confirmed.
    pub fn apply(&self, mutations: Vec<SingleRowMutation>) -> Vec<FailedMutation> {
        let start = Instant::now();
        let submitted = mutations.len();

        let mut retry = self.retry.clone_box();
        let mut backoff = self.backoff.clone_box();
        let idempotency = self.idempotency.clone_box();
        let mut batch = BatchState::new(
            self.table_name.clone(),
            self.app_profile_id.clone(),
            mutations,
            idempotency.as_ref(),
            Arc::clone(&self.classifier),
        );

        let mut attempts = 0u64;
        let mut last_status = Status::ok();
        let mut state = if batch.has_pending() {
            DriverState::Attempting
        } else {
            DriverState::Done
        };

        while !state.is_done() {
            state = match state {
                DriverState::Attempting => {
                    if self.cancel.is_cancelled() {
                        batch.record_call_failure(Status::cancelled("bulk apply cancelled"));
                        DriverState::Done
                    } else {
                        attempts += 1;
                        last_status = self.run_attempt(&mut batch);
                        self.next_state(&batch, &last_status, retry.as_mut())
                    }
                }
                DriverState::Retrying => {
                    let delay = backoff.on_completion(&last_status);
                    debug!(
                        ?delay,
                        pending = batch.pending_len(),
                        code = %last_status.code,
                        "backing off before retry"
                    );
                    if self.cancel.sleep(delay) {
                        batch.record_call_failure(Status::cancelled(
                            "bulk apply cancelled during backoff",
                        ));
                        DriverState::Done
                    } else {
                        DriverState::Attempting
                    }
                }
                DriverState::Done => DriverState::Done,
            };
        }

        let failures = batch.final_failures();
        let elapsed = start.elapsed();
        info!(
            table = %self.table_name,
            mutations = submitted,
            failed = failures.len(),
            attempts,
            ?elapsed,
            "bulk apply finished"
        );

        {
            let mut stats = self.stats.write();
            stats.batches_completed += 1;
            stats.attempts += attempts;
            stats.retries += attempts.saturating_sub(1);
            stats.mutations_submitted += submitted as u64;
            stats.mutations_succeeded += submitted.saturating_sub(failures.len()) as u64;
            stats.mutations_failed += failures.len() as u64;
            stats.last_batch_duration = Some(elapsed);
        }

        failures
    }

    /// Applies `mutations`, failing if any of them did not succeed.
    pub fn apply_all(&self, mutations: Vec<SingleRowMutation>) -> EngineResult<()> {
        let total = mutations.len();
        let failures = self.apply(mutations);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(EngineError::PermanentMutationFailure { failures, total })
        }
    }

    /// Runs one streaming call and returns the status governing the retry
    /// decision.
    fn run_attempt(&self, batch: &mut BatchState) -> Status {
        let request = batch.begin_attempt();
        debug!(entries = request.len(), "sending MutateRows");
        let mut stream = self.transport.mutate_rows(request);

        let call_status = loop {
            if self.cancel.is_cancelled() {
                stream.cancel();
                break Status::cancelled("bulk apply cancelled while reading responses");
            }
            match stream.read() {
                Some(response) => {
                    for entry in response.entries {
                        batch.on_item_response(entry.index, entry.status);
                    }
                }
                None => break stream.finish(),
            }
        };
        drop(stream);

        batch.on_stream_end(call_status)
    }

    fn next_state(
        &self,
        batch: &BatchState,
        status: &Status,
        retry: &mut dyn RetryPolicy,
    ) -> DriverState {
        if !batch.has_pending() {
            return DriverState::Done;
        }
        if self.classifier.classify(status) != StatusClass::Transient {
            debug!(code = %status.code, "not retrying non-transient failure");
            return DriverState::Done;
        }
        if !retry.on_failure(status) || retry.is_exhausted() {
            warn!(
                pending = batch.pending_len(),
                code = %status.code,
                "retry policy exhausted"
            );
            return DriverState::Done;
        }
        DriverState::Retrying
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackoffConfig, IdempotencyMode, RetryConfig};
    use crate::transport::{MockTransport, ScriptedAttempt};
    use bulkwrite_protocol::{EntryStatus, Mutation, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn row(key: &'static str) -> SingleRowMutation {
        SingleRowMutation::new(key, vec![Mutation::set_cell("cf", "q", 1_000, "v")])
    }

    fn mutator(transport: MockTransport, max_failures: u32) -> BulkMutator<MockTransport> {
        let config = MutatorConfig::new("t")
            .with_retry(RetryConfig::error_count(max_failures))
            .with_backoff(BackoffConfig::none());
        BulkMutator::new(config, transport).unwrap()
    }

    #[test]
    fn initial_stats() {
        let mutator = mutator(MockTransport::new(), 3);
        let stats = mutator.stats();
        assert_eq!(stats.batches_completed, 0);
        assert_eq!(stats.attempts, 0);
        assert!(stats.last_batch_duration.is_none());
    }

    #[test]
    fn rejects_invalid_config() {
        let result = BulkMutator::new(MutatorConfig::new(""), MockTransport::new());
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn empty_batch_makes_no_calls() {
        let mutator = mutator(MockTransport::new(), 3);
        assert!(mutator.apply(Vec::new()).is_empty());
        assert_eq!(mutator.transport().call_count(), 0);
        assert_eq!(mutator.stats().batches_completed, 1);
    }

    #[test]
    fn successful_batch() {
        let transport = MockTransport::with_script([ScriptedAttempt::ok().with_response(vec![
            EntryStatus::new(0, Status::ok()),
            EntryStatus::new(1, Status::ok()),
        ])]);
        let mutator = mutator(transport, 3);

        assert!(mutator.apply_all(vec![row("a"), row("b")]).is_ok());
        let stats = mutator.stats();
        assert_eq!(stats.attempts, 1);
        assert_eq!(stats.retries, 0);
        assert_eq!(stats.mutations_submitted, 2);
        assert_eq!(stats.mutations_succeeded, 2);
        assert_eq!(stats.mutations_failed, 0);
    }

    #[test]
    fn retries_transient_item_then_succeeds() {
        let transport = MockTransport::with_script([
            ScriptedAttempt::ok()
                .with_entry(0, Status::ok())
                .with_entry(1, Status::unavailable("busy")),
            ScriptedAttempt::ok().with_entry(0, Status::ok()),
        ]);
        let mutator = mutator(transport, 3);

        let failures = mutator.apply(vec![row("a"), row("b")]);
        assert!(failures.is_empty());

        let requests = mutator.transport().requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].entries.len(), 1);
        assert_eq!(&requests[1].entries[0].row_key[..], b"b");
        assert_eq!(mutator.stats().retries, 1);
    }

    #[test]
    fn gives_up_when_policy_exhausted() {
        let transport = MockTransport::with_script([
            ScriptedAttempt::finishing_with(Status::unavailable("down")),
            ScriptedAttempt::finishing_with(Status::unavailable("down")),
            ScriptedAttempt::finishing_with(Status::unavailable("down")),
        ]);
        let mutator = mutator(transport, 1);

        let failures = mutator.apply(vec![row("a")]);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].status().code, StatusCode::Unavailable);
        assert_eq!(mutator.transport().call_count(), 2);
    }

    #[test]
    fn permanent_call_failure_stops_immediately() {
        let transport = MockTransport::with_script([ScriptedAttempt::finishing_with(
            Status::new(StatusCode::PermissionDenied, "nope"),
        )]);
        let mutator = mutator(transport, 5);

        let err = mutator.apply_all(vec![row("a"), row("b")]).unwrap_err();
        let failures = err.failures();
        assert_eq!(failures.len(), 2);
        assert!(failures
            .iter()
            .all(|f| f.status().code == StatusCode::PermissionDenied));
        assert_eq!(mutator.transport().call_count(), 1);
    }

    #[test]
    fn cancelled_before_start_reports_cancelled() {
        let transport =
            MockTransport::with_script([ScriptedAttempt::ok().with_entry(0, Status::ok())]);
        let mutator = mutator(transport, 3);
        mutator.cancel();

        let failures = mutator.apply(vec![row("a")]);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].status().code, StatusCode::Cancelled);
        assert_eq!(mutator.transport().call_count(), 0);

        mutator.reset_cancel();
        let transport_calls_before = mutator.transport().call_count();
        assert!(mutator.apply(vec![row("b")]).is_empty());
        assert_eq!(mutator.transport().call_count(), transport_calls_before + 1);
    }

    #[test]
    fn policies_are_fresh_per_batch() {
        let transport = MockTransport::with_script([
            ScriptedAttempt::finishing_with(Status::unavailable("down")),
            ScriptedAttempt::ok().with_entry(0, Status::ok()),
            ScriptedAttempt::finishing_with(Status::unavailable("down")),
            ScriptedAttempt::ok().with_entry(0, Status::ok()),
        ]);
        let mutator = mutator(transport, 1);

        assert!(mutator.apply(vec![row("a")]).is_empty());
        assert!(mutator.apply(vec![row("b")]).is_empty());
        assert_eq!(mutator.transport().call_count(), 4);
    }

    #[derive(Debug, Clone, Default)]
    struct CountingClassifier {
        clones: Arc<AtomicUsize>,
    }

    impl IdempotencyClassifier for CountingClassifier {
        fn is_idempotent(&self, _mutation: &Mutation) -> bool {
            true
        }

        fn clone_box(&self) -> Box<dyn IdempotencyClassifier> {
            self.clones.fetch_add(1, Ordering::SeqCst);
            Box::new(self.clone())
        }
    }

    #[test]
    fn each_batch_gets_its_own_idempotency_classifier() {
        let transport = MockTransport::with_script([
            ScriptedAttempt::ok().with_entry(0, Status::ok()),
            ScriptedAttempt::ok().with_entry(0, Status::ok()),
        ]);
        let classifier = CountingClassifier::default();
        let status: Arc<dyn StatusClassifier> = Arc::new(DefaultStatusClassifier);
        let mutator = BulkMutator::with_policies(
            "t",
            "",
            transport,
            RetryConfig::error_count(1).build(Arc::clone(&status)),
            BackoffConfig::none().build(),
            Box::new(classifier.clone()),
            status,
        );

        assert!(mutator.apply(vec![row("a")]).is_empty());
        assert!(mutator.apply(vec![row("b")]).is_empty());
        assert_eq!(classifier.clones.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn always_retry_mode_replays_server_timestamped_cells() {
        let transport = MockTransport::with_script([
            ScriptedAttempt::ok().with_entry(0, Status::unavailable("busy")),
            ScriptedAttempt::ok().with_entry(0, Status::ok()),
        ]);
        let config = MutatorConfig::new("t")
            .with_retry(RetryConfig::error_count(2))
            .with_backoff(BackoffConfig::none())
            .with_idempotency(IdempotencyMode::AlwaysRetry);
        let mutator = BulkMutator::new(config, transport).unwrap();

        let stamped =
            SingleRowMutation::new("a", vec![Mutation::set_cell_server_time("cf", "q", "v")]);
        assert!(mutator.apply(vec![stamped]).is_empty());
        assert_eq!(mutator.transport().call_count(), 2);
    }

    #[test]
    fn driver_state_terminal() {
        assert!(DriverState::Done.is_done());
        assert!(!DriverState::Attempting.is_done());
        assert!(!DriverState::Retrying.is_done());
    }
}
