//! Per-batch bookkeeping across repeated MutateRows attempts.
//!
//! A [`BatchState`] owns two requests: `current`, the attempt in flight, and
//! `pending`, the next attempt being assembled from retryable leftovers. Each
//! request entry has an [`Annotation`] at the same position. Entries move
//! from `current` either into `pending` (retry), into the failure list, or
//! are dropped (success); nothing is ever copied or reported twice.

use crate::idempotency::{Idempotency, IdempotencyClassifier};
use crate::status::{StatusClass, StatusClassifier};
use bulkwrite_protocol::{MutateRowsRequest, SingleRowMutation, Status};
use std::mem;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Message attached to entries the server never reported on although the
/// call itself succeeded.
pub const MISSING_CONFIRMATION_MESSAGE: &str =
    "the server finished the call successfully without reporting a status for this mutation";

/// Message attached to entries still pending when retries stop and no call
/// ever failed.
pub const NEVER_CONFIRMED_MESSAGE: &str =
    "the mutation was never confirmed by the server before retries stopped";

/// Bookkeeping attached to one entry of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    /// Position in the caller's original list.
    pub original_index: usize,
    /// Aggregate idempotency, computed once at construction.
    pub idempotency: Idempotency,
    /// Whether the current attempt has reported on this entry.
    pub has_result: bool,
    /// Most recent per-item outcome.
    pub last_status: Option<Status>,
}

impl Annotation {
    fn new(original_index: usize, idempotency: Idempotency) -> Self {
        Self {
            original_index,
            idempotency,
            has_result: false,
            last_status: None,
        }
    }

    fn is_idempotent(&self) -> bool {
        self.idempotency == Idempotency::Idempotent
    }
}

/// A mutation that will not be applied, with the reason and its position in
/// the caller's original list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedMutation {
    mutation: SingleRowMutation,
    status: Status,
    original_index: usize,
}

impl FailedMutation {
    /// Creates a failed mutation.
    pub fn new(mutation: SingleRowMutation, status: Status, original_index: usize) -> Self {
        Self {
            mutation,
            status,
            original_index,
        }
    }

    /// The mutation as submitted.
    pub fn mutation(&self) -> &SingleRowMutation {
        &self.mutation
    }

    /// The final status.
    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Position in the caller's original list.
    pub fn original_index(&self) -> usize {
        self.original_index
    }

    /// Splits into `(mutation, status, original_index)`.
    pub fn into_parts(self) -> (SingleRowMutation, Status, usize) {
        (self.mutation, self.status, self.original_index)
    }
}

/// Mutable state of one bulk apply.
///
/// Not meant to be shared: one thread owns it for the whole retry loop. The
/// expected call sequence per attempt is [`begin_attempt`], any number of
/// [`on_item_response`], then [`on_stream_end`]; [`final_failures`] is called
/// once when the loop stops.
///
/// [`begin_attempt`]: BatchState::begin_attempt
/// [`on_item_response`]: BatchState::on_item_response
/// [`on_stream_end`]: BatchState::on_stream_end
/// [`final_failures`]: BatchState::final_failures
#[derive(Debug)]
pub struct BatchState {
    current: MutateRowsRequest,
    current_annotations: Vec<Annotation>,
    pending: MutateRowsRequest,
    pending_annotations: Vec<Annotation>,
    failures: Vec<FailedMutation>,
    classifier: Arc<dyn StatusClassifier>,
    attempt_open: bool,
    last_retryable_item_status: Option<Status>,
    last_failed_call_status: Option<Status>,
}

impl BatchState {
    /// Takes ownership of `mutations` and prepares the first attempt.
    ///
    /// Entries failing [`SingleRowMutation::validate`] become
    /// `InvalidArgument` failures immediately and are never sent.
    pub fn new(
        table_name: impl Into<String>,
        app_profile_id: impl Into<String>,
        mutations: Vec<SingleRowMutation>,
        idempotency: &dyn IdempotencyClassifier,
        classifier: Arc<dyn StatusClassifier>,
    ) -> Self {
        let table_name = table_name.into();
        let app_profile_id = app_profile_id.into();

        let mut pending = MutateRowsRequest::new(table_name.clone(), app_profile_id.clone());
        pending.entries.reserve(mutations.len());
        let mut pending_annotations = Vec::with_capacity(mutations.len());
        let mut failures = Vec::new();

        for (original_index, mutation) in mutations.into_iter().enumerate() {
            if let Err(e) = mutation.validate() {
                failures.push(FailedMutation::new(
                    mutation,
                    Status::invalid_argument(e.to_string()),
                    original_index,
                ));
                continue;
            }
            let annotation = Annotation::new(original_index, idempotency.classify_row(&mutation));
            pending.entries.push(mutation);
            pending_annotations.push(annotation);
        }

        Self {
            current: MutateRowsRequest::new(table_name, app_profile_id),
            current_annotations: Vec::new(),
            pending,
            pending_annotations,
            failures,
            classifier,
            attempt_open: false,
            last_retryable_item_status: None,
            last_failed_call_status: None,
        }
    }

    /// Returns true if at least one entry awaits another attempt.
    pub fn has_pending(&self) -> bool {
        !self.pending.entries.is_empty()
    }

    /// Number of entries awaiting another attempt.
    pub fn pending_len(&self) -> usize {
        self.pending.entries.len()
    }

    /// Number of failures accumulated so far.
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// Annotations of the attempt in flight, indexed like its request.
    pub fn current_annotations(&self) -> &[Annotation] {
        &self.current_annotations
    }

    /// Annotations of the next attempt, indexed like its request.
    pub fn pending_annotations(&self) -> &[Annotation] {
        &self.pending_annotations
    }

    /// Promotes `pending` to `current` and returns the request to send.
    ///
    /// If the previous attempt was never reconciled, it is first closed as
    /// cancelled so that none of its entries are lost.
    pub fn begin_attempt(&mut self) -> &MutateRowsRequest {
        if self.attempt_open {
            warn!("attempt started before the previous stream was reconciled");
            self.on_stream_end(Status::cancelled(
                "attempt abandoned before its stream finished",
            ));
        }

        // `current` was drained by `on_stream_end`, so the swap leaves an
        // empty `pending` that keeps its capacity for the next round.
        mem::swap(&mut self.current, &mut self.pending);
        mem::swap(&mut self.current_annotations, &mut self.pending_annotations);
        self.pending.entries.clear();
        self.pending_annotations.clear();

        for annotation in &mut self.current_annotations {
            annotation.has_result = false;
        }
        self.attempt_open = true;
        self.last_retryable_item_status = None;

        debug!(entries = self.current.entries.len(), "attempt prepared");
        &self.current
    }

    /// Records one per-item outcome reported by the server.
    ///
    /// `index` is the entry's position in the request of the attempt in
    /// flight. Out-of-range and duplicate reports are logged and ignored.
    pub fn on_item_response(&mut self, index: i64, status: Status) {
        let slot = match usize::try_from(index) {
            Ok(slot) if slot < self.current_annotations.len() => slot,
            _ => {
                warn!(
                    index,
                    entries = self.current_annotations.len(),
                    "server reported a status for an out-of-range index, ignoring it"
                );
                return;
            }
        };

        let annotation = &mut self.current_annotations[slot];
        if annotation.has_result {
            warn!(
                index,
                original_index = annotation.original_index,
                "server reported a second status for the same entry, ignoring it"
            );
            return;
        }
        annotation.has_result = true;
        annotation.last_status = Some(status.clone());
        trace!(index, original_index = annotation.original_index, %status, "entry result");

        let entry = mem::take(&mut self.current.entries[slot]);
        if status.is_ok() {
            return;
        }

        let transient = self.classifier.classify(&status) == StatusClass::Transient;
        if transient && annotation.is_idempotent() {
            let annotation = annotation.clone();
            self.last_retryable_item_status = Some(status);
            self.pending.entries.push(entry);
            self.pending_annotations.push(annotation);
        } else {
            self.failures.push(FailedMutation::new(
                entry,
                status,
                annotation.original_index,
            ));
        }
    }

    /// Reconciles the entries the server never reported on, once the stream
    /// has ended with `call_status`.
    ///
    /// Returns the status that should drive the retry decision: the call
    /// status if the call failed; otherwise, when entries are left pending,
    /// the last retryable per-item status, or a synthesized `Unavailable`
    /// when the leftovers are entries the server skipped.
    pub fn on_stream_end(&mut self, call_status: Status) -> Status {
        let call_class = self.classifier.classify(&call_status);

        let mut unconfirmed = 0usize;

        // Draining keeps the buffers' capacity for the next swap.
        let drained = self
            .current
            .entries
            .drain(..)
            .zip(self.current_annotations.drain(..));
        for (entry, annotation) in drained {
            if annotation.has_result {
                continue;
            }
            if call_class == StatusClass::Transient || annotation.is_idempotent() {
                unconfirmed += 1;
                self.pending.entries.push(entry);
                self.pending_annotations.push(annotation);
            } else if call_status.is_ok() {
                error!(
                    original_index = annotation.original_index,
                    "call succeeded but the server never reported on this entry; likely a server bug"
                );
                self.failures.push(FailedMutation::new(
                    entry,
                    Status::internal(MISSING_CONFIRMATION_MESSAGE),
                    annotation.original_index,
                ));
            } else {
                self.failures.push(FailedMutation::new(
                    entry,
                    call_status.clone(),
                    annotation.original_index,
                ));
            }
        }

        self.attempt_open = false;

        debug!(
            %call_status,
            unconfirmed,
            pending = self.pending.entries.len(),
            failures = self.failures.len(),
            "attempt reconciled"
        );

        if !call_status.is_ok() {
            self.last_failed_call_status = Some(call_status.clone());
            return call_status;
        }
        if !self.has_pending() {
            return call_status;
        }
        match self.last_retryable_item_status.take() {
            Some(status) if unconfirmed == 0 => status,
            _ => Status::unavailable(format!(
                "stream ended without a status for {unconfirmed} mutations"
            )),
        }
    }

    /// Records the status that ended the retry loop outside of a stream,
    /// such as a cancellation during backoff.
    pub fn record_call_failure(&mut self, status: Status) {
        if !status.is_ok() {
            self.last_failed_call_status = Some(status);
        }
    }

    /// Consumes the state and returns every failure.
    ///
    /// Entries still pending are reported with the last failed call status;
    /// when no call ever failed, with their own last per-item status, or a
    /// synthesized "never confirmed" status if they have none. The list is in
    /// accumulation order, not sorted by original index.
    pub fn final_failures(mut self) -> Vec<FailedMutation> {
        if self.attempt_open {
            self.on_stream_end(Status::cancelled(
                "attempt abandoned before its stream finished",
            ));
        }

        let mut failures = mem::take(&mut self.failures);
        let entries = mem::take(&mut self.pending.entries);
        let annotations = mem::take(&mut self.pending_annotations);
        failures.reserve(entries.len());

        for (entry, annotation) in entries.into_iter().zip(annotations) {
            let status = match (&self.last_failed_call_status, annotation.last_status) {
                (Some(call_status), _) => call_status.clone(),
                (None, Some(item_status)) => item_status,
                (None, None) => Status::internal(NEVER_CONFIRMED_MESSAGE),
            };
            failures.push(FailedMutation::new(entry, status, annotation.original_index));
        }
        failures
    }
}
