//! Idempotency classification of row mutations.

use bulkwrite_protocol::{Mutation, SingleRowMutation};
use std::fmt;

/// Whether replaying a row mutation is safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idempotency {
    /// Replaying cannot change the outcome beyond a single execution.
    Idempotent,
    /// Replaying may duplicate side effects.
    NonIdempotent,
}

/// Decides, per sub-operation, whether replaying it is safe.
///
/// Implementations must be pure. Each batch works on its own copy obtained
/// through [`IdempotencyClassifier::clone_box`].
pub trait IdempotencyClassifier: Send + Sync + fmt::Debug {
    /// Returns true if `mutation` may be executed more than once.
    fn is_idempotent(&self, mutation: &Mutation) -> bool;

    /// Returns an independent copy of this classifier.
    fn clone_box(&self) -> Box<dyn IdempotencyClassifier>;

    /// Classifies a whole row: idempotent only if every sub-operation is.
    ///
    /// An empty operation list is vacuously idempotent.
    fn classify_row(&self, row: &SingleRowMutation) -> Idempotency {
        if row.mutations.iter().all(|m| self.is_idempotent(m)) {
            Idempotency::Idempotent
        } else {
            Idempotency::NonIdempotent
        }
    }
}

impl Clone for Box<dyn IdempotencyClassifier> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Treats everything as idempotent except cells stamped by the server.
///
/// A `SetCell` with the server-assigned timestamp writes a new version on
/// every replay.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafeClassifier;

impl IdempotencyClassifier for SafeClassifier {
    fn is_idempotent(&self, mutation: &Mutation) -> bool {
        !mutation.uses_server_timestamp()
    }

    fn clone_box(&self) -> Box<dyn IdempotencyClassifier> {
        Box::new(*self)
    }
}

/// Treats every operation as idempotent; the caller accepts duplicates.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetryClassifier;

impl IdempotencyClassifier for AlwaysRetryClassifier {
    fn is_idempotent(&self, _mutation: &Mutation) -> bool {
        true
    }

    fn clone_box(&self) -> Box<dyn IdempotencyClassifier> {
        Box::new(*self)
    }
}
