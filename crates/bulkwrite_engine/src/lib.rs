//! # Bulkwrite Engine
//!
//! Client-side retry engine for bulk row mutations.
//!
//! This crate provides:
//! - Idempotency classification of row mutations
//! - Per-batch bookkeeping of pending entries and accumulated failures
//! - Retry and exponential backoff policies
//! - A blocking driver running batches against a streaming transport
//! - A scripted mock transport for tests
//!
//! ## Architecture
//!
//! A batch is sent as one streaming `MutateRows` call. The server reports a
//! status per entry, possibly over several messages and in any order. After
//! each attempt, entries that failed transiently and are safe to replay are
//! sent again; everything else is final. A replay of a cell stamped with the
//! server's clock would write a second version, so such entries are never
//! retried under the default idempotency mode.
//!
//! ## Key Invariants
//!
//! - Every submitted mutation ends up either confirmed or in the failure list,
//!   exactly once
//! - Failures carry the position of the mutation in the submitted batch
//! - Non-idempotent entries are sent at most once
//! - Attempts are bounded by the retry policy

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod cancel;
mod config;
mod driver;
mod error;
mod idempotency;
mod policy;
mod status;
mod transport;

pub use batch::{
    Annotation, BatchState, FailedMutation, MISSING_CONFIRMATION_MESSAGE, NEVER_CONFIRMED_MESSAGE,
};
pub use cancel::CancellationToken;
pub use config::{BackoffConfig, IdempotencyMode, MutatorConfig, RetryConfig};
pub use driver::{BulkMutator, DriverState, MutatorStats};
pub use error::{EngineError, EngineResult};
pub use idempotency::{AlwaysRetryClassifier, Idempotency, IdempotencyClassifier, SafeClassifier};
pub use policy::{
    BackoffPolicy, ExponentialBackoffPolicy, LimitedErrorCountRetryPolicy, LimitedTimeRetryPolicy,
    RetryPolicy,
};
pub use status::{DefaultStatusClassifier, StatusClass, StatusClassifier};
pub use transport::{MockTransport, MutateRowsTransport, ResponseStream, ScriptedAttempt};

/// Version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
