//! Error types for the bulk mutation engine.

use crate::batch::FailedMutation;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the engine.
///
/// Partial failures of a batch are never errors on their own; they are
/// reported through the failure list. `PermanentMutationFailure` exists for
/// callers that opt into treating any failure as a hard error.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Some mutations of a batch failed permanently.
    #[error("permanent failure for {} of {total} mutations", .failures.len())]
    PermanentMutationFailure {
        /// The failed mutations, with their original positions.
        failures: Vec<FailedMutation>,
        /// Size of the submitted batch.
        total: usize,
    },

    /// The mutator configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Returns the failed mutations carried by this error, if any.
    pub fn failures(&self) -> &[FailedMutation] {
        match self {
            EngineError::PermanentMutationFailure { failures, .. } => failures,
            EngineError::InvalidConfig(_) => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulkwrite_protocol::{Mutation, SingleRowMutation, Status};

    #[test]
    fn error_display() {
        let failure = FailedMutation::new(
            SingleRowMutation::new("r", vec![Mutation::delete_from_row()]),
            Status::invalid_argument("bad"),
            3,
        );
        let err = EngineError::PermanentMutationFailure {
            failures: vec![failure],
            total: 10,
        };
        assert_eq!(err.to_string(), "permanent failure for 1 of 10 mutations");
        assert_eq!(err.failures().len(), 1);

        let err = EngineError::invalid_config("table name is empty");
        assert!(err.to_string().contains("table name"));
        assert!(err.failures().is_empty());
    }
}
