//! Status classification.
//!
//! The engine never inspects raw status codes itself; every retry decision
//! goes through a [`StatusClassifier`].

use bulkwrite_protocol::{Status, StatusCode};
use std::fmt;

/// Coarse classification of a status for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// Success.
    Ok,
    /// Failure expected to clear up on retry.
    Transient,
    /// Failure that retrying will not fix.
    Permanent,
}

/// Maps a status onto a [`StatusClass`].
pub trait StatusClassifier: Send + Sync + fmt::Debug {
    /// Classifies `status`.
    fn classify(&self, status: &Status) -> StatusClass;

    /// Returns true if `status` is transient.
    fn is_transient(&self, status: &Status) -> bool {
        self.classify(status) == StatusClass::Transient
    }
}

/// Classifier matching the storage service's documented retry guidance.
///
/// `Unavailable`, `DeadlineExceeded` and `Aborted` are transient. `Internal`
/// is transient only when the message reports a reset HTTP/2 stream, which
/// the service emits for connection-level hiccups.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultStatusClassifier;

const RETRYABLE_INTERNAL_MESSAGES: [&str; 3] = [
    "rst_stream",
    "rst stream",
    "received unexpected eos on data frame from server",
];

impl StatusClassifier for DefaultStatusClassifier {
    fn classify(&self, status: &Status) -> StatusClass {
        match status.code {
            StatusCode::Ok => StatusClass::Ok,
            StatusCode::Unavailable | StatusCode::DeadlineExceeded | StatusCode::Aborted => {
                StatusClass::Transient
            }
            StatusCode::Internal => {
                let message = status.message.to_ascii_lowercase();
                if RETRYABLE_INTERNAL_MESSAGES
                    .iter()
                    .any(|needle| message.contains(needle))
                {
                    StatusClass::Transient
                } else {
                    StatusClass::Permanent
                }
            }
            _ => StatusClass::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_classification() {
        let classifier = DefaultStatusClassifier;

        assert_eq!(classifier.classify(&Status::ok()), StatusClass::Ok);
        assert!(classifier.is_transient(&Status::unavailable("down")));
        assert!(classifier.is_transient(&Status::new(StatusCode::DeadlineExceeded, "")));
        assert!(classifier.is_transient(&Status::new(StatusCode::Aborted, "")));

        assert_eq!(
            classifier.classify(&Status::invalid_argument("bad")),
            StatusClass::Permanent
        );
        assert_eq!(
            classifier.classify(&Status::new(StatusCode::OutOfRange, "")),
            StatusClass::Permanent
        );
        assert_eq!(
            classifier.classify(&Status::cancelled("stop")),
            StatusClass::Permanent
        );
    }

    #[test]
    fn internal_depends_on_message() {
        let classifier = DefaultStatusClassifier;

        assert!(classifier.is_transient(&Status::internal(
            "Received RST_STREAM with error code 2"
        )));
        assert!(classifier.is_transient(&Status::internal(
            "Received unexpected EOS on DATA frame from server"
        )));
        assert!(!classifier.is_transient(&Status::internal("assertion failed")));
    }
}
