//! Transport layer abstraction for the MutateRows streaming call.

use bulkwrite_protocol::{EntryStatus, MutateRowsRequest, MutateRowsResponse, Status, StatusCode};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// The response side of one streaming call.
pub trait ResponseStream {
    /// Blocks for the next response message; `None` once the stream is done.
    fn read(&mut self) -> Option<MutateRowsResponse>;

    /// Returns the final call status. Called once, after `read` returned
    /// `None` or after `cancel`.
    fn finish(&mut self) -> Status;

    /// Abandons the call. Subsequent reads return `None`.
    fn cancel(&mut self) {}
}

/// Sends MutateRows requests to the service.
///
/// This trait abstracts the network layer, allowing different implementations
/// (gRPC, an in-memory emulator, scripted mocks for testing). The request is
/// only borrowed for the duration of the call; the returned stream must not
/// keep a reference to it.
pub trait MutateRowsTransport: Send + Sync {
    /// Opens one streaming call carrying `request`.
    fn mutate_rows(&self, request: &MutateRowsRequest) -> Box<dyn ResponseStream + '_>;
}

impl<T: MutateRowsTransport + ?Sized> MutateRowsTransport for Arc<T> {
    fn mutate_rows(&self, request: &MutateRowsRequest) -> Box<dyn ResponseStream + '_> {
        (**self).mutate_rows(request)
    }
}

/// The canned outcome of one attempt against a [`MockTransport`].
#[derive(Debug, Clone)]
pub struct ScriptedAttempt {
    /// Response messages, yielded in order.
    pub responses: Vec<MutateRowsResponse>,
    /// Final call status.
    pub status: Status,
}

impl ScriptedAttempt {
    /// An attempt with no responses that finishes with `status`.
    pub fn finishing_with(status: Status) -> Self {
        Self {
            responses: Vec::new(),
            status,
        }
    }

    /// An attempt with no responses that finishes OK.
    pub fn ok() -> Self {
        Self::finishing_with(Status::ok())
    }

    /// Appends a response message carrying `entries`.
    pub fn with_response(mut self, entries: Vec<EntryStatus>) -> Self {
        self.responses.push(MutateRowsResponse::new(entries));
        self
    }

    /// Appends a response message carrying a single entry.
    pub fn with_entry(self, index: i64, status: Status) -> Self {
        self.with_response(vec![EntryStatus::new(index, status)])
    }
}

/// A mock transport for testing.
///
/// Replays scripted attempts in order and records every request it receives.
/// Once the script is used up, calls fail with `Unimplemented`.
#[derive(Debug, Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<ScriptedAttempt>>,
    requests: Mutex<Vec<MutateRowsRequest>>,
}

impl MockTransport {
    /// Creates a mock with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock replaying `attempts`.
    pub fn with_script(attempts: impl IntoIterator<Item = ScriptedAttempt>) -> Self {
        let mock = Self::new();
        mock.script.lock().extend(attempts);
        mock
    }

    /// Appends an attempt to the script.
    pub fn push_attempt(&self, attempt: ScriptedAttempt) {
        self.script.lock().push_back(attempt);
    }

    /// Requests received so far, in call order.
    pub fn requests(&self) -> Vec<MutateRowsRequest> {
        self.requests.lock().clone()
    }

    /// Number of calls made.
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Number of scripted attempts not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

impl MutateRowsTransport for MockTransport {
    fn mutate_rows(&self, request: &MutateRowsRequest) -> Box<dyn ResponseStream + '_> {
        self.requests.lock().push(request.clone());
        let attempt = self.script.lock().pop_front().unwrap_or_else(|| {
            ScriptedAttempt::finishing_with(Status::new(
                StatusCode::Unimplemented,
                "no scripted attempt left",
            ))
        });
        Box::new(MockStream {
            responses: attempt.responses.into(),
            status: attempt.status,
            cancelled: false,
        })
    }
}

struct MockStream {
    responses: VecDeque<MutateRowsResponse>,
    status: Status,
    cancelled: bool,
}

impl ResponseStream for MockStream {
    fn read(&mut self) -> Option<MutateRowsResponse> {
        if self.cancelled {
            return None;
        }
        self.responses.pop_front()
    }

    fn finish(&mut self) -> Status {
        if self.cancelled {
            return Status::cancelled("call cancelled by client");
        }
        self.status.clone()
    }

    fn cancel(&mut self) {
        self.cancelled = true;
    }
}
