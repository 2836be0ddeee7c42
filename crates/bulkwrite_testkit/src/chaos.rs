//! A plan-driven transport that misbehaves on purpose.
//!
//! Each call consumes one [`AttemptPlan`]. The plan assigns an outcome to
//! every request entry (cycling through its outcome list), may reverse the
//! delivery order and sets the final call status. Once the plans run out,
//! calls confirm everything, so any retry loop eventually ends.

use bulkwrite_engine::{MutateRowsTransport, ResponseStream};
use bulkwrite_protocol::{EntryStatus, MutateRowsRequest, MutateRowsResponse, Status, StatusCode};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Outcome of one entry within a planned attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Confirmed.
    Ok,
    /// Rejected with `Unavailable`.
    Transient,
    /// Rejected with `FailedPrecondition`.
    Permanent,
    /// Never reported.
    Omitted,
}

impl ItemOutcome {
    /// The status reported for this outcome, if any.
    pub fn status(&self) -> Option<Status> {
        match self {
            ItemOutcome::Ok => Some(Status::ok()),
            ItemOutcome::Transient => Some(Status::unavailable("planned transient failure")),
            ItemOutcome::Permanent => Some(Status::new(
                StatusCode::FailedPrecondition,
                "planned permanent failure",
            )),
            ItemOutcome::Omitted => None,
        }
    }
}

/// The behavior of one call.
#[derive(Debug, Clone)]
pub struct AttemptPlan {
    /// Outcomes, applied to entry `i` as `outcomes[i % outcomes.len()]`.
    pub outcomes: Vec<ItemOutcome>,
    /// Final call status.
    pub call_status: Status,
    /// Deliver entry statuses in reverse order.
    pub reverse: bool,
}

impl AttemptPlan {
    /// Confirms every entry.
    pub fn all_ok() -> Self {
        Self {
            outcomes: vec![ItemOutcome::Ok],
            call_status: Status::ok(),
            reverse: false,
        }
    }

    /// The outcome for entry `index`.
    pub fn outcome_for(&self, index: usize) -> ItemOutcome {
        if self.outcomes.is_empty() {
            ItemOutcome::Ok
        } else {
            self.outcomes[index % self.outcomes.len()]
        }
    }
}

/// What a call received and what it reported.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// The request as received.
    pub request: MutateRowsRequest,
    /// Entry statuses, in delivery order.
    pub reported: Vec<EntryStatus>,
    /// Final call status.
    pub status: Status,
}

impl RecordedCall {
    /// Row keys of the entries reported with `Ok`.
    pub fn confirmed_keys(&self) -> Vec<bytes::Bytes> {
        self.reported
            .iter()
            .filter(|e| e.status.is_ok())
            .filter_map(|e| usize::try_from(e.index).ok())
            .filter_map(|i| self.request.entries.get(i))
            .map(|entry| entry.row_key.clone())
            .collect()
    }
}

/// Transport replaying [`AttemptPlan`]s.
#[derive(Debug, Default)]
pub struct ChaosTransport {
    plans: Mutex<VecDeque<AttemptPlan>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ChaosTransport {
    /// Creates a transport replaying `plans`.
    pub fn new(plans: impl IntoIterator<Item = AttemptPlan>) -> Self {
        Self {
            plans: Mutex::new(plans.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Calls made so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Number of calls made.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl MutateRowsTransport for ChaosTransport {
    fn mutate_rows(&self, request: &MutateRowsRequest) -> Box<dyn ResponseStream + '_> {
        let plan = self
            .plans
            .lock()
            .pop_front()
            .unwrap_or_else(AttemptPlan::all_ok);

        let mut reported: Vec<EntryStatus> = (0..request.len())
            .filter_map(|i| {
                plan.outcome_for(i)
                    .status()
                    .map(|status| EntryStatus::new(i as i64, status))
            })
            .collect();
        if plan.reverse {
            reported.reverse();
        }

        self.calls.lock().push(RecordedCall {
            request: request.clone(),
            reported: reported.clone(),
            status: plan.call_status.clone(),
        });

        Box::new(PlannedStream {
            responses: reported
                .into_iter()
                .map(|entry| MutateRowsResponse::new(vec![entry]))
                .collect(),
            status: plan.call_status,
        })
    }
}

struct PlannedStream {
    responses: VecDeque<MutateRowsResponse>,
    status: Status,
}

impl ResponseStream for PlannedStream {
    fn read(&mut self) -> Option<MutateRowsResponse> {
        self.responses.pop_front()
    }

    fn finish(&mut self) -> Status {
        self.status.clone()
    }

    fn cancel(&mut self) {
        self.responses.clear();
        self.status = Status::cancelled("call cancelled by client");
    }
}
