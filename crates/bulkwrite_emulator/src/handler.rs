//! MutateRows request handling.

use crate::config::EmulatorConfig;
use crate::error::EmulatorError;
use crate::faults::{EntryFault, FaultInjector};
use crate::table::Table;
use bulkwrite_protocol::{EntryStatus, MutateRowsRequest, MutateRowsResponse, Status};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, trace};

/// Counters kept by the emulator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmulatorStats {
    /// Calls received.
    pub calls: u64,
    /// Entries received across all calls.
    pub entries_received: u64,
    /// Entries written to the table.
    pub entries_applied: u64,
    /// Entries that received an injected fault.
    pub faults_injected: u64,
    /// Calls whose stream was cut short.
    pub truncated_calls: u64,
    /// Calls failed before touching the table.
    pub failed_calls: u64,
}

/// The result of one call: the response messages and the final status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    /// Response messages, in delivery order.
    pub responses: Vec<MutateRowsResponse>,
    /// Final call status.
    pub status: Status,
}

impl CallOutcome {
    /// A call that failed without delivering any response.
    pub fn failed(status: Status) -> Self {
        Self {
            responses: Vec::new(),
            status,
        }
    }

    /// Number of entry statuses delivered.
    pub fn delivered(&self) -> usize {
        self.responses.iter().map(|r| r.entries.len()).sum()
    }
}

/// State shared by every call.
pub struct HandlerContext {
    /// Emulator configuration.
    pub config: EmulatorConfig,
    /// The served table.
    pub table: Arc<Table>,
    faults: Mutex<FaultInjector>,
    stats: RwLock<EmulatorStats>,
}

impl HandlerContext {
    /// Creates a context with an empty table.
    pub fn new(config: EmulatorConfig) -> Self {
        let table = Arc::new(Table::new(config.column_families.iter().cloned()));
        Self::with_table(config, table)
    }

    /// Creates a context serving an existing table.
    pub fn with_table(config: EmulatorConfig, table: Arc<Table>) -> Self {
        Self {
            faults: Mutex::new(FaultInjector::new(config.faults.clone())),
            stats: RwLock::new(EmulatorStats::default()),
            config,
            table,
        }
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> EmulatorStats {
        self.stats.read().clone()
    }
}

/// Handler for MutateRows calls.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Serves one call.
    ///
    /// Entries are applied in request order; faults decide which of them are
    /// written and which status each one reports. Statuses are then reordered,
    /// possibly truncated, and split into response messages.
    pub fn handle_mutate_rows(&self, request: &MutateRowsRequest) -> CallOutcome {
        let context = &self.context;
        {
            let mut stats = context.stats.write();
            stats.calls += 1;
            stats.entries_received += request.len() as u64;
        }

        if request.table_name != context.config.table_name {
            context.stats.write().failed_calls += 1;
            return CallOutcome::failed(
                EmulatorError::UnknownTable(request.table_name.clone()).to_status(),
            );
        }

        let mut faults = context.faults.lock();
        if let Some(status) = faults.next_call_failure() {
            debug!(%status, "failing call as scripted");
            context.stats.write().failed_calls += 1;
            return CallOutcome::failed(status);
        }

        let mut applied = 0u64;
        let mut injected = 0u64;
        let mut statuses = Vec::with_capacity(request.len());
        for (index, entry) in request.entries.iter().enumerate() {
            let fault = faults.entry_fault();
            if fault != EntryFault::None {
                injected += 1;
            }
            let status = if fault.applies() {
                match context.table.apply(entry) {
                    Ok(()) => {
                        applied += 1;
                        fault.status().unwrap_or_else(Status::ok)
                    }
                    Err(e) => e.to_status(),
                }
            } else {
                fault.status().unwrap_or_else(Status::ok)
            };
            trace!(index, ?fault, %status, "entry processed");
            statuses.push(EntryStatus::new(index as i64, status));
        }

        faults.reorder(&mut statuses);
        let mut call_status = Status::ok();
        if let Some(cut) = faults.truncation(statuses.len()) {
            debug!(
                delivered = cut,
                entries = statuses.len(),
                "truncating response stream"
            );
            statuses.truncate(cut);
            call_status = Status::unavailable("injected stream reset (RST_STREAM)");
            context.stats.write().truncated_calls += 1;
        }
        drop(faults);

        {
            let mut stats = context.stats.write();
            stats.entries_applied += applied;
            stats.faults_injected += injected;
        }

        let responses = statuses
            .chunks(context.config.max_entries_per_response.max(1))
            .map(|chunk| MutateRowsResponse::new(chunk.to_vec()))
            .collect();
        CallOutcome {
            responses,
            status: call_status,
        }
    }
}
