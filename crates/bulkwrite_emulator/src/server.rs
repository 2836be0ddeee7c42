//! The emulator front end.

use crate::config::EmulatorConfig;
use crate::error::{EmulatorError, EmulatorResult};
use crate::handler::{CallOutcome, EmulatorStats, HandlerContext, RequestHandler};
use crate::table::Table;
use bulkwrite_engine::{MutateRowsTransport, ResponseStream};
use bulkwrite_protocol::{MutateRowsRequest, MutateRowsResponse, Status};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::error;

/// Encoded frames of one call plus its final status.
#[derive(Debug, Clone)]
pub struct EncodedOutcome {
    /// CBOR-encoded `MutateRowsResponse` messages, in delivery order.
    pub frames: Vec<Vec<u8>>,
    /// Final call status.
    pub status: Status,
}

/// An in-memory MutateRows service.
///
/// Requests and responses cross a CBOR encoding boundary, as they would on
/// the wire, so the engine never shares memory with the server side.
///
/// # Example
///
/// ```
/// use bulkwrite_emulator::{Emulator, EmulatorConfig};
/// use bulkwrite_engine::{BulkMutator, MutatorConfig};
/// use bulkwrite_protocol::{Mutation, SingleRowMutation};
///
/// let emulator = Emulator::new(EmulatorConfig::new("t")).unwrap();
/// let mutator = BulkMutator::new(MutatorConfig::new("t"), emulator).unwrap();
///
/// let failures = mutator.apply(vec![SingleRowMutation::new(
///     "row",
///     vec![Mutation::set_cell("cf", "q", 1_000, "v")],
/// )]);
/// assert!(failures.is_empty());
/// assert_eq!(mutator.transport().table().row_count(), 1);
/// ```
pub struct Emulator {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl Emulator {
    /// Creates an emulator with an empty table.
    pub fn new(config: EmulatorConfig) -> EmulatorResult<Self> {
        config.validate()?;
        Ok(Self::from_context(Arc::new(HandlerContext::new(config))))
    }

    /// Creates an emulator serving an existing table.
    pub fn with_table(config: EmulatorConfig, table: Arc<Table>) -> EmulatorResult<Self> {
        config.validate()?;
        Ok(Self::from_context(Arc::new(HandlerContext::with_table(
            config, table,
        ))))
    }

    fn from_context(context: Arc<HandlerContext>) -> Self {
        let handler = RequestHandler::new(Arc::clone(&context));
        Self { handler, context }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EmulatorConfig {
        &self.context.config
    }

    /// Returns the served table.
    pub fn table(&self) -> &Arc<Table> {
        &self.context.table
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> EmulatorStats {
        self.context.stats()
    }

    /// Serves one decoded call.
    pub fn handle_mutate_rows(&self, request: &MutateRowsRequest) -> CallOutcome {
        self.handler.handle_mutate_rows(request)
    }

    /// Serves one encoded call.
    pub fn handle_encoded(&self, request: &[u8]) -> EncodedOutcome {
        let request = match MutateRowsRequest::decode(request) {
            Ok(request) => request,
            Err(e) => {
                return EncodedOutcome {
                    frames: Vec::new(),
                    status: EmulatorError::InvalidRequest(e.to_string()).to_status(),
                }
            }
        };

        let outcome = self.handle_mutate_rows(&request);
        let mut frames = Vec::with_capacity(outcome.responses.len());
        for response in &outcome.responses {
            match response.encode() {
                Ok(frame) => frames.push(frame),
                Err(e) => {
                    error!(error = %e, "failed to encode response");
                    return EncodedOutcome {
                        frames,
                        status: EmulatorError::from(e).to_status(),
                    };
                }
            }
        }
        EncodedOutcome {
            frames,
            status: outcome.status,
        }
    }
}

impl MutateRowsTransport for Emulator {
    fn mutate_rows(&self, request: &MutateRowsRequest) -> Box<dyn ResponseStream + '_> {
        let outcome = match request.encode() {
            Ok(bytes) => self.handle_encoded(&bytes),
            Err(e) => EncodedOutcome {
                frames: Vec::new(),
                status: EmulatorError::from(e).to_status(),
            },
        };
        Box::new(WireStream {
            frames: outcome.frames.into(),
            status: outcome.status,
            cancelled: false,
        })
    }
}

/// Client side of an emulated call: decodes one frame per read.
struct WireStream {
    frames: VecDeque<Vec<u8>>,
    status: Status,
    cancelled: bool,
}

impl ResponseStream for WireStream {
    fn read(&mut self) -> Option<MutateRowsResponse> {
        if self.cancelled {
            return None;
        }
        let frame = self.frames.pop_front()?;
        match MutateRowsResponse::decode(&frame) {
            Ok(response) => Some(response),
            Err(e) => {
                error!(error = %e, "dropping undecodable response frame");
                self.frames.clear();
                self.status = Status::internal(format!("undecodable response: {e}"));
                None
            }
        }
    }

    fn finish(&mut self) -> Status {
        if self.cancelled {
            return Status::cancelled("call cancelled by client");
        }
        self.status.clone()
    }

    fn cancel(&mut self) {
        self.cancelled = true;
        self.frames.clear();
    }
}
