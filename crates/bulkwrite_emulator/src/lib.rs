//! # Bulkwrite Emulator
//!
//! In-memory MutateRows service for exercising the bulkwrite engine.
//!
//! This crate provides:
//! - An in-memory table with versioned cells and server-assigned timestamps
//! - A MutateRows handler that streams per-entry statuses
//! - Seeded fault injection (transient and permanent rejections, lost
//!   acknowledgements, truncated streams, scripted call failures, shuffled
//!   and chunked delivery)
//! - A `MutateRowsTransport` implementation that crosses a CBOR boundary
//!
//! # Architecture
//!
//! The emulator serves a single table. Each call is handled synchronously:
//! entries are applied in request order, statuses are collected, then faults
//! reorder, truncate and chunk them before they are encoded into frames. The
//! client side decodes one frame per `read`.
//!
//! Server-assigned timestamps are strictly increasing, so replaying a write
//! that uses them leaves a second cell version behind. That makes lost
//! acknowledgements observable.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod faults;
mod handler;
mod server;
mod table;

pub use config::{EmulatorConfig, FaultConfig};
pub use error::{EmulatorError, EmulatorResult};
pub use faults::{EntryFault, FaultInjector};
pub use handler::{CallOutcome, EmulatorStats, HandlerContext, RequestHandler};
pub use server::{EncodedOutcome, Emulator};
pub use table::{Cell, Row, Table};
