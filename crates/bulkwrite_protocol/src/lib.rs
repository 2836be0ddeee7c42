//! # bulkwrite Protocol
//!
//! MutateRows message types and CBOR codecs for bulkwrite.
//!
//! This crate provides:
//! - `Mutation` and `SingleRowMutation` for row-level writes
//! - `Status` and `StatusCode` for per-item and call-level outcomes
//! - Protocol messages (`MutateRowsRequest`, `MutateRowsResponse`)
//! - CBOR encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod messages;
mod mutation;
mod status;

pub use error::{ProtocolError, ProtocolResult};
pub use messages::{EntryStatus, MutateRowsRequest, MutateRowsResponse};
pub use mutation::{Mutation, SingleRowMutation, TimestampRange, SERVER_SET_TIMESTAMP};
pub use status::{Status, StatusCode};
