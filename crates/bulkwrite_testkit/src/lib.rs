//! # Bulkwrite Testkit
//!
//! Test utilities for the bulkwrite engine.
//!
//! This crate provides:
//! - Fixtures for rows, batches, mutators and emulators
//! - Property-based test generators using proptest
//! - A plan-driven transport that injects per-entry failures, omissions,
//!   reordering and failed calls
//!
//! ## Usage
//!
//! ```rust
//! use bulkwrite_testkit::prelude::*;
//!
//! let transport = ChaosTransport::new([AttemptPlan {
//!     outcomes: vec![ItemOutcome::Transient, ItemOutcome::Ok],
//!     call_status: bulkwrite_protocol::Status::ok(),
//!     reverse: false,
//! }]);
//! let mutator = test_mutator(transport, 5);
//! assert!(mutator.apply(mixed_batch(4, 0)).is_empty());
//! assert_eq!(mutator.transport().call_count(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod chaos;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::chaos::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use chaos::*;
pub use fixtures::*;
pub use generators::*;
