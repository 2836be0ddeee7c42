//! Row mutations.

use crate::error::{ProtocolError, ProtocolResult};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Timestamp sentinel asking the server to assign the cell timestamp.
///
/// Replaying a `SetCell` carrying this value writes a second cell with a
/// newer timestamp, so such writes are not idempotent.
pub const SERVER_SET_TIMESTAMP: i64 = -1;

/// Half-open timestamp range `[start_micros, end_micros)`; `0` as the end
/// means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampRange {
    /// Inclusive start, in microseconds.
    pub start_micros: i64,
    /// Exclusive end, in microseconds; `0` for unbounded.
    pub end_micros: i64,
}

impl TimestampRange {
    /// Returns true if `timestamp` falls inside the range.
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start_micros && (self.end_micros == 0 || timestamp < self.end_micros)
    }
}

/// A single sub-operation applied to one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    /// Writes a cell value.
    SetCell {
        /// Column family name.
        family: String,
        /// Column qualifier.
        column: Bytes,
        /// Cell timestamp in microseconds, or [`SERVER_SET_TIMESTAMP`].
        timestamp_micros: i64,
        /// Cell value.
        value: Bytes,
    },
    /// Deletes the cells of one column within a timestamp range.
    DeleteFromColumn {
        /// Column family name.
        family: String,
        /// Column qualifier.
        column: Bytes,
        /// Timestamp range to delete.
        range: TimestampRange,
    },
    /// Deletes every cell in a column family.
    DeleteFromFamily {
        /// Column family name.
        family: String,
    },
    /// Deletes the whole row.
    DeleteFromRow,
}

impl Mutation {
    /// Creates a `SetCell` with an explicit timestamp.
    pub fn set_cell(
        family: impl Into<String>,
        column: impl Into<Bytes>,
        timestamp_micros: i64,
        value: impl Into<Bytes>,
    ) -> Self {
        Mutation::SetCell {
            family: family.into(),
            column: column.into(),
            timestamp_micros,
            value: value.into(),
        }
    }

    /// Creates a `SetCell` whose timestamp is assigned by the server.
    pub fn set_cell_server_time(
        family: impl Into<String>,
        column: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Self {
        Self::set_cell(family, column, SERVER_SET_TIMESTAMP, value)
    }

    /// Creates a `DeleteFromColumn` over `range`.
    pub fn delete_from_column(
        family: impl Into<String>,
        column: impl Into<Bytes>,
        range: TimestampRange,
    ) -> Self {
        Mutation::DeleteFromColumn {
            family: family.into(),
            column: column.into(),
            range,
        }
    }

    /// Creates a `DeleteFromFamily`.
    pub fn delete_from_family(family: impl Into<String>) -> Self {
        Mutation::DeleteFromFamily {
            family: family.into(),
        }
    }

    /// Creates a `DeleteFromRow`.
    pub fn delete_from_row() -> Self {
        Mutation::DeleteFromRow
    }

    /// Returns the column family this operation targets, if any.
    pub fn family(&self) -> Option<&str> {
        match self {
            Mutation::SetCell { family, .. }
            | Mutation::DeleteFromColumn { family, .. }
            | Mutation::DeleteFromFamily { family } => Some(family),
            Mutation::DeleteFromRow => None,
        }
    }

    /// Returns true for a `SetCell` using the server-assigned timestamp.
    pub fn uses_server_timestamp(&self) -> bool {
        matches!(
            self,
            Mutation::SetCell {
                timestamp_micros: SERVER_SET_TIMESTAMP,
                ..
            }
        )
    }
}

/// All sub-operations targeting one row, retried as a unit.
///
/// `Default` yields an empty placeholder; the engine uses it to move an entry
/// out of a request without shifting the positions of its neighbours.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleRowMutation {
    /// Target row key.
    pub row_key: Bytes,
    /// Sub-operations, applied in order.
    pub mutations: Vec<Mutation>,
}

impl SingleRowMutation {
    /// Creates a row mutation.
    pub fn new(row_key: impl Into<Bytes>, mutations: Vec<Mutation>) -> Self {
        Self {
            row_key: row_key.into(),
            mutations,
        }
    }

    /// Checks that the mutation can be submitted.
    ///
    /// Rejects an empty row key and an empty operation list.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.row_key.is_empty() {
            return Err(ProtocolError::invalid_mutation("row key is empty"));
        }
        if self.mutations.is_empty() {
            return Err(ProtocolError::invalid_mutation(format!(
                "row {:?} has no operations",
                self.row_key
            )));
        }
        Ok(())
    }
}
