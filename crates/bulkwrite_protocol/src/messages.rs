//! Protocol messages for the MutateRows streaming call.

use crate::error::{ProtocolError, ProtocolResult};
use crate::mutation::SingleRowMutation;
use crate::status::Status;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// One attempt's worth of row mutations for a single table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutateRowsRequest {
    /// Fully qualified table name.
    pub table_name: String,
    /// Routing profile; empty selects the default profile.
    pub app_profile_id: String,
    /// Entries, addressed by position in responses.
    pub entries: Vec<SingleRowMutation>,
}

impl MutateRowsRequest {
    /// Creates an empty request for `table_name`.
    pub fn new(table_name: impl Into<String>, app_profile_id: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            app_profile_id: app_profile_id.into(),
            entries: Vec::new(),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the request carries no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode_cbor(bytes)
    }
}

/// Outcome of one request entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryStatus {
    /// Position of the entry within the request that was sent.
    ///
    /// Signed on the wire; the client must treat negative or too-large values
    /// as a server protocol violation.
    pub index: i64,
    /// Outcome for that entry.
    pub status: Status,
}

impl EntryStatus {
    /// Creates an entry status.
    pub fn new(index: i64, status: Status) -> Self {
        Self { index, status }
    }
}

/// One streamed response message: a sparse, unordered set of entry outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutateRowsResponse {
    /// Entry outcomes carried by this message.
    pub entries: Vec<EntryStatus>,
}

impl MutateRowsResponse {
    /// Creates a response message.
    pub fn new(entries: Vec<EntryStatus>) -> Self {
        Self { entries }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode_cbor(bytes)
    }
}

fn encode_cbor<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(bytes)
}

fn decode_cbor<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
}
