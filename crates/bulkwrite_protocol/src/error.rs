//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while validating or (de)serializing protocol messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A mutation failed validation before being sent.
    #[error("invalid mutation: {0}")]
    InvalidMutation(String),

    /// Encoding a message to CBOR failed.
    #[error("encode error: {0}")]
    Encode(String),

    /// Decoding a message from CBOR failed.
    #[error("decode error: {0}")]
    Decode(String),
}

impl ProtocolError {
    /// Creates an invalid mutation error.
    pub fn invalid_mutation(message: impl Into<String>) -> Self {
        Self::InvalidMutation(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::invalid_mutation("row key is empty");
        assert_eq!(err.to_string(), "invalid mutation: row key is empty");

        let err = ProtocolError::Decode("unexpected end of input".into());
        assert!(err.to_string().starts_with("decode error"));
    }
}
