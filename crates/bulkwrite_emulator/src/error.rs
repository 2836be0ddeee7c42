//! Error types for the emulator.

use bulkwrite_protocol::{ProtocolError, Status, StatusCode};
use thiserror::Error;

/// Result type for emulator operations.
pub type EmulatorResult<T> = Result<T, EmulatorError>;

/// Errors that can occur while serving a request.
#[derive(Error, Debug)]
pub enum EmulatorError {
    /// The request names a table the emulator does not serve.
    #[error("table not found: {0}")]
    UnknownTable(String),

    /// A mutation targets a column family the table does not have.
    #[error("column family not found: {0}")]
    UnknownColumnFamily(String),

    /// Invalid request content.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid emulator configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Wire encoding or decoding failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl EmulatorError {
    /// Returns true if the client caused the error.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EmulatorError::UnknownTable(_)
                | EmulatorError::UnknownColumnFamily(_)
                | EmulatorError::InvalidRequest(_)
                | EmulatorError::Protocol(ProtocolError::InvalidMutation(_))
        )
    }

    /// Maps the error onto the status the service would report.
    pub fn to_status(&self) -> Status {
        let code = match self {
            EmulatorError::UnknownTable(_) | EmulatorError::UnknownColumnFamily(_) => {
                StatusCode::NotFound
            }
            EmulatorError::InvalidRequest(_)
            | EmulatorError::Protocol(ProtocolError::InvalidMutation(_)) => {
                StatusCode::InvalidArgument
            }
            EmulatorError::InvalidConfig(_) | EmulatorError::Protocol(_) => StatusCode::Internal,
        };
        Status::new(code, self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(EmulatorError::UnknownTable("t".into()).is_client_error());
        assert!(EmulatorError::InvalidRequest("bad".into()).is_client_error());
        assert!(!EmulatorError::Protocol(ProtocolError::Decode("eof".into())).is_client_error());
    }

    #[test]
    fn status_mapping() {
        let status = EmulatorError::UnknownColumnFamily("cf9".into()).to_status();
        assert_eq!(status.code, StatusCode::NotFound);
        assert!(status.message.contains("cf9"));

        let status = EmulatorError::Protocol(ProtocolError::invalid_mutation("empty")).to_status();
        assert_eq!(status.code, StatusCode::InvalidArgument);

        let status = EmulatorError::Protocol(ProtocolError::Decode("eof".into())).to_status();
        assert_eq!(status.code, StatusCode::Internal);
    }
}
