//! Error types for the device protocol.

use thiserror::Error;

/// Errors that can occur when decoding device replies.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The line is not a JSON object.
    #[error("malformed reply: {0}")]
    Malformed(String),

    /// The header is present but lacks required fields.
    #[error("invalid reply header: {0}")]
    InvalidHeader(String),

    /// The message code is not a single character.
    #[error("invalid message code: '{0}'")]
    InvalidCode(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Malformed(err.to_string())
    }
}
