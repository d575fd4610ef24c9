//! Error types for command id parsing.

use thiserror::Error;

/// Errors that can occur when parsing command ids or command lines.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The input string is empty.
    #[error("command id cannot be empty")]
    Empty,

    /// The id is not a positive integer.
    #[error("invalid command id: '{0}'")]
    InvalidNumber(String),

    /// Zero is reserved for unsolicited messages and is never allocated.
    #[error("command id 0 is reserved")]
    Reserved,

    /// The command line has no text after the id.
    #[error("command line missing command text")]
    MissingCommand,
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }
}
