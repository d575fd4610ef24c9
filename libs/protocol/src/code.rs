//! Message codes and device command status.

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

// =============================================================================
// Message Code
// =============================================================================

/// Single-character severity/stage tag carried by every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageCode {
    /// `>`: the command is running.
    Running,
    /// `:`: the command finished successfully.
    Done,
    /// `f`: the command failed.
    Failed,
    /// `e`: the device reported an error.
    Error,
    /// `i`: informational.
    Info,
    /// `w`: warning.
    Warning,
    /// `d`: debug.
    Debug,
    /// Any other code, passed through untouched.
    Other(char),
}

impl MessageCode {
    /// Decodes a code character.
    pub fn from_char(c: char) -> Self {
        match c {
            '>' => MessageCode::Running,
            ':' => MessageCode::Done,
            'f' => MessageCode::Failed,
            'e' => MessageCode::Error,
            'i' => MessageCode::Info,
            'w' => MessageCode::Warning,
            'd' => MessageCode::Debug,
            other => MessageCode::Other(other),
        }
    }

    /// Parses a code from a one-character string.
    pub fn parse(s: &str) -> Result<Self, ProtocolError> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(Self::from_char(c)),
            _ => Err(ProtocolError::InvalidCode(s.to_string())),
        }
    }

    /// The code character.
    pub fn as_char(&self) -> char {
        match self {
            MessageCode::Running => '>',
            MessageCode::Done => ':',
            MessageCode::Failed => 'f',
            MessageCode::Error => 'e',
            MessageCode::Info => 'i',
            MessageCode::Warning => 'w',
            MessageCode::Debug => 'd',
            MessageCode::Other(c) => *c,
        }
    }

    /// Maps a raw device code to the code shown to users.
    ///
    /// Running becomes debug and done becomes info; failures and errors are
    /// downgraded to warnings. Everything else is unchanged.
    pub fn to_external(&self) -> Self {
        match self {
            MessageCode::Running => MessageCode::Debug,
            MessageCode::Done => MessageCode::Info,
            MessageCode::Failed | MessageCode::Error => MessageCode::Warning,
            other => *other,
        }
    }
}

impl std::fmt::Display for MessageCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl Serialize for MessageCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MessageCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Command Status
// =============================================================================

/// Lifecycle of a command sent to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Written to the device, no reply yet.
    Created,
    /// The device acknowledged it is running the command.
    Running,
    /// Finished successfully.
    Done,
    /// Finished with a failure or error, or abandoned.
    Failed,
}

impl CommandStatus {
    /// The status a raw device code moves a command to, if any.
    pub fn from_code(code: MessageCode) -> Option<Self> {
        match code {
            MessageCode::Running => Some(CommandStatus::Running),
            MessageCode::Done => Some(CommandStatus::Done),
            MessageCode::Failed | MessageCode::Error => Some(CommandStatus::Failed),
            _ => None,
        }
    }

    /// Returns true once no further replies are expected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandStatus::Done | CommandStatus::Failed)
    }

    /// Returns true if the command failed.
    pub fn did_fail(&self) -> bool {
        matches!(self, CommandStatus::Failed)
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CommandStatus::Created => "created",
            CommandStatus::Running => "running",
            CommandStatus::Done => "done",
            CommandStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}
