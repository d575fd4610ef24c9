//! Command id and outbound command line types.

use crate::IdError;

// =============================================================================
// Command Id
// =============================================================================

/// Identifier correlating an outbound device command with its replies.
///
/// Ids start at 1. Devices tag unsolicited messages with id 0, which never
/// matches an in-flight command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommandId(u32);

impl CommandId {
    /// The first id a fresh pool hands out.
    pub const FIRST: Self = Self(1);

    /// Creates a command id from a raw value.
    ///
    /// Returns `None` for the reserved value 0.
    #[must_use]
    pub const fn new(id: u32) -> Option<Self> {
        if id == 0 {
            None
        } else {
            Some(Self(id))
        }
    }

    /// Returns the underlying value.
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Returns the id that follows this one.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Parses a command id from its decimal representation.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }

        let value: u32 = s
            .parse()
            .map_err(|_| IdError::InvalidNumber(s.to_string()))?;

        Self::new(value).ok_or(IdError::Reserved)
    }
}

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CommandId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<CommandId> for u32 {
    fn from(id: CommandId) -> Self {
        id.0
    }
}

impl serde::Serialize for CommandId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u32(self.0)
    }
}

impl<'de> serde::Deserialize<'de> for CommandId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let id = u32::deserialize(deserializer)?;
        Self::new(id).ok_or_else(|| serde::de::Error::custom(IdError::Reserved))
    }
}

// =============================================================================
// Command Line
// =============================================================================

/// An outbound device command as written on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// Id allocated for this command.
    pub id: CommandId,
    /// Command text, passed to the device verbatim.
    pub text: String,
}

impl CommandLine {
    /// Creates a command line.
    pub fn new(id: CommandId, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
        }
    }

    /// Parses a `{id} {text}` line. Trailing newlines are ignored.
    pub fn parse(line: &str) -> Result<Self, IdError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Err(IdError::Empty);
        }

        let Some((id, text)) = line.split_once(' ') else {
            CommandId::parse(line)?;
            return Err(IdError::MissingCommand);
        };

        let id = CommandId::parse(id)?;
        if text.trim().is_empty() {
            return Err(IdError::MissingCommand);
        }

        Ok(Self {
            id,
            text: text.to_string(),
        })
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.id, self.text)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_id_parse() {
        let id: CommandId = "42".parse().unwrap();
        assert_eq!(id.value(), 42);
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn test_command_id_zero_reserved() {
        assert!(CommandId::new(0).is_none());
        assert_eq!(CommandId::parse("0").unwrap_err(), IdError::Reserved);
    }

    #[test]
    fn test_command_id_invalid() {
        assert!(CommandId::parse("").unwrap_err().is_empty());
        assert!(matches!(
            CommandId::parse("-3").unwrap_err(),
            IdError::InvalidNumber(_)
        ));
        assert!(matches!(
            CommandId::parse("abc").unwrap_err(),
            IdError::InvalidNumber(_)
        ));
    }

    #[test]
    fn test_command_id_json() {
        let id = CommandId::new(7).unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "7");
        assert!(serde_json::from_str::<CommandId>("0").is_err());
    }

    #[test]
    fn test_command_line_format() {
        let line = CommandLine::new(CommandId::FIRST, "expose 1.5");
        assert_eq!(line.to_string(), "1 expose 1.5");
    }

    #[test]
    fn test_command_line_parse() {
        let line = CommandLine::parse("12 expose 1.5 --filename a.fits\n").unwrap();
        assert_eq!(line.id.value(), 12);
        assert_eq!(line.text, "expose 1.5 --filename a.fits");
    }

    #[test]
    fn test_command_line_missing_text() {
        assert_eq!(
            CommandLine::parse("3").unwrap_err(),
            IdError::MissingCommand
        );
        assert_eq!(
            CommandLine::parse("3   ").unwrap_err(),
            IdError::MissingCommand
        );
        assert!(matches!(
            CommandLine::parse("x status").unwrap_err(),
            IdError::InvalidNumber(_)
        ));
    }
}
