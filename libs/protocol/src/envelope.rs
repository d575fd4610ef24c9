//! Reply envelopes: decoded device replies and replies emitted to users.

use std::collections::BTreeMap;

use convoy_id::CommandId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{MessageCode, ProtocolError};

/// Keyword name to list of values.
pub type Keywords = BTreeMap<String, Vec<Value>>;

// =============================================================================
// Device Reply
// =============================================================================

/// Header identifying who sent a reply and which command it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReplyHeader {
    /// Name of the device process.
    pub sender: String,
    /// Command the reply belongs to; 0 for unsolicited messages.
    #[serde(default)]
    pub command_id: u32,
    /// Raw message code.
    pub message_code: MessageCode,
}

#[derive(Debug, Deserialize)]
struct RawReply {
    #[serde(default)]
    header: Option<Map<String, Value>>,
    #[serde(default)]
    data: Option<Map<String, Value>>,
}

/// A decoded reply line from a device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReply {
    pub header: ReplyHeader,
    /// Keyword data, normalized by [`normalize_data`].
    pub keywords: Keywords,
}

impl DeviceReply {
    /// Decodes one line of device output.
    ///
    /// Returns `Ok(None)` for objects without a header or with an empty one;
    /// those carry nothing to route.
    pub fn parse(line: &str) -> Result<Option<Self>, ProtocolError> {
        let raw: RawReply = serde_json::from_str(line.trim())?;

        let header = match raw.header {
            Some(header) if !header.is_empty() => header,
            _ => return Ok(None),
        };

        let header: ReplyHeader = serde_json::from_value(Value::Object(header))
            .map_err(|e| ProtocolError::InvalidHeader(e.to_string()))?;

        let keywords = normalize_data(&header.sender, raw.data.unwrap_or_default());

        Ok(Some(Self { header, keywords }))
    }

    /// The command this reply answers, or `None` for unsolicited messages.
    pub fn command_id(&self) -> Option<CommandId> {
        CommandId::new(self.header.command_id)
    }

    /// Raw message code as sent by the device.
    pub fn raw_code(&self) -> MessageCode {
        self.header.message_code
    }

    /// Message code to show users.
    pub fn external_code(&self) -> MessageCode {
        self.header.message_code.to_external()
    }
}

/// Turns device keyword data into [`Keywords`].
///
/// Scalars become one-element lists and every list is prefixed with the
/// sender, so each value reported upstream carries its origin.
pub fn normalize_data(sender: &str, data: Map<String, Value>) -> Keywords {
    data.into_iter()
        .map(|(key, value)| {
            let mut values = vec![Value::String(sender.to_string())];
            match value {
                Value::Array(items) => values.extend(items),
                scalar => values.push(scalar),
            }
            (key, values)
        })
        .collect()
}

// =============================================================================
// Reply
// =============================================================================

/// A reply emitted to users through a [`crate::Reporter`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub code: MessageCode,
    pub keywords: Keywords,
    /// Fleet-wide message not tied to a user command.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub broadcast: bool,
}

impl Reply {
    /// Creates a reply with keyword data.
    pub fn new(code: MessageCode, keywords: Keywords) -> Self {
        Self {
            code,
            keywords,
            broadcast: false,
        }
    }

    /// Creates a reply carrying a single `text` keyword.
    pub fn text(code: MessageCode, text: impl Into<String>) -> Self {
        Self::keyword(code, "text", vec![Value::String(text.into())])
    }

    /// Creates a reply carrying a single keyword.
    pub fn keyword(code: MessageCode, key: impl Into<String>, values: Vec<Value>) -> Self {
        let mut keywords = Keywords::new();
        keywords.insert(key.into(), values);
        Self::new(code, keywords)
    }

    /// Marks the reply as a broadcast.
    pub fn into_broadcast(mut self) -> Self {
        self.broadcast = true;
        self
    }

    /// Values of one keyword, if present.
    pub fn get(&self, key: &str) -> Option<&[Value]> {
        self.keywords.get(key).map(Vec::as_slice)
    }

    /// The `text` keyword as a string, if present.
    pub fn text_value(&self) -> Option<&str> {
        self.get("text")
            .and_then(|values| values.first())
            .and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_reply() {
        let line = r#"{"header": {"sender": "gfa1", "command_id": 3, "message_code": ":"}, "data": {"exposure_time": 1.5, "status": ["idle", "cooling"]}}"#;

        let reply = DeviceReply::parse(line).unwrap().unwrap();
        assert_eq!(reply.header.sender, "gfa1");
        assert_eq!(reply.command_id(), CommandId::new(3));
        assert_eq!(reply.raw_code(), MessageCode::Done);
        assert_eq!(reply.external_code(), MessageCode::Info);
        assert_eq!(
            reply.keywords["exposure_time"],
            vec![json!("gfa1"), json!(1.5)]
        );
        assert_eq!(
            reply.keywords["status"],
            vec![json!("gfa1"), json!("idle"), json!("cooling")]
        );
    }

    #[test]
    fn test_parse_headerless_is_ignored() {
        assert!(DeviceReply::parse(r#"{"data": {"a": 1}}"#).unwrap().is_none());
        assert!(DeviceReply::parse(r#"{"header": {}, "data": {"a": 1}}"#)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            DeviceReply::parse("not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            DeviceReply::parse(r#"{"header": {"command_id": 1}}"#),
            Err(ProtocolError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_unsolicited_reply_has_no_command() {
        let line = r#"{"header": {"sender": "gfa2", "command_id": 0, "message_code": "i"}, "data": {"temperature": -10}}"#;
        let reply = DeviceReply::parse(line).unwrap().unwrap();
        assert!(reply.command_id().is_none());
    }

    #[test]
    fn test_missing_data_is_empty() {
        let line = r#"{"header": {"sender": "gfa1", "command_id": 2, "message_code": ">"}}"#;
        let reply = DeviceReply::parse(line).unwrap().unwrap();
        assert!(reply.keywords.is_empty());
    }

    #[test]
    fn test_reply_serialization() {
        let reply = Reply::text(MessageCode::Warning, "gfa1: container not running");
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["code"], "w");
        assert_eq!(json["keywords"]["text"][0], "gfa1: container not running");
        assert!(json.get("broadcast").is_none());

        let json = serde_json::to_value(reply.into_broadcast()).unwrap();
        assert_eq!(json["broadcast"], true);
    }
}
