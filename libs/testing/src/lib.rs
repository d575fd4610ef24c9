//! # convoy-testing
//!
//! Test doubles shared across convoy crates.
//!
//! - [`RecordingReporter`]: captures every reply for later assertions
//! - [`device_reply`]: builds a device reply line as a device would send it

use std::sync::Mutex;

use convoy_protocol::{MessageCode, Reply, Reporter};
use serde_json::{json, Value};

/// Reporter that keeps every reply in memory.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    replies: Mutex<Vec<Reply>>,
}

impl RecordingReporter {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything reported so far.
    pub fn replies(&self) -> Vec<Reply> {
        self.replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replies with the given code.
    pub fn with_code(&self, code: MessageCode) -> Vec<Reply> {
        self.replies()
            .into_iter()
            .filter(|reply| reply.code == code)
            .collect()
    }

    /// Text of every warning.
    pub fn warnings(&self) -> Vec<String> {
        self.texts(MessageCode::Warning)
    }

    /// Text of every reply with the given code.
    pub fn texts(&self, code: MessageCode) -> Vec<String> {
        self.with_code(code)
            .iter()
            .filter_map(|reply| reply.text_value().map(str::to_string))
            .collect()
    }

    /// Returns true if any warning mentions `needle`.
    pub fn has_warning_containing(&self, needle: &str) -> bool {
        self.warnings().iter().any(|text| text.contains(needle))
    }

    /// All values reported under a keyword, one entry per reply.
    ///
    /// Named apart from [`Reporter::keyword`] so calls through `Arc` resolve.
    pub fn keyword_values(&self, key: &str) -> Vec<Vec<Value>> {
        self.replies()
            .iter()
            .filter_map(|reply| reply.get(key).map(<[Value]>::to_vec))
            .collect()
    }

    /// Broadcast replies only.
    pub fn broadcasts(&self) -> Vec<Reply> {
        self.replies()
            .into_iter()
            .filter(|reply| reply.broadcast)
            .collect()
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, reply: Reply) {
        self.replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(reply);
    }
}

/// Builds one JSON reply line as a device would write it (without newline).
pub fn device_reply(sender: &str, command_id: u32, code: char, data: Value) -> String {
    json!({
        "header": {
            "sender": sender,
            "command_id": command_id,
            "message_code": code.to_string(),
        },
        "data": data,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_reporter_filters() {
        let reporter = RecordingReporter::new();
        reporter.warning("gfa1: container is not running");
        reporter.info("done");
        reporter.report(Reply::text(MessageCode::Info, "pushed").into_broadcast());

        assert_eq!(reporter.replies().len(), 3);
        assert_eq!(reporter.warnings(), vec!["gfa1: container is not running"]);
        assert!(reporter.has_warning_containing("gfa1"));
        assert_eq!(reporter.broadcasts().len(), 1);

        reporter.keyword(MessageCode::Info, "filename", vec![json!("gfa1"), json!("a.fits")]);
        assert_eq!(
            reporter.keyword_values("filename"),
            vec![vec![json!("gfa1"), json!("a.fits")]]
        );

        reporter.clear();
        assert!(reporter.replies().is_empty());
    }

    #[test]
    fn test_device_reply_line() {
        let line = device_reply("gfa1", 4, ':', json!({"filename": "a.fits"}));
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["header"]["command_id"], 4);
        assert_eq!(parsed["header"]["message_code"], ":");
    }
}
