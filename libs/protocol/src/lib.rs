//! # convoy-protocol
//!
//! Wire types for the device line protocol and the reply reporting interface.
//!
//! ## Device Protocol
//!
//! The supervisor writes one command per line, `{id} {text}`. The device answers
//! with newline-delimited JSON objects:
//!
//! ```text
//! {"header": {"sender": "gfa1", "command_id": 3, "message_code": ">"}, "data": {}}
//! {"header": {"sender": "gfa1", "command_id": 3, "message_code": ":"}, "data": {"exposure_time": 1.5}}
//! ```
//!
//! A `command_id` that matches no in-flight command (devices use 0) marks an
//! unsolicited message, which is republished fleet-wide.
//!
//! ## Message Codes
//!
//! Devices use the raw codes `>` (running), `:` (done), `f` (failed) and `e`
//! (error) to drive command status. Before replies reach users those codes are
//! downgraded ([`MessageCode::to_external`]) so a single device fault does not
//! fail a command that spans many nodes.
//!
//! ## Reporting
//!
//! Everything user facing goes through a [`Reporter`]; [`NullReporter`] drops
//! replies when nobody is listening.

mod code;
mod envelope;
mod error;
mod reporter;

pub use code::{CommandStatus, MessageCode};
pub use envelope::{normalize_data, DeviceReply, Keywords, Reply, ReplyHeader};
pub use error::ProtocolError;
pub use reporter::{NullReporter, Reporter};
