//! Device sessions.
//!
//! A [`DeviceSession`] is the persistent line channel to the device process
//! running in a node's container. Commands go out as `"<id> <text>"`; replies
//! come back as JSON lines and are routed by `command_id` to the sink of the
//! command that produced them. Replies for unknown ids are republished on the
//! fleet-wide broadcast reporter.
//!
//! ```text
//! CREATED ──'>'──► RUNNING ──':'──► DONE
//!    │                 │
//!    └──────'f'/'e'────┴──────────► FAILED   (also on teardown/abandon)
//! ```
//!
//! Each session owns its [`IdPool`]; ids are released on a terminal reply,
//! on [`DeviceSession::abandon`] and when the session is torn down.

mod connector;
pub mod mock;

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use convoy_id::{CommandId, CommandLine, IdPool};
use convoy_protocol::{CommandStatus, DeviceReply, Keywords, MessageCode, Reply, Reporter};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use connector::{DeviceConnector, DeviceStream, TcpConnector};
pub use mock::{Script, ScriptedConnector};

use crate::context::FleetContext;

// =============================================================================
// Errors
// =============================================================================

/// Errors from device sessions.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device on node {node} is not connected")]
    NotConnected { node: String },

    #[error("cannot connect to device on node {node} at {address}: {source}")]
    Connect {
        node: String,
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out connecting to device on node {node} at {address}")]
    ConnectTimeout { node: String, address: String },

    #[error("device channel on node {node} failed: {source}")]
    Transport {
        node: String,
        #[source]
        source: io::Error,
    },
}

impl DeviceError {
    pub fn node(&self) -> &str {
        match self {
            DeviceError::NotConnected { node }
            | DeviceError::Connect { node, .. }
            | DeviceError::ConnectTimeout { node, .. }
            | DeviceError::Transport { node, .. } => node,
        }
    }
}

/// Errors a peer produces by hanging up first.
fn is_benign_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected
    )
}

// =============================================================================
// Shared state
// =============================================================================

struct PendingEntry {
    text: String,
    sink: Arc<dyn Reporter>,
    status: watch::Sender<CommandStatus>,
}

#[derive(Default)]
struct SessionState {
    pool: IdPool,
    pending: HashMap<CommandId, PendingEntry>,
    connected: bool,
    /// Bumped on every open so a stale reader cannot tear down a newer channel.
    generation: u64,
}

/// State shared between a session and its reader task.
struct Shared {
    node: String,
    state: Mutex<SessionState>,
    broadcast: Arc<dyn Reporter>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn on_line(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }

        let reply = match DeviceReply::parse(line) {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                debug!(node = %self.node, "Ignoring device line without header");
                return;
            }
            Err(e) => {
                debug!(node = %self.node, error = %e, "Ignoring malformed device line");
                return;
            }
        };

        let raw_code = reply.raw_code();
        let external = reply.external_code();
        let command_id = reply.command_id();
        let replies = split_replies(external, reply.keywords);

        let sink = command_id.and_then(|id| {
            self.lock()
                .pending
                .get(&id)
                .map(|entry| (id, entry.sink.clone()))
        });

        let Some((id, sink)) = sink else {
            for reply in replies {
                self.broadcast.report(reply.into_broadcast());
            }
            return;
        };

        for reply in replies {
            sink.report(reply);
        }

        let Some(status) = CommandStatus::from_code(raw_code) else {
            return;
        };

        let mut state = self.lock();
        if status.is_terminal() {
            if let Some(entry) = state.pending.remove(&id) {
                state.pool.release(id);
                drop(state);
                debug!(node = %self.node, command_id = %id, command = %entry.text, status = %status, "Device command finished");
                entry.status.send_replace(status);
            }
        } else if let Some(entry) = state.pending.get(&id) {
            entry.status.send_replace(status);
        }
    }

    /// Fail every pending command and release its id.
    ///
    /// With `generation` set, only acts if that channel is still the current one.
    fn teardown(&self, generation: Option<u64>) -> usize {
        let mut state = self.lock();
        if generation.is_some_and(|g| g != state.generation) {
            return 0;
        }

        state.connected = false;
        let drained: Vec<(CommandId, PendingEntry)> = state.pending.drain().collect();
        for (id, _) in &drained {
            state.pool.release(*id);
        }
        drop(state);

        for (id, entry) in &drained {
            entry.sink.warning(&format!(
                "{}: device connection closed while command {} ({}) was running",
                self.node, id, entry.text
            ));
            entry.status.send_replace(CommandStatus::Failed);
        }
        drained.len()
    }
}

/// Turn one device reply into the replies delivered upstream.
///
/// A reply without data produces nothing. `help` values are emitted one
/// line per reply, each still prefixed with the sender.
fn split_replies(code: MessageCode, mut keywords: Keywords) -> Vec<Reply> {
    let help = keywords.remove("help");

    let mut replies = Vec::new();
    if !keywords.is_empty() {
        replies.push(Reply::new(code, keywords));
    }

    if let Some(help) = help {
        let mut values = help.into_iter();
        let sender = values.next().unwrap_or(Value::Null);
        replies.extend(values.map(|line| Reply::keyword(code, "help", vec![sender.clone(), line])));
    }

    replies
}

async fn read_loop(shared: Arc<Shared>, reader: ReadHalf<Box<dyn DeviceStream>>, generation: u64) {
    let mut lines = BufReader::new(reader).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => shared.on_line(&line),
            Ok(None) => {
                info!(node = %shared.node, "Device closed the connection");
                break;
            }
            Err(e) => {
                warn!(node = %shared.node, error = %e, "Device connection failed");
                break;
            }
        }
    }

    let failed = shared.teardown(Some(generation));
    if failed > 0 {
        warn!(node = %shared.node, failed, "Failed in-flight device commands");
    }
}

// =============================================================================
// Pending command handle
// =============================================================================

/// Handle on a command sent to a device.
#[derive(Debug)]
pub struct PendingCommand {
    id: CommandId,
    node: String,
    status: watch::Receiver<CommandStatus>,
}

impl PendingCommand {
    pub fn id(&self) -> CommandId {
        self.id
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Current status.
    pub fn status(&self) -> CommandStatus {
        *self.status.borrow()
    }

    /// Wait for a terminal status.
    pub async fn wait(&mut self) -> CommandStatus {
        loop {
            let status = *self.status.borrow_and_update();
            if status.is_terminal() {
                return status;
            }
            if self.status.changed().await.is_err() {
                let status = *self.status.borrow();
                return if status.is_terminal() {
                    status
                } else {
                    CommandStatus::Failed
                };
            }
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// Command channel to one node's device process.
pub struct DeviceSession {
    node: String,
    host: String,
    port: u16,
    shared: Arc<Shared>,
    writer: Option<WriteHalf<Box<dyn DeviceStream>>>,
    reader: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("node", &self.node)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("connected", &self.is_connected())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl DeviceSession {
    /// Create a closed session; unmatched replies go to `broadcast`.
    pub fn new(
        node: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        broadcast: Arc<dyn Reporter>,
    ) -> Self {
        let node = node.into();
        Self {
            shared: Arc::new(Shared {
                node: node.clone(),
                state: Mutex::new(SessionState::default()),
                broadcast,
            }),
            node,
            host: host.into(),
            port,
            writer: None,
            reader: None,
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// True while the channel is open and the peer has not hung up.
    pub fn is_connected(&self) -> bool {
        self.writer.is_some() && self.shared.lock().connected
    }

    /// Commands awaiting a terminal reply.
    pub fn in_flight(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Ids currently handed out by the session's pool.
    pub fn ids_in_use(&self) -> usize {
        self.shared.lock().pool.in_use()
    }

    /// Open the channel. A no-op if already connected.
    pub async fn start(&mut self, ctx: &FleetContext) -> Result<(), DeviceError> {
        if self.is_connected() {
            return Ok(());
        }
        self.discard();

        let timeout = ctx.config.device_connect_timeout();
        let stream = match tokio::time::timeout(timeout, ctx.devices.connect(&self.host, self.port)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(DeviceError::Connect {
                    node: self.node.clone(),
                    address: self.address(),
                    source,
                })
            }
            Err(_) => {
                return Err(DeviceError::ConnectTimeout {
                    node: self.node.clone(),
                    address: self.address(),
                })
            }
        };

        let (reader, writer) = tokio::io::split(stream);
        let generation = {
            let mut state = self.shared.lock();
            state.generation += 1;
            state.connected = true;
            state.generation
        };

        self.reader = Some(tokio::spawn(read_loop(self.shared.clone(), reader, generation)));
        self.writer = Some(writer);

        info!(node = %self.node, address = %self.address(), "Connected to device");
        Ok(())
    }

    /// Drop channel handles without a graceful shutdown.
    fn discard(&mut self) {
        self.writer = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.shared.teardown(None);
    }

    /// Close the channel and fail every command still in flight.
    ///
    /// A peer that already reset the connection is not an error.
    pub async fn close(&mut self) -> Result<(), DeviceError> {
        let result = match self.writer.take() {
            Some(mut writer) => match writer.shutdown().await {
                Ok(()) => Ok(()),
                Err(e) if is_benign_disconnect(&e) => {
                    debug!(node = %self.node, error = %e, "Device already closed the connection");
                    Ok(())
                }
                Err(source) => Err(DeviceError::Transport {
                    node: self.node.clone(),
                    source,
                }),
            },
            None => Ok(()),
        };

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        let failed = self.shared.teardown(None);
        if failed > 0 {
            warn!(node = %self.node, failed, "Closed device session with commands in flight");
        } else {
            debug!(node = %self.node, "Closed device session");
        }

        result
    }

    /// Close the channel if it was ever opened, then open it again.
    pub async fn restart(&mut self, ctx: &FleetContext) -> Result<(), DeviceError> {
        if self.writer.is_some() || self.reader.is_some() {
            self.close().await?;
        }
        self.start(ctx).await
    }

    /// Send a command; replies for it go to `sink`.
    pub async fn send(
        &mut self,
        sink: Arc<dyn Reporter>,
        text: &str,
    ) -> Result<PendingCommand, DeviceError> {
        if !self.is_connected() {
            return Err(DeviceError::NotConnected {
                node: self.node.clone(),
            });
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(DeviceError::NotConnected {
                node: self.node.clone(),
            });
        };

        let (id, status) = {
            let mut state = self.shared.lock();
            let id = state.pool.acquire();
            let (tx, rx) = watch::channel(CommandStatus::Created);
            state.pending.insert(
                id,
                PendingEntry {
                    text: text.to_string(),
                    sink,
                    status: tx,
                },
            );
            (id, rx)
        };

        let line = format!("{}\n", CommandLine::new(id, text));
        let written = match writer.write_all(line.as_bytes()).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };

        if let Err(source) = written {
            let mut state = self.shared.lock();
            if state.pending.remove(&id).is_some() {
                state.pool.release(id);
            }
            return Err(DeviceError::Transport {
                node: self.node.clone(),
                source,
            });
        }

        debug!(node = %self.node, command_id = %id, command = %text, "Sent device command");

        Ok(PendingCommand {
            id,
            node: self.node.clone(),
            status,
        })
    }

    /// Process one line of device output.
    pub fn on_line(&self, line: &str) {
        self.shared.on_line(line);
    }

    /// Stop tracking a command, failing it and releasing its id.
    ///
    /// Returns false if the command already finished.
    pub fn abandon(&self, id: CommandId) -> bool {
        let mut state = self.shared.lock();
        match state.pending.remove(&id) {
            Some(entry) => {
                state.pool.release(id);
                drop(state);
                debug!(node = %self.node, command_id = %id, command = %entry.text, "Abandoned device command");
                entry.status.send_replace(CommandStatus::Failed);
                true
            }
            None => false,
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use convoy_protocol::NullReporter;
    use convoy_testing::{device_reply, RecordingReporter};
    use serde_json::json;

    use super::*;
    use crate::config::FleetConfig;
    use crate::engine::MockConnector;
    use crate::probe::StaticProber;

    fn context(devices: Arc<ScriptedConnector>) -> FleetContext {
        let config = FleetConfig::from_yaml(
            "image: cam\nnodes:\n  gfa1:\n    host: gfa1.local\n    port: 19995\n",
        )
        .unwrap();
        FleetContext::new(
            config,
            Arc::new(StaticProber::new()),
            Arc::new(MockConnector::new()),
            devices,
        )
    }

    fn session(broadcast: Arc<RecordingReporter>) -> DeviceSession {
        DeviceSession::new("gfa1", "gfa1.local", 19995, broadcast)
    }

    #[tokio::test]
    async fn test_send_without_channel_allocates_nothing() {
        let mut session = session(Arc::new(RecordingReporter::new()));

        let err = session
            .send(Arc::new(NullReporter), "status")
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::NotConnected { .. }));
        assert_eq!(err.node(), "gfa1");
        assert_eq!(session.ids_in_use(), 0);
    }

    #[tokio::test]
    async fn test_round_trip_with_scripted_device() {
        let devices = Arc::new(ScriptedConnector::new());
        devices.script(
            "gfa1.local",
            Script::replies("gfa1", vec![('>', json!({})), (':', json!({"filename": "a.fits"}))]),
        );
        let ctx = context(devices.clone());
        let mut session = session(Arc::new(RecordingReporter::new()));
        session.start(&ctx).await.unwrap();

        let sink = Arc::new(RecordingReporter::new());
        let mut pending = session.send(sink.clone(), "expose 1").await.unwrap();
        assert_eq!(pending.id().value(), 1);

        let status = tokio::time::timeout(Duration::from_secs(5), pending.wait())
            .await
            .unwrap();
        assert_eq!(status, CommandStatus::Done);
        assert_eq!(session.ids_in_use(), 0);
        assert_eq!(
            sink.keyword_values("filename"),
            vec![vec![json!("gfa1"), json!("a.fits")]]
        );
        // The bare running ack only moves the status.
        assert!(sink.with_code(MessageCode::Debug).is_empty());
        assert_eq!(sink.replies().len(), 1);
        assert_eq!(devices.received("gfa1.local"), vec!["1 expose 1".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_write_releases_command_id() {
        let devices = Arc::new(ScriptedConnector::new());
        devices.script("gfa1.local", Script::reject_writes());
        let ctx = context(devices.clone());
        let mut session = session(Arc::new(RecordingReporter::new()));
        session.start(&ctx).await.unwrap();

        let err = session
            .send(Arc::new(NullReporter), "status")
            .await
            .unwrap_err();

        assert!(matches!(err, DeviceError::Transport { .. }));
        assert!(err.to_string().contains("gfa1"));
        assert_eq!(session.ids_in_use(), 0);
    }

    #[test]
    fn test_on_line_routes_by_id_and_releases_once() {
        let broadcast = Arc::new(RecordingReporter::new());
        let session = session(broadcast.clone());
        let sink = Arc::new(RecordingReporter::new());

        let (tx, rx) = watch::channel(CommandStatus::Created);
        {
            let mut state = session.shared.lock();
            let id = state.pool.acquire();
            state.pending.insert(
                id,
                PendingEntry {
                    text: "status".to_string(),
                    sink: sink.clone(),
                    status: tx,
                },
            );
        }

        session.on_line(&device_reply("gfa1", 1, '>', json!({"temperature": -10})));
        assert_eq!(*rx.borrow(), CommandStatus::Running);
        assert_eq!(session.ids_in_use(), 1);

        session.on_line(&device_reply("gfa1", 1, 'i', json!({"text": "working"})));
        assert_eq!(*rx.borrow(), CommandStatus::Running);

        session.on_line(&device_reply("gfa1", 1, 'f', json!({"error": "shutter"})));
        assert_eq!(*rx.borrow(), CommandStatus::Failed);
        assert_eq!(session.ids_in_use(), 0);
        assert_eq!(session.in_flight(), 0);

        // A late duplicate terminal reply is treated as unsolicited.
        session.on_line(&device_reply("gfa1", 1, ':', json!({"text": "late"})));
        assert_eq!(session.ids_in_use(), 0);
        assert_eq!(broadcast.broadcasts().len(), 1);

        let codes: Vec<_> = sink.replies().iter().map(|r| r.code).collect();
        assert_eq!(
            codes,
            vec![MessageCode::Debug, MessageCode::Info, MessageCode::Warning]
        );
        assert!(broadcast.broadcasts().iter().all(|r| r.broadcast));
    }

    #[test]
    fn test_unsolicited_reply_becomes_broadcast() {
        let broadcast = Arc::new(RecordingReporter::new());
        let session = session(broadcast.clone());

        session.on_line(&device_reply("gfa1", 0, 'i', json!({"temperature": [-10, -11]})));
        session.on_line(&device_reply("gfa1", 7, 'w', json!({"text": "stray"})));

        let replies = broadcast.broadcasts();
        assert_eq!(replies.len(), 2);
        assert_eq!(
            replies[0].get("temperature").unwrap(),
            &[json!("gfa1"), json!(-10), json!(-11)]
        );
    }

    #[test]
    fn test_empty_data_emits_nothing() {
        let broadcast = Arc::new(RecordingReporter::new());
        let session = session(broadcast.clone());
        let sink = Arc::new(RecordingReporter::new());

        let (tx, rx) = watch::channel(CommandStatus::Created);
        {
            let mut state = session.shared.lock();
            let id = state.pool.acquire();
            state.pending.insert(
                id,
                PendingEntry {
                    text: "expose".to_string(),
                    sink: sink.clone(),
                    status: tx,
                },
            );
        }

        session.on_line(&device_reply("gfa1", 1, '>', json!({})));
        assert_eq!(*rx.borrow(), CommandStatus::Running);
        session.on_line(&device_reply("gfa1", 1, ':', json!({})));
        assert_eq!(*rx.borrow(), CommandStatus::Done);
        assert_eq!(session.ids_in_use(), 0);

        session.on_line(&device_reply("gfa1", 0, ':', json!({})));

        assert!(sink.replies().is_empty());
        assert!(broadcast.replies().is_empty());
        assert!(split_replies(MessageCode::Info, Keywords::new()).is_empty());
    }

    #[test]
    fn test_malformed_lines_ignored() {
        let broadcast = Arc::new(RecordingReporter::new());
        let session = session(broadcast.clone());

        session.on_line("not json");
        session.on_line("");
        session.on_line(r#"{"data": {"a": 1}}"#);
        session.on_line(r#"{"header": {}, "data": {"a": 1}}"#);

        assert!(broadcast.replies().is_empty());
    }

    #[test]
    fn test_help_split_per_line() {
        let replies = split_replies(
            MessageCode::Info,
            [
                (
                    "help".to_string(),
                    vec![json!("gfa1"), json!("expose"), json!("status")],
                ),
                ("version".to_string(), vec![json!("gfa1"), json!("1.0")]),
            ]
            .into_iter()
            .collect(),
        );

        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0].get("version").unwrap(), &[json!("gfa1"), json!("1.0")]);
        assert_eq!(replies[1].get("help").unwrap(), &[json!("gfa1"), json!("expose")]);
        assert_eq!(replies[2].get("help").unwrap(), &[json!("gfa1"), json!("status")]);
    }

    #[tokio::test]
    async fn test_close_fails_pending_and_releases_ids() {
        let devices = Arc::new(ScriptedConnector::new());
        devices.script("gfa1.local", Script::silent());
        let ctx = context(devices);
        let mut session = session(Arc::new(RecordingReporter::new()));
        session.start(&ctx).await.unwrap();

        let sink = Arc::new(RecordingReporter::new());
        let mut first = session.send(sink.clone(), "expose 10").await.unwrap();
        let mut second = session.send(sink.clone(), "expose 20").await.unwrap();
        assert_eq!(session.ids_in_use(), 2);

        session.close().await.unwrap();

        assert_eq!(first.wait().await, CommandStatus::Failed);
        assert_eq!(second.wait().await, CommandStatus::Failed);
        assert_eq!(session.ids_in_use(), 0);
        assert!(!session.is_connected());
        assert_eq!(sink.warnings().len(), 2);
        assert!(sink.warnings().iter().all(|w| w.starts_with("gfa1:")));
    }

    #[tokio::test]
    async fn test_abandon_releases_id() {
        let devices = Arc::new(ScriptedConnector::new());
        devices.script("gfa1.local", Script::silent());
        let ctx = context(devices);
        let mut session = session(Arc::new(RecordingReporter::new()));
        session.start(&ctx).await.unwrap();

        let mut pending = session.send(Arc::new(NullReporter), "expose").await.unwrap();
        assert!(session.abandon(pending.id()));
        assert!(!session.abandon(pending.id()));
        assert_eq!(pending.wait().await, CommandStatus::Failed);
        assert_eq!(session.ids_in_use(), 0);

        let next = session.send(Arc::new(NullReporter), "status").await.unwrap();
        assert_eq!(next.id().value(), 1);
    }

    #[tokio::test]
    async fn test_peer_hangup_tears_down() {
        let devices = Arc::new(ScriptedConnector::new());
        devices.script("gfa1.local", Script::hang_up());
        let ctx = context(devices);
        let mut session = session(Arc::new(RecordingReporter::new()));
        session.start(&ctx).await.unwrap();

        let mut pending = session.send(Arc::new(NullReporter), "expose").await.unwrap();
        let status = tokio::time::timeout(Duration::from_secs(5), pending.wait())
            .await
            .unwrap();

        assert_eq!(status, CommandStatus::Failed);
        assert_eq!(session.ids_in_use(), 0);
        assert!(!session.is_connected());

        let err = session.send(Arc::new(NullReporter), "status").await.unwrap_err();
        assert!(matches!(err, DeviceError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn test_restart_reopens() {
        let devices = Arc::new(ScriptedConnector::new());
        let ctx = context(devices.clone());
        let mut session = session(Arc::new(RecordingReporter::new()));

        session.restart(&ctx).await.unwrap();
        assert!(session.is_connected());
        session.restart(&ctx).await.unwrap();
        assert!(session.is_connected());
        assert_eq!(devices.connections("gfa1.local"), 2);
    }

    #[tokio::test]
    async fn test_start_refused() {
        let devices = Arc::new(ScriptedConnector::new());
        devices.refuse("gfa1.local", true);
        let ctx = context(devices);
        let mut session = session(Arc::new(RecordingReporter::new()));

        let err = session.start(&ctx).await.unwrap_err();
        assert!(matches!(err, DeviceError::Connect { .. }));
        assert!(!session.is_connected());
    }
}
