//! Scripted device processes for testing and dry runs.
//!
//! [`ScriptedConnector`] hands out in-memory streams whose far end behaves
//! like a device: it reads `"<id> <text>"` lines and answers each command
//! according to the host's [`Script`].

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use async_trait::async_trait;
use convoy_id::CommandLine;
use serde_json::{json, Value};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream, ReadBuf,
};
use tokio::sync::mpsc;
use tracing::debug;

use super::connector::{DeviceConnector, DeviceStream};

#[derive(Debug, Clone, PartialEq)]
enum Behavior {
    /// Answer every command with these `(code, data)` replies.
    Reply(Vec<(char, Value)>),
    /// Never answer.
    Silent,
    /// Close the connection on the first command.
    HangUp,
    /// Accept the connection but fail every write to it.
    RejectWrites,
}

/// How a scripted device answers commands.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    sender: String,
    behavior: Behavior,
}

impl Script {
    /// Answer every command with the given replies, in order.
    pub fn replies(sender: impl Into<String>, replies: Vec<(char, Value)>) -> Self {
        Self {
            sender: sender.into(),
            behavior: Behavior::Reply(replies),
        }
    }

    /// Acknowledge every command with a bare `:`.
    pub fn done(sender: impl Into<String>) -> Self {
        Self::replies(sender, vec![(':', json!({}))])
    }

    pub fn silent() -> Self {
        Self {
            sender: String::new(),
            behavior: Behavior::Silent,
        }
    }

    pub fn hang_up() -> Self {
        Self {
            sender: String::new(),
            behavior: Behavior::HangUp,
        }
    }

    /// Connect fine, then fail every command write with a broken pipe.
    pub fn reject_writes() -> Self {
        Self {
            sender: String::new(),
            behavior: Behavior::RejectWrites,
        }
    }
}

/// Client end whose writes always fail.
struct BrokenWrites(DuplexStream);

impl AsyncRead for BrokenWrites {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_read(cx, buf)
    }
}

impl AsyncWrite for BrokenWrites {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "device stopped reading",
        )))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_shutdown(cx)
    }
}

#[derive(Default)]
struct HostState {
    script: Option<Script>,
    refused: bool,
    connections: usize,
    received: Vec<String>,
    pushers: Vec<mpsc::UnboundedSender<String>>,
}

type Hosts = Arc<Mutex<HashMap<String, HostState>>>;

fn lock(hosts: &Hosts) -> MutexGuard<'_, HashMap<String, HostState>> {
    hosts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Connector whose devices follow per-host scripts.
///
/// Hosts without a script acknowledge every command.
#[derive(Default)]
pub struct ScriptedConnector {
    hosts: Hosts,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the script used by future connections to `host`.
    pub fn script(&self, host: &str, script: Script) {
        lock(&self.hosts).entry(host.to_string()).or_default().script = Some(script);
    }

    /// Refuse (or accept again) connections to `host`.
    pub fn refuse(&self, host: &str, refused: bool) {
        lock(&self.hosts).entry(host.to_string()).or_default().refused = refused;
    }

    /// Command lines received by `host`, in order.
    pub fn received(&self, host: &str) -> Vec<String> {
        lock(&self.hosts)
            .get(host)
            .map(|state| state.received.clone())
            .unwrap_or_default()
    }

    /// Number of accepted connections to `host`.
    pub fn connections(&self, host: &str) -> usize {
        lock(&self.hosts)
            .get(host)
            .map(|state| state.connections)
            .unwrap_or(0)
    }

    /// Write an unsolicited line from every open connection to `host`.
    pub fn push(&self, host: &str, line: impl Into<String>) {
        let line = line.into();
        if let Some(state) = lock(&self.hosts).get_mut(host) {
            state.pushers.retain(|tx| tx.send(line.clone()).is_ok());
        }
    }
}

#[async_trait]
impl DeviceConnector for ScriptedConnector {
    async fn connect(&self, host: &str, _port: u16) -> io::Result<Box<dyn DeviceStream>> {
        let (client, device) = tokio::io::duplex(64 * 1024);
        let (push_tx, push_rx) = mpsc::unbounded_channel();

        let script = {
            let mut hosts = lock(&self.hosts);
            let state = hosts.entry(host.to_string()).or_default();
            if state.refused {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("{} refused the connection", host),
                ));
            }
            state.connections += 1;
            state.pushers.push(push_tx);
            state.script.clone().unwrap_or_else(|| Script::done(host))
        };

        let rejects_writes = script.behavior == Behavior::RejectWrites;
        tokio::spawn(serve(
            device,
            script,
            self.hosts.clone(),
            host.to_string(),
            push_rx,
        ));

        if rejects_writes {
            return Ok(Box::new(BrokenWrites(client)));
        }
        Ok(Box::new(client))
    }
}

fn reply_line(sender: &str, command_id: u32, code: char, data: &Value) -> String {
    let mut line = json!({
        "header": {
            "sender": sender,
            "command_id": command_id,
            "message_code": code.to_string(),
        },
        "data": data,
    })
    .to_string();
    line.push('\n');
    line
}

async fn serve(
    stream: DuplexStream,
    script: Script,
    hosts: Hosts,
    host: String,
    mut pushes: mpsc::UnboundedReceiver<String>,
) {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else {
                    break;
                };
                if let Some(state) = lock(&hosts).get_mut(&host) {
                    state.received.push(line.clone());
                }

                let command = match CommandLine::parse(&line) {
                    Ok(command) => command,
                    Err(e) => {
                        debug!(host = %host, error = %e, "Scripted device ignoring line");
                        continue;
                    }
                };

                match &script.behavior {
                    Behavior::Silent | Behavior::RejectWrites => {}
                    Behavior::HangUp => break,
                    Behavior::Reply(replies) => {
                        for (code, data) in replies {
                            let out = reply_line(&script.sender, command.id.value(), *code, data);
                            if writer.write_all(out.as_bytes()).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
            Some(mut line) = pushes.recv() => {
                line.push('\n');
                if writer.write_all(line.as_bytes()).await.is_err() {
                    return;
                }
            }
        }
    }
}
