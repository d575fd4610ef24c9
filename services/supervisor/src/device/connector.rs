//! Transport for device sessions.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// A bidirectional byte stream to a device process.
pub trait DeviceStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> DeviceStream for T {}

/// Opens streams to device processes.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> io::Result<Box<dyn DeviceStream>>;
}

/// Plain TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl DeviceConnector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> io::Result<Box<dyn DeviceStream>> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}
