//! Plain TCP transport

use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::io::{spawn_io, FrameReceiver, FrameSender};
use crate::traits::TransportServer;

/// TCP configuration
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Keep-alive interval in seconds (0 = disabled)
    pub keepalive_secs: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self { keepalive_secs: 30 }
    }
}

pub(crate) fn apply_keepalive(stream: &TcpStream, keepalive_secs: u64) {
    if keepalive_secs > 0 {
        let socket = socket2::SockRef::from(stream);
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(std::time::Duration::from_secs(keepalive_secs));
        let _ = socket.set_tcp_keepalive(&keepalive);
    }
}

/// TCP transport (client side)
pub struct TcpTransport {
    config: TcpConfig,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            config: TcpConfig::default(),
        }
    }

    pub fn with_config(config: TcpConfig) -> Self {
        Self { config }
    }

    /// Connect to a server
    pub async fn connect(&self, addr: &str) -> Result<(FrameSender, FrameReceiver)> {
        debug!("connecting to {}", addr);

        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        apply_keepalive(&stream, self.config.keepalive_secs);

        let (sender, receiver) = spawn_io(stream);
        info!("connected to {}", addr);
        Ok((sender, receiver))
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// TCP server for accepting connections
pub struct TcpServer {
    listener: TcpListener,
    config: TcpConfig,
}

impl TcpServer {
    /// Bind to an address and create a new TCP server
    pub async fn bind(addr: &str) -> Result<Self> {
        Self::bind_with_config(addr, TcpConfig::default()).await
    }

    /// Bind with custom configuration
    pub async fn bind_with_config(addr: &str, config: TcpConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        info!("listening on {}", addr);
        Ok(Self { listener, config })
    }
}

#[async_trait]
impl TransportServer for TcpServer {
    type Sender = FrameSender;
    type Receiver = FrameReceiver;

    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)> {
        let (stream, peer_addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransportError::AcceptFailed(e.to_string()))?;

        debug!("connection accepted from {}", peer_addr);
        apply_keepalive(&stream, self.config.keepalive_secs);

        let (sender, receiver) = spawn_io(stream);
        Ok((sender, receiver, peer_addr))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| TransportError::Other(e.to_string()))
    }
}
