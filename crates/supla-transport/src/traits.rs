//! Transport trait definitions

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;

use crate::error::Result;

/// Events that can occur on a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Connection established
    Connected,
    /// Connection closed (clean or error)
    Disconnected { reason: Option<String> },
    /// One complete protocol frame, start tag through end tag
    Frame(Bytes),
    /// Error occurred
    Error(String),
}

/// Trait for sending framed data
#[async_trait]
pub trait TransportSender: Send + Sync {
    /// Send a pre-encoded frame, waiting for queue space
    async fn send(&self, frame: Bytes) -> Result<()>;

    /// Queue a frame without waiting; fails with
    /// [`TransportError::BufferFull`](crate::TransportError::BufferFull)
    /// when the peer is not draining
    fn try_send(&self, frame: Bytes) -> Result<()>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Close the sender
    async fn close(&self) -> Result<()>;
}

/// Trait for receiving framed data
#[async_trait]
pub trait TransportReceiver: Send {
    /// Receive the next event
    async fn recv(&mut self) -> Option<TransportEvent>;
}

/// Trait for transport servers (listeners)
#[async_trait]
pub trait TransportServer: Send + Sync {
    /// The sender type for accepted connections
    type Sender: TransportSender + 'static;
    /// The receiver type for accepted connections
    type Receiver: TransportReceiver + 'static;

    /// Accept a new connection
    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)>;

    /// Get the local address
    fn local_addr(&self) -> Result<SocketAddr>;
}
