//! Transport error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("bind failed: {0}")]
    BindFailed(String),

    #[error("accept failed: {0}")]
    AcceptFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("outbound buffer full")]
    BufferFull,

    #[error("tls error: {0}")]
    Tls(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] supla_core::Error),

    #[error("not connected")]
    NotConnected,

    #[error("transport error: {0}")]
    Other(String),
}
