//! Device library error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DeviceError>;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("registration rejected (result code {0})")]
    RegistrationRejected(i32),

    #[error("no channel {0}")]
    UnknownChannel(u8),

    #[error("handshake timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(#[from] supla_transport::TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] supla_core::Error),

    #[error("device error: {0}")]
    Other(String),
}
