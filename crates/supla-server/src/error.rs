//! Server error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("unexpected message in state {state}: {call:?}")]
    UnexpectedMessage {
        state: &'static str,
        call: supla_core::Call,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(#[from] supla_transport::TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] supla_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server error: {0}")]
    Other(String),
}
