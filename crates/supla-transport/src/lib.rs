//! SUPLA transport layer
//!
//! Channel-backed TCP and TLS connections that deal in whole protocol
//! frames. The server accepts both transports on separate ports; the
//! device library dials either one. Frame boundaries are recovered
//! from the protocol's own tags, so every [`TransportEvent::Frame`]
//! carries exactly one frame.

pub mod error;
pub mod io;
pub mod tcp;
pub mod traits;

#[cfg(feature = "tls")]
pub mod tls;

pub use error::{Result, TransportError};
pub use io::{FrameReceiver, FrameSender};
pub use tcp::{TcpConfig, TcpServer, TcpTransport};
pub use traits::{TransportEvent, TransportReceiver, TransportSender, TransportServer};

#[cfg(feature = "tls")]
pub use tls::{load_server_config, server_config_from_der, TlsServer, TlsTransport};
