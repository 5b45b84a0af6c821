//! SUPLA protocol server
//!
//! The server is the hub between devices and clients:
//! - Seeds a channel registry from configuration
//! - Accepts device and client connections over TCP and TLS
//! - Tracks per-session state machines and activity timeouts
//! - Fans device value changes out to every registered client
//! - Routes client channel commands to the owning device
//!
//! # Example
//!
//! ```no_run
//! use supla_server::{Server, ServerConfig};
//! use supla_transport::TcpServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config: ServerConfig = toml::from_str(r#"
//!         email = "owner@example.com"
//!         password = "secret"
//!
//!         [[devices]]
//!         guid = "eeeeeeeee534d1a706ac5f416719899e"
//!         channels = [{ type = "relay", func = "light_switch" }]
//!     "#)?;
//!
//!     let server = Server::new(config)?;
//!     let listener = TcpServer::bind("0.0.0.0:2015").await?;
//!     server.serve_on(listener).await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod device;
pub mod error;
pub mod registry;
pub mod server;
pub mod session;

pub use client::{ClientMachine, ClientState};
pub use config::{ChannelConfig, DeviceConfig, ServerConfig};
pub use device::{DeviceMachine, DeviceState};
pub use error::{Result, ServerError};
pub use registry::ChannelRegistry;
pub use server::Server;
pub use session::{Session, SessionId};
