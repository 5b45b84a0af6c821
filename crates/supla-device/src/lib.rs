//! SUPLA device library
//!
//! Connect to a SUPLA server, register a set of channels, report
//! sensor readings and execute channel commands.
//!
//! # Example
//!
//! ```no_run
//! use supla_device::{Channel, Device};
//! use supla_core::{ChannelValue, Guid};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let guid = Guid::from_hex("eeeeeeeee534d1a706ac5f416719899e")?;
//!     let device = Device::builder("server.local:2016", "owner@example.com", guid)
//!         .name("Patio")
//!         .channel(Channel::light_switch(false))
//!         .channel(Channel::thermometer())
//!         .connect()
//!         .await?;
//!
//!     device.on_command(|channel, value| {
//!         println!("channel {channel} -> {value:?}");
//!         true
//!     });
//!
//!     device.report(1, ChannelValue::Temperature(Some(21.5))).await?;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod channels;
pub mod device;
pub mod error;

pub use builder::DeviceBuilder;
pub use channels::Channel;
pub use device::{CommandCallback, Device};
pub use error::{DeviceError, Result};

pub use supla_core::{ChannelFunc, ChannelType, ChannelValue, Guid};
