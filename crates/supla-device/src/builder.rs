//! Device builder pattern

use supla_core::{Guid, ACTIVITY_TIMEOUT_DEFAULT};

use crate::channels::Channel;
use crate::device::Device;
use crate::error::Result;

/// Builder for a [`Device`]
pub struct DeviceBuilder {
    pub(crate) addr: String,
    pub(crate) tls: bool,
    pub(crate) email: String,
    pub(crate) guid: Guid,
    pub(crate) name: String,
    pub(crate) soft_ver: String,
    pub(crate) manufacturer_id: i16,
    pub(crate) product_id: i16,
    pub(crate) channels: Vec<Channel>,
    pub(crate) activity_timeout: u8,
}

impl DeviceBuilder {
    /// Create a new builder for a server address (`host:port`).
    pub fn new(addr: &str, email: &str, guid: Guid) -> Self {
        Self {
            addr: addr.to_string(),
            tls: true,
            email: email.to_string(),
            guid,
            name: "SUPLA Device".to_string(),
            soft_ver: env!("CARGO_PKG_VERSION").to_string(),
            manufacturer_id: 0,
            product_id: 0,
            channels: Vec::new(),
            activity_timeout: ACTIVITY_TIMEOUT_DEFAULT,
        }
    }

    /// Use plain TCP instead of TLS.
    pub fn plain_tcp(mut self) -> Self {
        self.tls = false;
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn soft_ver(mut self, soft_ver: &str) -> Self {
        self.soft_ver = soft_ver.to_string();
        self
    }

    pub fn manufacturer(mut self, manufacturer_id: i16, product_id: i16) -> Self {
        self.manufacturer_id = manufacturer_id;
        self.product_id = product_id;
        self
    }

    /// Declare the next channel; order fixes channel numbers.
    pub fn channel(mut self, channel: Channel) -> Self {
        self.channels.push(channel);
        self
    }

    /// Activity timeout to negotiate after registering, in seconds.
    pub fn activity_timeout(mut self, seconds: u8) -> Self {
        self.activity_timeout = seconds;
        self
    }

    /// Connect, register and start the background tasks.
    pub async fn connect(self) -> Result<Device> {
        Device::connect_with(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use supla_core::{ChannelType, ChannelValue};

    #[test]
    fn channel_order_fixes_numbers() {
        let builder = DeviceBuilder::new("host:2016", "owner@example.com", Guid([1; 16]))
            .name("bench")
            .channel(Channel::light_switch(true))
            .channel(Channel::thermometer())
            .channel(Channel::dimmer(128));

        assert_eq!(builder.channels.len(), 3);
        assert_eq!(builder.channels[0].channel_type, ChannelType::Relay);
        assert_eq!(builder.channels[2].initial, ChannelValue::Brightness(128));
    }

    #[test]
    fn defaults() {
        let builder = DeviceBuilder::new("host:2016", "owner@example.com", Guid([1; 16]));
        assert!(builder.tls);
        assert_eq!(builder.activity_timeout, ACTIVITY_TIMEOUT_DEFAULT);
        assert!(!builder.plain_tcp().tls);
    }
}
