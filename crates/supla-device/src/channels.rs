//! Channel declarations for device registration.

use supla_core::proto::DeviceChannelDef;
use supla_core::{ChannelFunc, ChannelType, ChannelValue};

/// One channel as the device declares it at registration.
#[derive(Debug, Clone)]
pub struct Channel {
    pub channel_type: ChannelType,
    pub func: ChannelFunc,
    pub initial: ChannelValue,
}

impl Channel {
    pub fn new(channel_type: ChannelType, func: ChannelFunc, initial: ChannelValue) -> Self {
        Self {
            channel_type,
            func,
            initial,
        }
    }

    /// Relay channel, power-switch function.
    pub fn relay(on: bool) -> Self {
        Self::new(
            ChannelType::Relay,
            ChannelFunc::PowerSwitch,
            ChannelValue::Relay(on),
        )
    }

    /// Relay channel, light-switch function.
    pub fn light_switch(on: bool) -> Self {
        Self::new(
            ChannelType::Relay,
            ChannelFunc::LightSwitch,
            ChannelValue::Relay(on),
        )
    }

    pub fn thermometer() -> Self {
        Self::new(
            ChannelType::Thermometer,
            ChannelFunc::Thermometer,
            ChannelValue::Temperature(None),
        )
    }

    pub fn humidity() -> Self {
        Self::new(
            ChannelType::HumiditySensor,
            ChannelFunc::Humidity,
            ChannelValue::Humidity(None),
        )
    }

    pub fn humidity_and_temperature() -> Self {
        Self::new(
            ChannelType::HumidityAndTemperatureSensor,
            ChannelFunc::HumidityAndTemperature,
            ChannelValue::TemperatureAndHumidity {
                temperature: None,
                humidity: None,
            },
        )
    }

    pub fn dimmer(brightness: u8) -> Self {
        Self::new(
            ChannelType::Dimmer,
            ChannelFunc::Dimmer,
            ChannelValue::Brightness(brightness),
        )
    }

    pub fn measurement(value: f64) -> Self {
        Self::new(
            ChannelType::GeneralPurposeMeasurement,
            ChannelFunc::GeneralPurposeMeasurement,
            ChannelValue::Measurement(value),
        )
    }

    pub(crate) fn to_def(&self, number: u8) -> DeviceChannelDef {
        DeviceChannelDef {
            number,
            channel_type: self.channel_type as i32,
            action_caps: 0,
            default_func: self.func as i32,
            flags: 0,
            value: self.initial.encode(),
        }
    }
}
