//! Channel type/function enums and result codes.

use crate::{Error, Result};

/// Channel hardware type, fixed at device-registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ChannelType {
    Relay = 2900,
    Thermometer = 3034,
    HumiditySensor = 3036,
    HumidityAndTemperatureSensor = 3038,
    Dimmer = 4000,
    GeneralPurposeMeasurement = 6100,
}

impl ChannelType {
    pub fn from_i32(value: i32) -> Result<Self> {
        match value {
            2900 => Ok(ChannelType::Relay),
            3034 => Ok(ChannelType::Thermometer),
            3036 => Ok(ChannelType::HumiditySensor),
            3038 => Ok(ChannelType::HumidityAndTemperatureSensor),
            4000 => Ok(ChannelType::Dimmer),
            6100 => Ok(ChannelType::GeneralPurposeMeasurement),
            _ => Err(Error::InvalidField {
                field: "channel_type",
                value: value as i64,
            }),
        }
    }

    /// Default function for this type when config specifies none.
    pub fn default_func(&self) -> ChannelFunc {
        match self {
            ChannelType::Relay => ChannelFunc::PowerSwitch,
            ChannelType::Thermometer => ChannelFunc::Thermometer,
            ChannelType::HumiditySensor => ChannelFunc::Humidity,
            ChannelType::HumidityAndTemperatureSensor => ChannelFunc::HumidityAndTemperature,
            ChannelType::Dimmer => ChannelFunc::Dimmer,
            ChannelType::GeneralPurposeMeasurement => ChannelFunc::GeneralPurposeMeasurement,
        }
    }
}

/// What the channel is used for (a relay can be a power or a light
/// switch); reported by the device and validated against config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ChannelFunc {
    Thermometer = 40,
    Humidity = 42,
    HumidityAndTemperature = 45,
    PowerSwitch = 130,
    LightSwitch = 140,
    Dimmer = 180,
    GeneralPurposeMeasurement = 520,
}

impl ChannelFunc {
    pub fn from_i32(value: i32) -> Result<Self> {
        match value {
            40 => Ok(ChannelFunc::Thermometer),
            42 => Ok(ChannelFunc::Humidity),
            45 => Ok(ChannelFunc::HumidityAndTemperature),
            130 => Ok(ChannelFunc::PowerSwitch),
            140 => Ok(ChannelFunc::LightSwitch),
            180 => Ok(ChannelFunc::Dimmer),
            520 => Ok(ChannelFunc::GeneralPurposeMeasurement),
            _ => Err(Error::InvalidField {
                field: "channel_func",
                value: value as i64,
            }),
        }
    }

    /// Whether this function is legal for the channel type.
    pub fn valid_for(&self, channel_type: ChannelType) -> bool {
        match channel_type {
            ChannelType::Relay => {
                matches!(self, ChannelFunc::PowerSwitch | ChannelFunc::LightSwitch)
            }
            ChannelType::Thermometer => matches!(self, ChannelFunc::Thermometer),
            ChannelType::HumiditySensor => matches!(self, ChannelFunc::Humidity),
            ChannelType::HumidityAndTemperatureSensor => {
                matches!(self, ChannelFunc::HumidityAndTemperature)
            }
            ChannelType::Dimmer => matches!(self, ChannelFunc::Dimmer),
            ChannelType::GeneralPurposeMeasurement => {
                matches!(self, ChannelFunc::GeneralPurposeMeasurement)
            }
        }
    }
}

/// Result code carried by registration results and command acks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ResultCode {
    False = 2,
    True = 3,
    DeviceUnavailable = 4,
    AuthFailed = 5,
    ChannelUnknown = 6,
    DeviceDuplicate = 7,
}

impl ResultCode {
    pub fn from_i32(value: i32) -> Result<Self> {
        match value {
            2 => Ok(ResultCode::False),
            3 => Ok(ResultCode::True),
            4 => Ok(ResultCode::DeviceUnavailable),
            5 => Ok(ResultCode::AuthFailed),
            6 => Ok(ResultCode::ChannelUnknown),
            7 => Ok(ResultCode::DeviceDuplicate),
            _ => Err(Error::InvalidField {
                field: "result_code",
                value: value as i64,
            }),
        }
    }
}
