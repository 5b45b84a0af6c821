//! Server configuration.
//!
//! The registry is closed: every device that may register is declared
//! here, keyed by GUID, together with its channel table. Clients
//! authenticate against the single email/password pair.

use serde::Deserialize;

use supla_core::{ChannelFunc, ChannelType, Guid, ACTIVITY_TIMEOUT_DEFAULT, MAX_CHANNELS};

use crate::error::{Result, ServerError};

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Account email; devices and clients must present it.
    pub email: String,
    /// Client password. Devices authenticate by GUID only.
    pub password: String,
    /// Default activity timeout in seconds, before any negotiation.
    #[serde(default = "default_activity_timeout")]
    pub activity_timeout: u8,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

fn default_activity_timeout() -> u8 {
    ACTIVITY_TIMEOUT_DEFAULT
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// 32-char hex GUID
    pub guid: String,
    #[serde(default)]
    pub name: Option<String>,
    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    #[serde(rename = "type")]
    pub channel_type: String,
    #[serde(default)]
    pub func: Option<String>,
}

impl ServerConfig {
    /// Check the config is internally consistent; call before serving.
    pub fn validate(&self) -> Result<()> {
        if self.email.is_empty() {
            return Err(ServerError::Config("email must not be empty".into()));
        }
        for device in &self.devices {
            let guid = device.guid()?;
            if device.channels.is_empty() {
                return Err(ServerError::Config(format!(
                    "device {guid} declares no channels"
                )));
            }
            if device.channels.len() > MAX_CHANNELS {
                return Err(ServerError::Config(format!(
                    "device {guid} declares {} channels (max {MAX_CHANNELS})",
                    device.channels.len()
                )));
            }
            for (i, channel) in device.channels.iter().enumerate() {
                let channel_type = channel.parsed_type()?;
                let func = channel.parsed_func(channel_type)?;
                if !func.valid_for(channel_type) {
                    return Err(ServerError::Config(format!(
                        "device {guid} channel {i}: function {func:?} does not fit {channel_type:?}"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl DeviceConfig {
    pub fn guid(&self) -> Result<Guid> {
        Guid::from_hex(&self.guid).map_err(|e| ServerError::Config(e.to_string()))
    }
}

impl ChannelConfig {
    pub fn parsed_type(&self) -> Result<ChannelType> {
        channel_type_by_name(&self.channel_type).ok_or_else(|| {
            ServerError::Config(format!("unknown channel type '{}'", self.channel_type))
        })
    }

    /// Configured function, or the type's default when omitted.
    pub fn parsed_func(&self, channel_type: ChannelType) -> Result<ChannelFunc> {
        match &self.func {
            Some(name) => channel_func_by_name(name)
                .ok_or_else(|| ServerError::Config(format!("unknown channel function '{name}'"))),
            None => Ok(channel_type.default_func()),
        }
    }
}

fn channel_type_by_name(name: &str) -> Option<ChannelType> {
    Some(match name {
        "relay" => ChannelType::Relay,
        "thermometer" => ChannelType::Thermometer,
        "humidity" => ChannelType::HumiditySensor,
        "humidity_and_temperature" => ChannelType::HumidityAndTemperatureSensor,
        "dimmer" => ChannelType::Dimmer,
        "measurement" => ChannelType::GeneralPurposeMeasurement,
        _ => return None,
    })
}

fn channel_func_by_name(name: &str) -> Option<ChannelFunc> {
    Some(match name {
        "thermometer" => ChannelFunc::Thermometer,
        "humidity" => ChannelFunc::Humidity,
        "humidity_and_temperature" => ChannelFunc::HumidityAndTemperature,
        "power_switch" => ChannelFunc::PowerSwitch,
        "light_switch" => ChannelFunc::LightSwitch,
        "dimmer" => ChannelFunc::Dimmer,
        "measurement" => ChannelFunc::GeneralPurposeMeasurement,
        _ => return None,
    })
}
