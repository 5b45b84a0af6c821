//! Typed channel values and their 8-byte wire encodings.
//!
//! Every channel value travels as an opaque 8-byte payload whose
//! interpretation depends on the channel type. Sensors use sentinel
//! encodings for "no reading yet": thermometers report -275.0 °C,
//! fixed-point sensors report -275000 / -1000.

use crate::ChannelType;

/// Thermometer sentinel for "no reading"
const TEMPERATURE_NOT_SET: f64 = -275.0;
/// Fixed-point (×1000) sentinels
const TEMPERATURE_NOT_SET_MILLI: i32 = -275_000;
const HUMIDITY_NOT_SET_MILLI: i32 = -1_000;

/// A decoded, type-tagged channel value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChannelValue {
    /// Relay on/off
    Relay(bool),
    /// Temperature in °C, `None` before the first reading
    Temperature(Option<f64>),
    /// Relative humidity in %, `None` before the first reading
    Humidity(Option<f64>),
    /// Combined sensor
    TemperatureAndHumidity {
        temperature: Option<f64>,
        humidity: Option<f64>,
    },
    /// Dimmer brightness 0-100
    Brightness(u8),
    /// General purpose measurement, unit defined by channel config
    Measurement(f64),
    /// Raw payload for types without a typed decoding
    Raw([u8; 8]),
}

impl ChannelValue {
    /// Encode to the 8-byte wire form.
    pub fn encode(&self) -> [u8; 8] {
        match *self {
            ChannelValue::Relay(on) => u64::to_le_bytes(on as u64),
            ChannelValue::Temperature(value) => {
                f64::to_le_bytes(value.unwrap_or(TEMPERATURE_NOT_SET))
            }
            ChannelValue::Humidity(value) => {
                encode_milli_pair(None, value)
            }
            ChannelValue::TemperatureAndHumidity {
                temperature,
                humidity,
            } => encode_milli_pair(temperature, humidity),
            ChannelValue::Brightness(level) => {
                let mut bytes = [0u8; 8];
                bytes[0] = level.min(100);
                bytes
            }
            ChannelValue::Measurement(value) => f64::to_le_bytes(value),
            ChannelValue::Raw(bytes) => bytes,
        }
    }

    /// Decode from the 8-byte wire form according to the channel type.
    pub fn decode(channel_type: ChannelType, bytes: [u8; 8]) -> Self {
        match channel_type {
            ChannelType::Relay => ChannelValue::Relay(u64::from_le_bytes(bytes) == 1),
            ChannelType::Thermometer => {
                let value = f64::from_le_bytes(bytes);
                if value <= TEMPERATURE_NOT_SET {
                    ChannelValue::Temperature(None)
                } else {
                    ChannelValue::Temperature(Some(value))
                }
            }
            ChannelType::HumiditySensor => {
                let (_, humidity) = decode_milli_pair(bytes);
                ChannelValue::Humidity(humidity)
            }
            ChannelType::HumidityAndTemperatureSensor => {
                let (temperature, humidity) = decode_milli_pair(bytes);
                ChannelValue::TemperatureAndHumidity {
                    temperature,
                    humidity,
                }
            }
            ChannelType::Dimmer => ChannelValue::Brightness(bytes[0]),
            ChannelType::GeneralPurposeMeasurement => {
                ChannelValue::Measurement(f64::from_le_bytes(bytes))
            }
        }
    }

    /// Initial value for a channel of the given type.
    pub fn initial(channel_type: ChannelType) -> Self {
        match channel_type {
            ChannelType::Relay => ChannelValue::Relay(false),
            ChannelType::Thermometer => ChannelValue::Temperature(None),
            ChannelType::HumiditySensor => ChannelValue::Humidity(None),
            ChannelType::HumidityAndTemperatureSensor => ChannelValue::TemperatureAndHumidity {
                temperature: None,
                humidity: None,
            },
            ChannelType::Dimmer => ChannelValue::Brightness(0),
            ChannelType::GeneralPurposeMeasurement => ChannelValue::Measurement(0.0),
        }
    }
}

fn encode_milli_pair(temperature: Option<f64>, humidity: Option<f64>) -> [u8; 8] {
    let temp = temperature
        .map(|t| (t * 1000.0) as i32)
        .unwrap_or(TEMPERATURE_NOT_SET_MILLI);
    let humi = humidity
        .map(|h| (h * 1000.0) as i32)
        .unwrap_or(HUMIDITY_NOT_SET_MILLI);
    let mut bytes = [0u8; 8];
    bytes[..4].copy_from_slice(&temp.to_le_bytes());
    bytes[4..].copy_from_slice(&humi.to_le_bytes());
    bytes
}

fn decode_milli_pair(bytes: [u8; 8]) -> (Option<f64>, Option<f64>) {
    let temp = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let humi = i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let temperature = (temp > TEMPERATURE_NOT_SET_MILLI).then(|| temp as f64 / 1000.0);
    let humidity = (humi > HUMIDITY_NOT_SET_MILLI).then(|| humi as f64 / 1000.0);
    (temperature, humidity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_encoding() {
        assert_eq!(
            ChannelValue::Relay(false).encode(),
            [0, 0, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(ChannelValue::Relay(true).encode(), [1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            ChannelValue::decode(ChannelType::Relay, [1, 0, 0, 0, 0, 0, 0, 0]),
            ChannelValue::Relay(true)
        );
    }

    #[test]
    fn temperature_encoding() {
        // -275.0 is the "not set" sentinel
        assert_eq!(
            ChannelValue::Temperature(None).encode(),
            *b"\x00\x00\x00\x00\x000q\xc0"
        );
        assert_eq!(
            ChannelValue::Temperature(Some(3.14)).encode(),
            *b"\x1f\x85\xebQ\xb8\x1e\t@"
        );
        assert_eq!(
            ChannelValue::decode(ChannelType::Thermometer, *b"X9\xb4\xc8v\xbe\xf3?"),
            ChannelValue::Temperature(Some(1.234))
        );
        assert_eq!(
            ChannelValue::decode(ChannelType::Thermometer, *b"\x00\x00\x00\x00\x000q\xc0"),
            ChannelValue::Temperature(None)
        );
    }

    #[test]
    fn humidity_encoding() {
        assert_eq!(
            ChannelValue::Humidity(None).encode(),
            *b"\xc8\xcd\xfb\xff\x18\xfc\xff\xff"
        );
        assert_eq!(
            ChannelValue::Humidity(Some(42.0)).encode(),
            *b"\xc8\xcd\xfb\xff\x10\xa4\x00\x00"
        );
        assert_eq!(
            ChannelValue::decode(
                ChannelType::HumiditySensor,
                *b"\xc8\xcd\xfb\xffhB\x00\x00"
            ),
            ChannelValue::Humidity(Some(17.0))
        );
    }

    #[test]
    fn temperature_and_humidity_encoding() {
        let value = ChannelValue::TemperatureAndHumidity {
            temperature: Some(3.14),
            humidity: None,
        };
        assert_eq!(value.encode(), *b"D\x0c\x00\x00\x18\xfc\xff\xff");

        assert_eq!(
            ChannelValue::decode(
                ChannelType::HumidityAndTemperatureSensor,
                *b"\xce\x04\x00\x000o\x01\x00"
            ),
            ChannelValue::TemperatureAndHumidity {
                temperature: Some(1.23),
                humidity: Some(94.0),
            }
        );
    }

    #[test]
    fn measurement_encoding() {
        assert_eq!(
            ChannelValue::Measurement(0.0).encode(),
            [0, 0, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(
            ChannelValue::decode(
                ChannelType::GeneralPurposeMeasurement,
                *b"\xaeG\xe1z\x14\xae\xf3?"
            ),
            ChannelValue::Measurement(1.23)
        );
    }

    #[test]
    fn brightness_clamped() {
        assert_eq!(ChannelValue::Brightness(255).encode()[0], 100);
        assert_eq!(
            ChannelValue::decode(ChannelType::Dimmer, [60, 0, 0, 0, 0, 0, 0, 0]),
            ChannelValue::Brightness(60)
        );
    }
}
