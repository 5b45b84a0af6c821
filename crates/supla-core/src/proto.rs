//! Protocol message structs and payload codec.
//!
//! All messages are little-endian C layouts with fixed-size
//! NUL-padded string fields, matching the device firmware structs.
//! [`Message`] dispatches the full call table: `Message::decode`
//! parses a frame's payload for a recognized call, `Message::encode`
//! produces `(Call, Bytes)` ready for framing.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Call, Error, Guid, Result, MAX_CHANNELS};

pub const EMAIL_MAXSIZE: usize = 256;
pub const PASSWORD_MAXSIZE: usize = 64;
pub const DEVICE_NAME_MAXSIZE: usize = 201;
pub const SOFT_VER_MAXSIZE: usize = 21;

/// Channels per snapshot frame; larger registries span several frames.
pub const SNAPSHOT_PACK_MAXCOUNT: usize = 20;

/// Seconds/microseconds pair used by heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeVal {
    pub tv_sec: i64,
    pub tv_usec: i64,
}

impl TimeVal {
    pub fn now() -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            tv_sec: now.as_secs() as i64,
            tv_usec: now.subsec_micros() as i64,
        }
    }

    fn put(&self, buf: &mut BytesMut) {
        buf.put_i64_le(self.tv_sec);
        buf.put_i64_le(self.tv_usec);
    }

    fn get(buf: &mut Bytes) -> Self {
        Self {
            tv_sec: buf.get_i64_le(),
            tv_usec: buf.get_i64_le(),
        }
    }
}

/// One channel definition inside a device registration (25 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceChannelDef {
    pub number: u8,
    pub channel_type: i32,
    pub action_caps: u32,
    pub default_func: i32,
    pub flags: u32,
    pub value: [u8; 8],
}

impl DeviceChannelDef {
    const SIZE: usize = 1 + 4 + 4 + 4 + 4 + 8;

    fn put(&self, buf: &mut BytesMut) {
        buf.put_u8(self.number);
        buf.put_i32_le(self.channel_type);
        buf.put_u32_le(self.action_caps);
        buf.put_i32_le(self.default_func);
        buf.put_u32_le(self.flags);
        buf.put_slice(&self.value);
    }

    fn get(buf: &mut Bytes) -> Self {
        let number = buf.get_u8();
        let channel_type = buf.get_i32_le();
        let action_caps = buf.get_u32_le();
        let default_func = buf.get_i32_le();
        let flags = buf.get_u32_le();
        let mut value = [0u8; 8];
        buf.copy_to_slice(&mut value);
        Self {
            number,
            channel_type,
            action_caps,
            default_func,
            flags,
            value,
        }
    }
}

/// Device registration request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterDevice {
    pub email: String,
    pub guid: Guid,
    pub name: String,
    pub soft_ver: String,
    pub manufacturer_id: i16,
    pub product_id: i16,
    pub channels: Vec<DeviceChannelDef>,
}

/// Device registration response (7 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterDeviceResult {
    pub result_code: i32,
    pub activity_timeout: u8,
    pub version: u8,
    pub version_min: u8,
}

/// Client registration request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterClient {
    pub email: String,
    pub password: String,
    pub guid: Guid,
    pub name: String,
    pub soft_ver: String,
}

/// Client registration response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterClientResult {
    pub result_code: i32,
    pub client_id: i32,
    pub channel_count: i32,
    pub activity_timeout: u8,
    pub version: u8,
    pub version_min: u8,
}

/// Device reports a channel value change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceChannelValue {
    pub channel_number: u8,
    pub value: [u8; 8],
}

/// Server commands a device to set a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelNewValue {
    pub sender_id: i32,
    pub channel_number: u8,
    pub duration_ms: u32,
    pub value: [u8; 8],
}

/// Device acknowledges a [`ChannelNewValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelNewValueResult {
    pub channel_number: u8,
    pub sender_id: i32,
    pub success: bool,
}

/// Client commands a device channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetChannelValue {
    pub guid: Guid,
    pub channel_number: u8,
    pub value: [u8; 8],
}

/// Ack for a client command; `result_code` distinguishes accepted
/// commands from device-unavailable failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetChannelResult {
    pub guid: Guid,
    pub channel_number: u8,
    pub result_code: i32,
}

/// One channel's state inside a snapshot or update push (31 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStateItem {
    pub eol: bool,
    pub guid: Guid,
    pub channel_number: u8,
    pub channel_type: i32,
    pub online: bool,
    pub value: [u8; 8],
}

impl ChannelStateItem {
    const SIZE: usize = 1 + 16 + 1 + 4 + 1 + 8;

    fn put(&self, buf: &mut BytesMut) {
        buf.put_u8(self.eol as u8);
        buf.put_slice(self.guid.as_bytes());
        buf.put_u8(self.channel_number);
        buf.put_i32_le(self.channel_type);
        buf.put_u8(self.online as u8);
        buf.put_slice(&self.value);
    }

    fn get(buf: &mut Bytes) -> Self {
        let eol = buf.get_u8() != 0;
        let mut guid = [0u8; 16];
        buf.copy_to_slice(&mut guid);
        let channel_number = buf.get_u8();
        let channel_type = buf.get_i32_le();
        let online = buf.get_u8() != 0;
        let mut value = [0u8; 8];
        buf.copy_to_slice(&mut value);
        Self {
            eol,
            guid: Guid(guid),
            channel_number,
            channel_type,
            online,
            value,
        }
    }
}

/// Registry snapshot batch sent to a freshly registered client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSnapshot {
    /// Channels still to come in later frames
    pub total_left: i32,
    pub items: Vec<ChannelStateItem>,
}

/// Activity timeout negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetActivityTimeout {
    pub activity_timeout: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetActivityTimeoutResult {
    pub activity_timeout: u8,
    pub min: u8,
    pub max: u8,
}

/// A decoded protocol message, one variant per recognized call.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    PingServer(TimeVal),
    PingServerResult(TimeVal),
    RegisterDevice(RegisterDevice),
    RegisterDeviceResult(RegisterDeviceResult),
    RegisterClient(RegisterClient),
    RegisterClientResult(RegisterClientResult),
    ChannelValueChanged(DeviceChannelValue),
    ChannelSetValue(ChannelNewValue),
    ChannelSetValueResult(ChannelNewValueResult),
    ChannelSnapshot(ChannelSnapshot),
    ChannelValueUpdate(ChannelStateItem),
    SetChannelValue(SetChannelValue),
    SetChannelResult(SetChannelResult),
    SetActivityTimeout(SetActivityTimeout),
    SetActivityTimeoutResult(SetActivityTimeoutResult),
}

impl Message {
    /// The call id this message travels under.
    pub fn call(&self) -> Call {
        match self {
            Message::PingServer(_) => Call::DcsPingServer,
            Message::PingServerResult(_) => Call::SdcPingServerResult,
            Message::RegisterDevice(_) => Call::DsRegisterDevice,
            Message::RegisterDeviceResult(_) => Call::SdRegisterDeviceResult,
            Message::RegisterClient(_) => Call::CsRegisterClient,
            Message::RegisterClientResult(_) => Call::ScRegisterClientResult,
            Message::ChannelValueChanged(_) => Call::DsChannelValueChanged,
            Message::ChannelSetValue(_) => Call::SdChannelSetValue,
            Message::ChannelSetValueResult(_) => Call::DsChannelSetValueResult,
            Message::ChannelSnapshot(_) => Call::ScChannelSnapshot,
            Message::ChannelValueUpdate(_) => Call::ScChannelValueUpdate,
            Message::SetChannelValue(_) => Call::CsSetChannelValue,
            Message::SetChannelResult(_) => Call::ScSetChannelResult,
            Message::SetActivityTimeout(_) => Call::DcsSetActivityTimeout,
            Message::SetActivityTimeoutResult(_) => Call::SdcSetActivityTimeoutResult,
        }
    }

    /// Encode the payload; pair with [`Message::call`] for framing.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        match self {
            Message::PingServer(now) | Message::PingServerResult(now) => now.put(&mut buf),

            Message::RegisterDevice(msg) => {
                if msg.channels.len() > MAX_CHANNELS {
                    return Err(Error::InvalidField {
                        field: "channel_count",
                        value: msg.channels.len() as i64,
                    });
                }
                put_fixed_str(&mut buf, &msg.email, EMAIL_MAXSIZE);
                buf.put_slice(msg.guid.as_bytes());
                put_fixed_str(&mut buf, &msg.name, DEVICE_NAME_MAXSIZE);
                put_fixed_str(&mut buf, &msg.soft_ver, SOFT_VER_MAXSIZE);
                buf.put_i16_le(msg.manufacturer_id);
                buf.put_i16_le(msg.product_id);
                buf.put_u8(msg.channels.len() as u8);
                for channel in &msg.channels {
                    channel.put(&mut buf);
                }
            }

            Message::RegisterDeviceResult(msg) => {
                buf.put_i32_le(msg.result_code);
                buf.put_u8(msg.activity_timeout);
                buf.put_u8(msg.version);
                buf.put_u8(msg.version_min);
            }

            Message::RegisterClient(msg) => {
                put_fixed_str(&mut buf, &msg.email, EMAIL_MAXSIZE);
                put_fixed_str(&mut buf, &msg.password, PASSWORD_MAXSIZE);
                buf.put_slice(msg.guid.as_bytes());
                put_fixed_str(&mut buf, &msg.name, DEVICE_NAME_MAXSIZE);
                put_fixed_str(&mut buf, &msg.soft_ver, SOFT_VER_MAXSIZE);
            }

            Message::RegisterClientResult(msg) => {
                buf.put_i32_le(msg.result_code);
                buf.put_i32_le(msg.client_id);
                buf.put_i32_le(msg.channel_count);
                buf.put_u8(msg.activity_timeout);
                buf.put_u8(msg.version);
                buf.put_u8(msg.version_min);
            }

            Message::ChannelValueChanged(msg) => {
                buf.put_u8(msg.channel_number);
                buf.put_slice(&msg.value);
            }

            Message::ChannelSetValue(msg) => {
                buf.put_i32_le(msg.sender_id);
                buf.put_u8(msg.channel_number);
                buf.put_u32_le(msg.duration_ms);
                buf.put_slice(&msg.value);
            }

            Message::ChannelSetValueResult(msg) => {
                buf.put_u8(msg.channel_number);
                buf.put_i32_le(msg.sender_id);
                buf.put_u8(msg.success as u8);
            }

            Message::ChannelSnapshot(msg) => {
                if msg.items.len() > SNAPSHOT_PACK_MAXCOUNT {
                    return Err(Error::InvalidField {
                        field: "snapshot_count",
                        value: msg.items.len() as i64,
                    });
                }
                buf.put_i32_le(msg.total_left);
                buf.put_u8(msg.items.len() as u8);
                for item in &msg.items {
                    item.put(&mut buf);
                }
            }

            Message::ChannelValueUpdate(item) => item.put(&mut buf),

            Message::SetChannelValue(msg) => {
                buf.put_slice(msg.guid.as_bytes());
                buf.put_u8(msg.channel_number);
                buf.put_slice(&msg.value);
            }

            Message::SetChannelResult(msg) => {
                buf.put_slice(msg.guid.as_bytes());
                buf.put_u8(msg.channel_number);
                buf.put_i32_le(msg.result_code);
            }

            Message::SetActivityTimeout(msg) => buf.put_u8(msg.activity_timeout),

            Message::SetActivityTimeoutResult(msg) => {
                buf.put_u8(msg.activity_timeout);
                buf.put_u8(msg.min);
                buf.put_u8(msg.max);
            }
        }
        Ok(buf.freeze())
    }

    /// Decode a frame payload for a recognized call.
    pub fn decode(call: Call, payload: Bytes) -> Result<Self> {
        let mut buf = payload;
        let msg = match call {
            Call::DcsPingServer => {
                need(call, &buf, 16)?;
                Message::PingServer(TimeVal::get(&mut buf))
            }
            Call::SdcPingServerResult => {
                need(call, &buf, 16)?;
                Message::PingServerResult(TimeVal::get(&mut buf))
            }

            Call::DsRegisterDevice => {
                let fixed = EMAIL_MAXSIZE + 16 + DEVICE_NAME_MAXSIZE + SOFT_VER_MAXSIZE + 2 + 2 + 1;
                need(call, &buf, fixed)?;
                let email = get_fixed_str(&mut buf, EMAIL_MAXSIZE, "email")?;
                let guid = get_guid(&mut buf);
                let name = get_fixed_str(&mut buf, DEVICE_NAME_MAXSIZE, "name")?;
                let soft_ver = get_fixed_str(&mut buf, SOFT_VER_MAXSIZE, "soft_ver")?;
                let manufacturer_id = buf.get_i16_le();
                let product_id = buf.get_i16_le();
                let count = buf.get_u8() as usize;
                if count > MAX_CHANNELS {
                    return Err(Error::InvalidField {
                        field: "channel_count",
                        value: count as i64,
                    });
                }
                need(call, &buf, count * DeviceChannelDef::SIZE)?;
                let channels = (0..count).map(|_| DeviceChannelDef::get(&mut buf)).collect();
                Message::RegisterDevice(RegisterDevice {
                    email,
                    guid,
                    name,
                    soft_ver,
                    manufacturer_id,
                    product_id,
                    channels,
                })
            }

            Call::SdRegisterDeviceResult => {
                need(call, &buf, 7)?;
                Message::RegisterDeviceResult(RegisterDeviceResult {
                    result_code: buf.get_i32_le(),
                    activity_timeout: buf.get_u8(),
                    version: buf.get_u8(),
                    version_min: buf.get_u8(),
                })
            }

            Call::CsRegisterClient => {
                let fixed =
                    EMAIL_MAXSIZE + PASSWORD_MAXSIZE + 16 + DEVICE_NAME_MAXSIZE + SOFT_VER_MAXSIZE;
                need(call, &buf, fixed)?;
                let email = get_fixed_str(&mut buf, EMAIL_MAXSIZE, "email")?;
                let password = get_fixed_str(&mut buf, PASSWORD_MAXSIZE, "password")?;
                let guid = get_guid(&mut buf);
                let name = get_fixed_str(&mut buf, DEVICE_NAME_MAXSIZE, "name")?;
                let soft_ver = get_fixed_str(&mut buf, SOFT_VER_MAXSIZE, "soft_ver")?;
                Message::RegisterClient(RegisterClient {
                    email,
                    password,
                    guid,
                    name,
                    soft_ver,
                })
            }

            Call::ScRegisterClientResult => {
                need(call, &buf, 15)?;
                Message::RegisterClientResult(RegisterClientResult {
                    result_code: buf.get_i32_le(),
                    client_id: buf.get_i32_le(),
                    channel_count: buf.get_i32_le(),
                    activity_timeout: buf.get_u8(),
                    version: buf.get_u8(),
                    version_min: buf.get_u8(),
                })
            }

            Call::DsChannelValueChanged => {
                need(call, &buf, 9)?;
                let channel_number = buf.get_u8();
                let value = get_value(&mut buf);
                Message::ChannelValueChanged(DeviceChannelValue {
                    channel_number,
                    value,
                })
            }

            Call::SdChannelSetValue => {
                need(call, &buf, 17)?;
                let sender_id = buf.get_i32_le();
                let channel_number = buf.get_u8();
                let duration_ms = buf.get_u32_le();
                let value = get_value(&mut buf);
                Message::ChannelSetValue(ChannelNewValue {
                    sender_id,
                    channel_number,
                    duration_ms,
                    value,
                })
            }

            Call::DsChannelSetValueResult => {
                need(call, &buf, 6)?;
                Message::ChannelSetValueResult(ChannelNewValueResult {
                    channel_number: buf.get_u8(),
                    sender_id: buf.get_i32_le(),
                    success: buf.get_u8() != 0,
                })
            }

            Call::ScChannelSnapshot => {
                need(call, &buf, 5)?;
                let total_left = buf.get_i32_le();
                let count = buf.get_u8() as usize;
                if count > SNAPSHOT_PACK_MAXCOUNT {
                    return Err(Error::InvalidField {
                        field: "snapshot_count",
                        value: count as i64,
                    });
                }
                need(call, &buf, count * ChannelStateItem::SIZE)?;
                let items = (0..count).map(|_| ChannelStateItem::get(&mut buf)).collect();
                Message::ChannelSnapshot(ChannelSnapshot { total_left, items })
            }

            Call::ScChannelValueUpdate => {
                need(call, &buf, ChannelStateItem::SIZE)?;
                Message::ChannelValueUpdate(ChannelStateItem::get(&mut buf))
            }

            Call::CsSetChannelValue => {
                need(call, &buf, 25)?;
                let guid = get_guid(&mut buf);
                let channel_number = buf.get_u8();
                let value = get_value(&mut buf);
                Message::SetChannelValue(SetChannelValue {
                    guid,
                    channel_number,
                    value,
                })
            }

            Call::ScSetChannelResult => {
                need(call, &buf, 21)?;
                let guid = get_guid(&mut buf);
                let channel_number = buf.get_u8();
                let result_code = buf.get_i32_le();
                Message::SetChannelResult(SetChannelResult {
                    guid,
                    channel_number,
                    result_code,
                })
            }

            Call::DcsSetActivityTimeout => {
                need(call, &buf, 1)?;
                Message::SetActivityTimeout(SetActivityTimeout {
                    activity_timeout: buf.get_u8(),
                })
            }

            Call::SdcSetActivityTimeoutResult => {
                need(call, &buf, 3)?;
                Message::SetActivityTimeoutResult(SetActivityTimeoutResult {
                    activity_timeout: buf.get_u8(),
                    min: buf.get_u8(),
                    max: buf.get_u8(),
                })
            }
        };
        Ok(msg)
    }
}

fn need(call: Call, buf: &Bytes, needed: usize) -> Result<()> {
    if buf.len() < needed {
        return Err(Error::TruncatedPayload {
            call,
            needed,
            have: buf.len(),
        });
    }
    Ok(())
}

fn get_guid(buf: &mut Bytes) -> Guid {
    let mut bytes = [0u8; 16];
    buf.copy_to_slice(&mut bytes);
    Guid(bytes)
}

fn get_value(buf: &mut Bytes) -> [u8; 8] {
    let mut value = [0u8; 8];
    buf.copy_to_slice(&mut value);
    value
}

/// Write `s` into a fixed-size NUL-padded field, truncating to fit
/// with room for the terminator.
fn put_fixed_str(buf: &mut BytesMut, s: &str, size: usize) {
    let mut len = s.len().min(size - 1);
    // Never split a multibyte character at the cut
    while !s.is_char_boundary(len) {
        len -= 1;
    }
    buf.put_slice(&s.as_bytes()[..len]);
    buf.put_bytes(0, size - len);
}

/// Read a fixed-size NUL-padded string field; bytes after the first
/// NUL are ignored (devices leave garbage there).
fn get_fixed_str(buf: &mut Bytes, size: usize, field: &'static str) -> Result<String> {
    let raw = buf.split_to(size);
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    std::str::from_utf8(&raw[..end])
        .map(str::to_owned)
        .map_err(|_| Error::InvalidString(field))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeval_layout() {
        let msg = Message::PingServer(TimeVal {
            tv_sec: 1,
            tv_usec: 2,
        });
        let data = msg.encode().unwrap();
        assert_eq!(
            data.as_ref(),
            b"\x01\x00\x00\x00\x00\x00\x00\x00\x02\x00\x00\x00\x00\x00\x00\x00"
        );
    }

    #[test]
    fn register_device_result_layout() {
        let msg = Message::RegisterDeviceResult(RegisterDeviceResult {
            result_code: 3,
            activity_timeout: 2,
            version: 3,
            version_min: 4,
        });
        let data = msg.encode().unwrap();
        assert_eq!(data.as_ref(), b"\x03\x00\x00\x00\x02\x03\x04");
    }

    #[test]
    fn fixed_string_truncates_and_pads() {
        let mut buf = BytesMut::new();
        put_fixed_str(&mut buf, "foobar", 10);
        assert_eq!(buf.as_ref(), b"foobar\x00\x00\x00\x00");

        let mut data = Bytes::from_static(b"foo\x00123456");
        assert_eq!(get_fixed_str(&mut data, 10, "x").unwrap(), "foo");
    }

    #[test]
    fn fixed_string_truncates_on_char_boundary() {
        // 'é' would straddle the cut; it is dropped whole, not halved
        let mut buf = BytesMut::new();
        put_fixed_str(&mut buf, "abcé", 5);
        assert_eq!(buf.as_ref(), b"abc\x00\x00");

        let mut data = buf.freeze();
        assert_eq!(get_fixed_str(&mut data, 5, "x").unwrap(), "abc");
    }

    #[test]
    fn truncated_payload_detected() {
        let err = Message::decode(Call::DcsPingServer, Bytes::from_static(b"\x01\x02"));
        assert!(matches!(err, Err(Error::TruncatedPayload { .. })));
    }

    #[test]
    fn register_device_channel_count_limit() {
        let mut payload = BytesMut::new();
        put_fixed_str(&mut payload, "a@b.c", EMAIL_MAXSIZE);
        payload.put_slice(&[0u8; 16]);
        put_fixed_str(&mut payload, "dev", DEVICE_NAME_MAXSIZE);
        put_fixed_str(&mut payload, "1.0", SOFT_VER_MAXSIZE);
        payload.put_i16_le(0);
        payload.put_i16_le(0);
        payload.put_u8(200);
        let err = Message::decode(Call::DsRegisterDevice, payload.freeze());
        assert!(matches!(err, Err(Error::InvalidField { .. })));
    }
}
