//! SUPLA protocol core
//!
//! Protocol primitives shared by the server and the device library:
//! - Binary frame encoding/decoding ([`Frame`])
//! - The supported call table ([`Call`])
//! - Message structs and payload codec ([`Message`], [`proto`])
//! - Typed channel values ([`ChannelValue`])
//!
//! The codec targets one consistent protocol revision; frames carrying
//! an unsupported version or an unknown call id are rejected rather
//! than ignored, so protocol drift surfaces as a connection error.

pub mod call;
pub mod error;
pub mod frame;
pub mod proto;
pub mod types;
pub mod value;

pub use call::Call;
pub use error::{Error, Result};
pub use frame::Frame;
pub use proto::Message;
pub use types::{ChannelFunc, ChannelType, ResultCode};
pub use value::ChannelValue;

/// Protocol version carried in every frame
pub const PROTO_VERSION: u8 = 19;

/// Oldest protocol version peers may negotiate down to
pub const PROTO_VERSION_MIN: u8 = 10;

/// Start/end tag bracketing every frame on the wire
pub const FRAME_TAG: &[u8; 5] = b"SUPLA";

/// Default plain TCP port
pub const DEFAULT_PORT: u16 = 2015;

/// Default TLS port
pub const DEFAULT_TLS_PORT: u16 = 2016;

/// Hard cap on a frame's declared payload size
pub const MAX_DATA_SIZE: usize = 10_240;

/// Activity (heartbeat) timeout bounds, seconds
pub const ACTIVITY_TIMEOUT_MIN: u8 = 30;
pub const ACTIVITY_TIMEOUT_MAX: u8 = 240;
pub const ACTIVITY_TIMEOUT_DEFAULT: u8 = 120;

/// Maximum channels a single device may register
pub const MAX_CHANNELS: usize = 32;

/// Globally unique 16-byte device identifier, the registry key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Guid(pub [u8; 16]);

impl Guid {
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Parse from a 32-char hex string (config files use this form).
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != 32 {
            return Err(Error::InvalidGuid(s.to_string()));
        }
        let mut bytes = [0u8; 16];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| Error::InvalidGuid(s.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

impl std::fmt::Display for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Guid({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_hex_roundtrip() {
        let guid = Guid::from_hex("eeeeeeeee534d1a706ac5f416719899e").unwrap();
        assert_eq!(guid.to_string(), "eeeeeeeee534d1a706ac5f416719899e");
        assert_eq!(guid.0[0], 0xee);
        assert_eq!(guid.0[15], 0x9e);
    }

    #[test]
    fn guid_rejects_bad_input() {
        assert!(Guid::from_hex("too short").is_err());
        assert!(Guid::from_hex("zzeeeeeee534d1a706ac5f416719899e").is_err());
    }
}
