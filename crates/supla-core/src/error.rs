//! Error types for the SUPLA protocol core

use thiserror::Error;

use crate::Guid;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol error kinds.
///
/// `MalformedFrame` and `UnsupportedCall` are always fatal to the
/// connection that produced them; the codec never resynchronizes
/// mid-stream.
#[derive(Error, Debug)]
pub enum Error {
    /// Frame start/end tag or header is not valid
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Frame declares a protocol version this revision does not speak
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// Call id is not in the recognized call table
    #[error("unsupported call id {0}")]
    UnsupportedCall(u32),

    /// Declared payload length exceeds the sane maximum
    #[error("payload too large: {0} bytes (max {max})", max = crate::MAX_DATA_SIZE)]
    PayloadTooLarge(usize),

    /// Payload is shorter than the message layout requires
    #[error("truncated payload for {call:?}: need {needed} bytes, have {have}")]
    TruncatedPayload {
        call: crate::Call,
        needed: usize,
        have: usize,
    },

    /// Field value outside its legal range (enum discriminant, count, ...)
    #[error("invalid field {field}: {value}")]
    InvalidField { field: &'static str, value: i64 },

    /// String field is not valid UTF-8
    #[error("invalid string in field {0}")]
    InvalidString(&'static str),

    /// Not a 32-char hex GUID
    #[error("invalid guid: {0}")]
    InvalidGuid(String),

    /// Device GUID already registered and online
    #[error("device {0} already registered")]
    DuplicateDevice(Guid),

    /// Channel index not present in the device's registered set
    #[error("unknown channel {index} on device {guid}")]
    UnknownChannel { guid: Guid, index: u8 },

    /// Client access credential rejected
    #[error("authentication failure")]
    AuthenticationFailure,

    /// Command target device has no live session
    #[error("device {0} unavailable")]
    DeviceUnavailable(Guid),

    /// No traffic within the negotiated activity timeout
    #[error("heartbeat timeout")]
    HeartbeatTimeout,
}
