//! Binary frame encoding/decoding
//!
//! SUPLA frame format:
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │ Bytes 0-4:   Start tag "SUPLA"                         │
//! │ Byte 5:      Protocol version                          │
//! │ Bytes 6-9:   rr_id (uint32 little-endian)              │
//! │ Bytes 10-13: Call id (uint32 little-endian)            │
//! │ Bytes 14-17: Payload length (uint32 LE, max 10240)     │
//! ├────────────────────────────────────────────────────────┤
//! │ Payload                                                │
//! ├────────────────────────────────────────────────────────┤
//! │ End tag "SUPLA"                                        │
//! └────────────────────────────────────────────────────────┘
//! ```

use crate::{Call, Error, Result, FRAME_TAG, MAX_DATA_SIZE, PROTO_VERSION, PROTO_VERSION_MIN};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Fixed header size: tag + version + rr_id + call_id + data_size
pub const HEADER_SIZE: usize = 5 + 1 + 4 + 4 + 4;

/// End tag size
pub const TRAILER_SIZE: usize = 5;

/// One length-delimited protocol message on the wire.
#[derive(Debug, Clone)]
pub struct Frame {
    pub version: u8,
    pub rr_id: u32,
    pub call_id: u32,
    pub data: Bytes,
}

impl Frame {
    /// Create a frame for a recognized call at the current version.
    pub fn new(rr_id: u32, call: Call, data: impl Into<Bytes>) -> Self {
        Self {
            version: PROTO_VERSION,
            rr_id,
            call_id: call as u32,
            data: data.into(),
        }
    }

    /// The call this frame carries, if it is in the recognized set.
    pub fn call(&self) -> Result<Call> {
        Call::from_u32(self.call_id).ok_or(Error::UnsupportedCall(self.call_id))
    }

    /// Total on-wire size of this frame.
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.data.len() + TRAILER_SIZE
    }

    /// Encode to bytes.
    pub fn encode(&self) -> Result<Bytes> {
        if self.data.len() > MAX_DATA_SIZE {
            return Err(Error::PayloadTooLarge(self.data.len()));
        }

        let mut buf = BytesMut::with_capacity(self.size());
        buf.put_slice(FRAME_TAG);
        buf.put_u8(self.version);
        buf.put_u32_le(self.rr_id);
        buf.put_u32_le(self.call_id);
        buf.put_u32_le(self.data.len() as u32);
        buf.extend_from_slice(&self.data);
        buf.put_slice(FRAME_TAG);
        Ok(buf.freeze())
    }

    /// Check whether `buf` starts with a complete frame.
    ///
    /// Returns the frame's total size once enough bytes have arrived,
    /// `Ok(None)` while the stream is still short, and an error when
    /// the bytes so far can never become a valid frame. Never blocks;
    /// the caller re-invokes as more bytes arrive.
    pub fn check(buf: &[u8]) -> Result<Option<usize>> {
        let tag_len = buf.len().min(FRAME_TAG.len());
        if buf[..tag_len] != FRAME_TAG[..tag_len] {
            return Err(Error::MalformedFrame("incorrect start tag".into()));
        }
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let version = buf[5];
        if version > PROTO_VERSION || version < PROTO_VERSION_MIN {
            return Err(Error::UnsupportedVersion(version));
        }

        let data_size = u32::from_le_bytes([buf[14], buf[15], buf[16], buf[17]]) as usize;
        if data_size > MAX_DATA_SIZE {
            return Err(Error::PayloadTooLarge(data_size));
        }

        let total = HEADER_SIZE + data_size + TRAILER_SIZE;
        if buf.len() < total {
            return Ok(None);
        }

        if &buf[total - TRAILER_SIZE..total] != FRAME_TAG {
            return Err(Error::MalformedFrame("incorrect end tag".into()));
        }
        Ok(Some(total))
    }

    /// Decode one complete frame from the front of `buf`.
    ///
    /// `buf` must hold at least the size previously reported by
    /// [`Frame::check`]; the frame's bytes are consumed from it.
    pub fn decode(buf: &mut BytesMut) -> Result<Self> {
        let total = match Self::check(buf)? {
            Some(total) => total,
            None => {
                return Err(Error::MalformedFrame("decode on incomplete frame".into()));
            }
        };

        let mut frame = buf.split_to(total);
        frame.advance(FRAME_TAG.len());
        let version = frame.get_u8();
        let rr_id = frame.get_u32_le();
        let call_id = frame.get_u32_le();
        let data_size = frame.get_u32_le() as usize;
        let data = frame.split_to(data_size).freeze();

        // reject drift here so session code only ever sees known calls
        if Call::from_u32(call_id).is_none() {
            return Err(Error::UnsupportedCall(call_id));
        }

        Ok(Self {
            version,
            rr_id,
            call_id,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_encode_decode() {
        let frame = Frame::new(42, Call::DcsPingServer, Bytes::from_static(b"\x01\x02\x03\x04"));
        let encoded = frame.encode().unwrap();
        assert_eq!(&encoded[..5], b"SUPLA");
        assert_eq!(encoded[5], PROTO_VERSION);
        assert_eq!(&encoded[encoded.len() - 5..], b"SUPLA");

        let mut buf = BytesMut::from(&encoded[..]);
        let decoded = Frame::decode(&mut buf).unwrap();
        assert_eq!(decoded.rr_id, 42);
        assert_eq!(decoded.call().unwrap(), Call::DcsPingServer);
        assert_eq!(decoded.data.as_ref(), b"\x01\x02\x03\x04");
        assert!(buf.is_empty());
    }

    #[test]
    fn check_incomplete() {
        let frame = Frame::new(1, Call::DcsPingServer, Bytes::from_static(b"test"));
        let encoded = frame.encode().unwrap();

        assert_eq!(Frame::check(&encoded).unwrap(), Some(encoded.len()));
        for cut in 0..encoded.len() {
            assert_eq!(Frame::check(&encoded[..cut]).unwrap(), None, "cut at {cut}");
        }
    }

    #[test]
    fn check_bad_start_tag() {
        assert!(matches!(
            Frame::check(b"SPULA\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00"),
            Err(Error::MalformedFrame(_))
        ));
        // a wrong tag is detected as soon as the bytes diverge
        assert!(Frame::check(b"SP").is_err());
    }

    #[test]
    fn check_bad_end_tag() {
        let frame = Frame::new(1, Call::DcsPingServer, Bytes::from_static(b"test"));
        let mut encoded = BytesMut::from(&frame.encode().unwrap()[..]);
        let len = encoded.len();
        encoded[len - 5..].copy_from_slice(b"SPULA");
        assert!(matches!(
            Frame::check(&encoded),
            Err(Error::MalformedFrame(_))
        ));
    }

    #[test]
    fn check_unsupported_version() {
        let frame = Frame {
            version: 2,
            rr_id: 1,
            call_id: Call::DcsPingServer as u32,
            data: Bytes::new(),
        };
        let encoded = frame.encode().unwrap();
        assert!(matches!(
            Frame::check(&encoded),
            Err(Error::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn decode_unknown_call() {
        let frame = Frame {
            version: PROTO_VERSION,
            rr_id: 1,
            call_id: 9999,
            data: Bytes::new(),
        };
        let mut buf = BytesMut::from(&frame.encode().unwrap()[..]);
        assert!(matches!(
            Frame::decode(&mut buf),
            Err(Error::UnsupportedCall(9999))
        ));
    }

    #[test]
    fn oversize_payload_rejected() {
        let frame = Frame::new(
            1,
            Call::DcsPingServer,
            Bytes::from(vec![0u8; MAX_DATA_SIZE + 1]),
        );
        assert!(matches!(frame.encode(), Err(Error::PayloadTooLarge(_))));

        let mut header = Vec::from(&b"SUPLA"[..]);
        header.push(PROTO_VERSION);
        header.extend_from_slice(&1u32.to_le_bytes());
        header.extend_from_slice(&(Call::DcsPingServer as u32).to_le_bytes());
        header.extend_from_slice(&(MAX_DATA_SIZE as u32 + 1).to_le_bytes());
        assert!(matches!(
            Frame::check(&header),
            Err(Error::PayloadTooLarge(_))
        ));
    }
}
