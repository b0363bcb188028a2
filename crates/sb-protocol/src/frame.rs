//! Frame header encoding/decoding
//!
//! The frame format uses a 13-byte header:
//! - correlation_id: 8 bytes (u64, big-endian)
//! - frame_kind: 1 byte (u8)
//! - payload_length: 4 bytes (u32, big-endian, bounded by MAX_PAYLOAD_SIZE)

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::ids::CorrelationId;
use crate::message::FrameKind;

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 13;

/// Maximum payload size (16 MiB)
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Frame header containing correlation and length information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Correlation id pairing this frame with a call (or `EVENT` for
    /// unsolicited frames)
    pub correlation_id: CorrelationId,
    /// Kind of frame in the payload
    pub frame_kind: FrameKind,
    /// Length of the payload in bytes
    pub payload_length: u32,
}

impl FrameHeader {
    /// Create a new frame header
    pub fn new(correlation_id: CorrelationId, frame_kind: FrameKind, payload_length: u32) -> Self {
        Self {
            correlation_id,
            frame_kind,
            payload_length,
        }
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u64(self.correlation_id.as_u64());
        dst.put_u8(self.frame_kind.as_u8());
        dst.put_u32(self.payload_length);
    }

    /// Decode a header from a byte buffer
    ///
    /// Returns None if there aren't enough bytes in the buffer.
    /// Returns Err if the header is invalid (unknown frame kind).
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Peek at the kind byte first to validate
        let kind_byte = src[8];
        let frame_kind =
            FrameKind::from_u8(kind_byte).ok_or(ProtocolError::UnknownFrameKind(kind_byte))?;

        // Now consume the bytes
        let correlation_id = CorrelationId::new(src.get_u64());
        let _ = src.get_u8(); // frame_kind already parsed
        let payload_length = src.get_u32();

        Ok(Some(Self {
            correlation_id,
            frame_kind,
            payload_length,
        }))
    }
}
