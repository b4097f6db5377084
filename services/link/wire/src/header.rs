//! Fixed envelope header for the wire protocol.
//!
//! This module defines the 21-byte header that precedes every payload. The
//! kind and id sit in front of the length so a reader can classify a frame
//! before the payload has been buffered.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

/// Header size in bytes
pub const HEADER_SIZE: usize = 21;

/// Envelope kinds as defined in the wire protocol
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnvelopeKind {
    /// Application data, must be acknowledged
    Data = 0x01,
    /// Acknowledgment of a DATA envelope
    Ack = 0x02,
    /// Liveness probe
    Heartbeat = 0x03,
    /// Reply to a liveness probe
    HeartbeatAck = 0x04,
}

impl EnvelopeKind {
    /// Whether this kind is a control envelope (everything except DATA)
    pub fn is_control(self) -> bool {
        !matches!(self, EnvelopeKind::Data)
    }
}

impl TryFrom<u8> for EnvelopeKind {
    type Error = crate::WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(EnvelopeKind::Data),
            0x02 => Ok(EnvelopeKind::Ack),
            0x03 => Ok(EnvelopeKind::Heartbeat),
            0x04 => Ok(EnvelopeKind::HeartbeatAck),
            _ => Err(crate::WireError::Kind(value)),
        }
    }
}

/// Fixed header preceding each payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeHeader {
    /// Envelope kind
    pub kind: EnvelopeKind,
    /// Envelope identifier
    pub id: u64,
    /// Send timestamp, microseconds since the Unix epoch
    pub sent_at: u64,
    /// Length of the payload that follows
    pub payload_len: u32,
}

impl EnvelopeHeader {
    /// Encode header to buffer
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.kind as u8);
        buf.put_u64(self.id);
        buf.put_u64(self.sent_at);
        buf.put_u32(self.payload_len);
    }

    /// Decode a header from the front of `buf` without consuming it.
    ///
    /// Returns `Ok(None)` until `HEADER_SIZE` bytes are available.
    pub fn peek(buf: &[u8]) -> Result<Option<Self>, crate::WireError> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let mut cursor = &buf[..HEADER_SIZE];
        let kind = EnvelopeKind::try_from(cursor.get_u8())?;
        let id = cursor.get_u64();
        let sent_at = cursor.get_u64();
        let payload_len = cursor.get_u32();

        Ok(Some(Self {
            kind,
            id,
            sent_at,
            payload_len,
        }))
    }

    /// Total encoded size of the frame this header describes
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.payload_len as usize
    }
}
