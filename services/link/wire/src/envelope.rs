//! Envelopes and their framing on the byte stream.
//!
//! An [`Envelope`] is the logical unit exchanged by two link endpoints. This
//! module encodes envelopes into contiguous frames and incrementally decodes
//! them from a stream buffer that may hold partial or multiple frames.

use crate::header::{EnvelopeHeader, EnvelopeKind, HEADER_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum frame size (16 MiB default, 64 MiB hard limit)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
/// Hard maximum frame size limit (64 MiB)
pub const HARD_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Current wall-clock time in microseconds since the Unix epoch
pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

/// Logical unit of communication between two link endpoints.
///
/// `id` and `kind` are fixed at construction. An ACK carries the id of the
/// DATA envelope it acknowledges; a HEARTBEAT_ACK echoes the id and
/// timestamp of the HEARTBEAT it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    id: u64,
    kind: EnvelopeKind,
    payload: Bytes,
    sent_at: u64,
}

impl Envelope {
    /// Create an envelope of any kind
    pub fn new(kind: EnvelopeKind, id: u64, payload: Bytes) -> Self {
        Self {
            id,
            kind,
            payload,
            sent_at: now_micros(),
        }
    }

    /// Create a DATA envelope
    pub fn data(id: u64, payload: impl Into<Bytes>) -> Self {
        Self::new(EnvelopeKind::Data, id, payload.into())
    }

    /// Create an ACK for the DATA envelope `acked_id`
    pub fn ack(acked_id: u64) -> Self {
        Self::new(EnvelopeKind::Ack, acked_id, Bytes::new())
    }

    /// Create a HEARTBEAT with sequence number `seq`
    pub fn heartbeat(seq: u64) -> Self {
        Self::new(EnvelopeKind::Heartbeat, seq, Bytes::new())
    }

    /// Create the HEARTBEAT_ACK answering `heartbeat`
    pub fn heartbeat_ack(heartbeat: &Envelope) -> Self {
        Self {
            id: heartbeat.id,
            kind: EnvelopeKind::HeartbeatAck,
            payload: Bytes::new(),
            sent_at: heartbeat.sent_at,
        }
    }

    /// Envelope identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Envelope kind
    pub fn kind(&self) -> EnvelopeKind {
        self.kind
    }

    /// Payload bytes
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consume the envelope, returning its payload
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Send timestamp in microseconds since the Unix epoch
    pub fn sent_at(&self) -> u64 {
        self.sent_at
    }

    /// Refresh the send timestamp before a (re)transmission
    pub fn touch(&mut self) {
        self.sent_at = now_micros();
    }

    /// Header describing this envelope on the wire
    pub fn header(&self) -> EnvelopeHeader {
        EnvelopeHeader {
            kind: self.kind,
            id: self.id,
            sent_at: self.sent_at,
            payload_len: self.payload.len() as u32,
        }
    }

    /// Get the total frame size when encoded
    pub fn encoded_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encode envelope to a contiguous buffer
    pub fn encode(&self, max_frame_size: usize) -> Result<Bytes, crate::WireError> {
        let total_size = self.encoded_size();
        if total_size > max_frame_size || self.payload.len() > u32::MAX as usize {
            return Err(crate::WireError::Size(total_size));
        }

        let mut buf = BytesMut::with_capacity(total_size);
        self.header().encode(&mut buf);
        buf.put_slice(&self.payload);

        Ok(buf.freeze())
    }
}

/// Incremental envelope decoder for a stream buffer
#[derive(Debug)]
pub struct EnvelopeDecoder {
    max_frame_size: usize,
}

impl EnvelopeDecoder {
    /// Create a new decoder with the default frame size limit
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a decoder with a custom frame size limit (clamped to the hard limit)
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(HARD_MAX_FRAME_SIZE),
        }
    }

    /// Configured frame size limit
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Decode one envelope from the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed; the buffer is left
    /// untouched in that case. The header is validated as soon as it is
    /// complete, so an unknown kind or oversized length is reported before
    /// the payload arrives.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Envelope>, crate::WireError> {
        let header = match EnvelopeHeader::peek(buf)? {
            Some(header) => header,
            None => return Ok(None),
        };

        let frame_len = header.frame_len();
        if frame_len > self.max_frame_size {
            return Err(crate::WireError::Size(frame_len));
        }

        if buf.len() < frame_len {
            // Reserve up front so large payloads don't regrow repeatedly
            buf.reserve(frame_len - buf.len());
            return Ok(None);
        }

        buf.advance(HEADER_SIZE);
        let payload = buf.split_to(header.payload_len as usize).freeze();

        Ok(Some(Envelope {
            id: header.id,
            kind: header.kind,
            payload,
            sent_at: header.sent_at,
        }))
    }
}

impl Default for EnvelopeDecoder {
    fn default() -> Self {
        Self::new()
    }
}
