//! Envelope model and wire framing for the reliable link.
//!
//! This crate provides the low-level wire format used by the link: a fixed
//! header that carries the envelope kind, identifier, timestamp and payload
//! length, followed by the opaque payload bytes.
//!
//! ## Features
//!
//! - **Fixed Header**: 21-byte header, kind and id readable before the payload
//! - **Zero-Copy I/O**: Uses `Bytes`/`BytesMut` for minimal allocations
//! - **Incremental Decoding**: Reassembles envelopes from arbitrary stream chunks
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | u8  kind             | DATA/ACK/HEARTBEAT/HB_ACK  |
//! +----------------------+----------------------------+
//! | u64 id               | envelope identifier        |
//! +----------------------+----------------------------+
//! | u64 sent_at          | microseconds since epoch   |
//! +----------------------+----------------------------+
//! | u32 payload_len      | length of bytes that follow|
//! +----------------------+----------------------------+
//! | payload              | variable (0..N)            |
//! +----------------------+----------------------------+
//! ```
//!
//! All integers are big-endian.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod envelope;
pub mod error;
pub mod header;

// Re-export main types
pub use envelope::{now_micros, Envelope, EnvelopeDecoder, DEFAULT_MAX_FRAME_SIZE, HARD_MAX_FRAME_SIZE};
pub use error::WireError;
pub use header::{EnvelopeHeader, EnvelopeKind, HEADER_SIZE};
