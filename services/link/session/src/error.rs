//! Error types for the link session layer.

use crate::state::ConnectionState;
use link_wire::WireError;
use thiserror::Error;

/// Errors surfaced by the framed channel, the supervisor and the link API
#[derive(Error, Debug)]
pub enum LinkError {
    /// The transport ended, possibly in the middle of a frame
    #[error("channel closed")]
    ChannelClosed,

    /// The peer violated the framing protocol; the connection is torn down
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] WireError),

    /// Reconnection attempts were exhausted
    #[error("connection failed after {attempts} attempts")]
    ConnectionFailed {
        /// Number of connection attempts made
        attempts: u32,
    },

    /// A message exhausted its retry budget without being acknowledged
    #[error("delivery failed for message {id}")]
    DeliveryFailed {
        /// Identifier of the undelivered message
        id: u64,
    },

    /// The send queue is full
    #[error("send queue full")]
    BackpressureExceeded,

    /// The link is shutting down
    #[error("cancelled")]
    Cancelled,

    /// Transport I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Rejected connection state change
    #[error("invalid state transition {from:?} -> {to:?}")]
    InvalidTransition {
        /// State before the attempted change
        from: ConnectionState,
        /// Requested state
        to: ConnectionState,
    },

    /// Configuration rejected by validation
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl LinkError {
    /// Whether this error means the transport must be replaced
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            LinkError::ChannelClosed | LinkError::MalformedFrame(_) | LinkError::Io(_)
        )
    }
}
