//! Connection state machine owned by the supervisor.

use crate::error::LinkError;
use serde::Serialize;
use std::fmt;
use tokio::sync::watch;
use tracing::debug;

/// Lifecycle state of the supervised connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConnectionState {
    /// No transport, not currently dialing
    Disconnected,
    /// Establishing a transport
    Connecting,
    /// Transport up and heartbeats answered
    Connected,
    /// Heartbeats missed; reconnection pending
    Degraded,
    /// Shutdown in progress
    Closing,
    /// Terminal state
    Closed,
}

impl ConnectionState {
    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, next) {
            (Disconnected, Connecting) => true,
            (Connecting, Connected) | (Connecting, Disconnected) => true,
            (Connected, Degraded) | (Connected, Disconnected) => true,
            (Degraded, Connected) | (Degraded, Connecting) | (Degraded, Disconnected) => true,
            (Closing, Closed) => true,
            (Closing, _) | (Closed, _) => false,
            (_, Closing) => true,
            _ => false,
        }
    }

    /// Whether sends are drained onto the transport in this state
    pub fn accepts_traffic(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Whether the link has begun or finished shutting down
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closing | ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Degraded => "DEGRADED",
            ConnectionState::Closing => "CLOSING",
            ConnectionState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Validating holder of the current state, published through a watch channel
#[derive(Debug)]
pub struct StateMachine {
    current: ConnectionState,
    tx: watch::Sender<ConnectionState>,
}

impl StateMachine {
    /// Create a machine in `Disconnected`, returning the observer side
    pub fn new() -> (Self, watch::Receiver<ConnectionState>) {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        (
            Self {
                current: ConnectionState::Disconnected,
                tx,
            },
            rx,
        )
    }

    /// Current state
    pub fn current(&self) -> ConnectionState {
        self.current
    }

    /// Move to `next`, returning the previous state
    pub fn transition(&mut self, next: ConnectionState) -> Result<ConnectionState, LinkError> {
        let from = self.current;
        if !from.can_transition_to(next) {
            return Err(LinkError::InvalidTransition { from, to: next });
        }

        debug!("Connection state {} -> {}", from, next);
        self.current = next;
        // Receivers may all be gone; the state is still tracked locally
        let _ = self.tx.send(next);
        Ok(from)
    }
}
