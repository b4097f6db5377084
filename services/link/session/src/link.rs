//! Application-facing link API.
//!
//! [`Link::start`] spawns the supervisor and returns the owning [`Link`]
//! together with the event stream. Cloneable [`LinkHandle`]s submit sends
//! and observe state; each accepted send yields a [`Delivery`] that resolves
//! once the peer acknowledges the message or the link gives up on it.

use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::state::{ConnectionState, StateMachine};
use crate::stats::{LinkStats, StatsSnapshot};
use crate::supervisor::{Command, Supervisor};
use crate::transport::Connector;
use bytes::Bytes;
use link_wire::{Envelope, WireError, HEADER_SIZE};
use rand::Rng;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Notifications delivered to the application
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The connection state changed
    StateChanged {
        /// Previous state
        from: ConnectionState,
        /// New state
        to: ConnectionState,
    },
    /// A DATA message arrived for the first time
    MessageReceived {
        /// Sender-assigned message id
        id: u64,
        /// Application payload
        payload: Bytes,
    },
    /// A heartbeat was answered
    HeartbeatRtt {
        /// Measured round-trip time
        rtt: Duration,
    },
}

/// Pending outcome of one accepted send
#[derive(Debug)]
pub struct Delivery {
    id: u64,
    outcome: oneshot::Receiver<Result<u64, LinkError>>,
}

impl Delivery {
    /// Id assigned to the message
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait until the message is acknowledged (`Ok(id)`) or abandoned
    pub async fn outcome(self) -> Result<u64, LinkError> {
        self.outcome.await.unwrap_or(Err(LinkError::Cancelled))
    }
}

/// Cloneable handle for submitting sends and observing the link
#[derive(Debug, Clone)]
pub struct LinkHandle {
    commands: mpsc::Sender<Command>,
    next_id: Arc<AtomicU64>,
    stats: Arc<LinkStats>,
    state: watch::Receiver<ConnectionState>,
    shutdown: Arc<watch::Sender<bool>>,
    max_frame_size: usize,
}

impl LinkHandle {
    /// Queue `payload` for reliable delivery.
    ///
    /// Fails immediately with `BackpressureExceeded` when the send queue is
    /// full and with `Cancelled` once the link is shutting down.
    pub fn send(&self, payload: impl Into<Bytes>) -> Result<Delivery, LinkError> {
        let payload = payload.into();

        let frame_len = HEADER_SIZE + payload.len();
        if frame_len > self.max_frame_size {
            return Err(LinkError::MalformedFrame(WireError::Size(frame_len)));
        }
        if *self.shutdown.borrow() || self.state.borrow().is_terminal() {
            return Err(LinkError::Cancelled);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, outcome) = oneshot::channel();
        let command = Command::Send {
            envelope: Envelope::data(id, payload),
            reply,
        };

        match self.commands.try_send(command) {
            Ok(()) => Ok(Delivery { id, outcome }),
            Err(TrySendError::Full(_)) => {
                debug!("Send queue full; rejecting message {}", id);
                Err(LinkError::BackpressureExceeded)
            }
            Err(TrySendError::Closed(_)) => Err(LinkError::Cancelled),
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the link reaches `target`.
    ///
    /// Fails with `Cancelled` if the link closes first.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), LinkError> {
        let mut rx = self.state.clone();
        let reached = rx
            .wait_for(|state| *state == target || *state == ConnectionState::Closed)
            .await
            .map(|state| *state)
            .map_err(|_| LinkError::Cancelled)?;

        if reached == target {
            Ok(())
        } else {
            Err(LinkError::Cancelled)
        }
    }

    /// Point-in-time copy of the link counters
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Ask the supervisor to close the link without waiting for it
    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

/// Owner of a running link
#[derive(Debug)]
pub struct Link {
    handle: LinkHandle,
    task: JoinHandle<Result<(), LinkError>>,
}

impl Link {
    /// Validate `config` and spawn the supervisor on the current runtime
    pub fn start<C: Connector>(
        config: LinkConfig,
        connector: C,
    ) -> Result<(Self, mpsc::Receiver<LinkEvent>), LinkError> {
        config.validate()?;

        let (commands_tx, commands_rx) = mpsc::channel(config.send_queue_depth);
        let (events_tx, events_rx) = mpsc::channel(config.event_queue_depth);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state, state_rx) = StateMachine::new();
        let stats = Arc::new(LinkStats::new());

        let handle = LinkHandle {
            commands: commands_tx,
            next_id: Arc::new(AtomicU64::new(first_message_id())),
            stats: stats.clone(),
            state: state_rx,
            shutdown: Arc::new(shutdown_tx),
            max_frame_size: config.max_frame_size,
        };

        let supervisor = Supervisor::new(
            config,
            connector,
            state,
            stats,
            commands_rx,
            events_tx,
            shutdown_rx,
        );
        let task = tokio::spawn(supervisor.run());

        Ok((Self { handle, task }, events_rx))
    }

    /// A new handle to this link
    pub fn handle(&self) -> LinkHandle {
        self.handle.clone()
    }

    /// Request shutdown and wait for the supervisor to finish
    pub async fn shutdown(self) -> Result<(), LinkError> {
        self.handle.request_shutdown();
        self.join().await
    }

    /// Wait for the supervisor to finish on its own
    pub async fn join(self) -> Result<(), LinkError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                error!("Link supervisor task failed: {}", e);
                Err(LinkError::Cancelled)
            }
        }
    }
}

/// First message id of a new link.
///
/// The high 32 bits hold a random non-zero epoch so a restarted peer never
/// reuses ids the receiver still remembers; the low 32 bits count from 1.
fn first_message_id() -> u64 {
    let epoch: u32 = rand::thread_rng().gen_range(1..=u32::MAX);
    (u64::from(epoch) << 32) | 1
}

impl Deref for Link {
    type Target = LinkHandle;

    fn deref(&self) -> &LinkHandle {
        &self.handle
    }
}
