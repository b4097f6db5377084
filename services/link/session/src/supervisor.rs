//! The connection supervisor.
//!
//! A single task owns every piece of mutable link state: the state machine,
//! the pending tracker, the liveness monitor and the dedup window. It dials
//! through a [`Connector`], serves one transport at a time and redials with
//! exponential backoff when the transport fails or the peer stops answering
//! heartbeats. Application handles talk to it over channels only.

use crate::channel::{FramedChannel, FramedReader, FramedWriter};
use crate::config::LinkConfig;
use crate::dedup::DedupWindow;
use crate::error::LinkError;
use crate::link::LinkEvent;
use crate::liveness::{Liveness, LivenessMonitor};
use crate::state::{ConnectionState, StateMachine};
use crate::stats::LinkStats;
use crate::tracker::PendingTracker;
use crate::transport::Connector;
use link_wire::{Envelope, EnvelopeKind};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

/// Resolves a [`crate::Delivery`]
pub(crate) type DeliveryReply = oneshot::Sender<Result<u64, LinkError>>;

/// Requests from application handles
#[derive(Debug)]
pub(crate) enum Command {
    /// Transmit a DATA envelope and report its outcome
    Send {
        envelope: Envelope,
        reply: DeliveryReply,
    },
}

/// Traffic from the I/O tasks of the current transport
#[derive(Debug)]
enum Inbound {
    Envelope(Envelope),
    Failed(LinkError),
}

/// Why serving a transport stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServeExit {
    Shutdown,
    Reconnect,
}

pub(crate) struct Supervisor<C: Connector> {
    config: LinkConfig,
    connector: C,
    state: StateMachine,
    tracker: PendingTracker,
    waiters: HashMap<u64, DeliveryReply>,
    dedup: DedupWindow,
    monitor: LivenessMonitor,
    stats: Arc<LinkStats>,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<LinkEvent>,
    shutdown: watch::Receiver<bool>,
    grace_deadline: Option<tokio::time::Instant>,
    connections: u64,
}

impl<C: Connector> Supervisor<C> {
    pub(crate) fn new(
        config: LinkConfig,
        connector: C,
        state: StateMachine,
        stats: Arc<LinkStats>,
        commands: mpsc::Receiver<Command>,
        events: mpsc::Sender<LinkEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            tracker: PendingTracker::new(config.retry_policy()),
            dedup: DedupWindow::new(config.dedup_window),
            monitor: LivenessMonitor::new(config.heartbeat_miss_threshold),
            config,
            connector,
            state,
            waiters: HashMap::new(),
            stats,
            commands,
            events,
            shutdown,
            grace_deadline: None,
            connections: 0,
        }
    }

    /// Drive the link until shutdown or until reconnection is exhausted
    pub(crate) async fn run(mut self) -> Result<(), LinkError> {
        info!("Link supervisor started for {}", self.connector.describe());

        loop {
            let stream = match self.establish().await {
                Ok(Some(stream)) => stream,
                Ok(None) => {
                    self.close(|| LinkError::Cancelled);
                    return Ok(());
                }
                Err(e) => {
                    error!("Giving up on {}: {}", self.connector.describe(), e);
                    let attempts = self.config.reconnect_max_attempts;
                    self.close(|| LinkError::ConnectionFailed { attempts });
                    return Err(e);
                }
            };

            match self.serve(stream).await {
                ServeExit::Shutdown => {
                    self.close(|| LinkError::Cancelled);
                    return Ok(());
                }
                ServeExit::Reconnect => {
                    debug!("Transport to {} lost; reconnecting", self.connector.describe());
                }
            }
        }
    }

    /// Dial until a transport is up. `None` means shutdown was requested.
    async fn establish(&mut self) -> Result<Option<C::Stream>, LinkError> {
        let max_attempts = self.config.reconnect_max_attempts;

        for attempt in 1..=max_attempts {
            self.set_state(ConnectionState::Connecting);
            info!(
                "Connecting to {} (attempt {}/{})",
                self.connector.describe(),
                attempt,
                max_attempts
            );

            let result = tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => return Ok(None),
                result = self.connector.connect() => result,
            };

            match result {
                Ok(stream) => {
                    self.set_state(ConnectionState::Connected);
                    self.connections += 1;
                    if self.connections > 1 {
                        self.stats.inc_reconnections();
                    }
                    info!("Connected to {}", self.connector.describe());
                    return Ok(Some(stream));
                }
                Err(e) => {
                    self.stats.inc_errors();
                    self.set_state(ConnectionState::Disconnected);

                    if attempt == max_attempts {
                        warn!("Failed to connect to {}: {}", self.connector.describe(), e);
                        break;
                    }

                    let delay = backoff_delay(&self.config, attempt);
                    warn!(
                        "Failed to connect to {}: {}; retrying in {:?}",
                        self.connector.describe(),
                        e,
                        delay
                    );

                    tokio::select! {
                        biased;
                        _ = shutdown_requested(&mut self.shutdown) => return Ok(None),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        Err(LinkError::ConnectionFailed {
            attempts: max_attempts,
        })
    }

    /// Run one transport until it fails, the peer goes quiet or shutdown
    async fn serve(&mut self, stream: C::Stream) -> ServeExit {
        let channel = FramedChannel::with_max_frame_size(stream, self.config.max_frame_size);
        let (reader, writer) = channel.into_split();

        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (data_tx, data_rx) = mpsc::unbounded_channel();

        let reader_task = tokio::spawn(read_loop(reader, inbound_tx.clone(), control_tx.clone()));
        let writer_task = tokio::spawn(write_loop(writer, control_rx, data_rx, inbound_tx));

        self.monitor.reset();
        self.grace_deadline = None;

        // Pending messages from the previous transport go out before new sends
        let replayed = self.tracker.replay(Instant::now());
        if !replayed.is_empty() {
            info!("Replaying {} unacknowledged message(s)", replayed.len());
            self.stats.add_retransmissions(replayed.len() as u64);
            for envelope in replayed {
                let _ = data_tx.send(envelope);
            }
        }

        let mut retry_tick = tokio::time::interval(self.config.tick_interval);
        retry_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let heartbeat_every = self.config.heartbeat_interval;
        let mut heartbeat_tick =
            tokio::time::interval_at(tokio::time::Instant::now() + heartbeat_every, heartbeat_every);
        heartbeat_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = loop {
            tokio::select! {
                biased;

                _ = shutdown_requested(&mut self.shutdown) => break ServeExit::Shutdown,

                inbound = inbound_rx.recv() => match inbound {
                    Some(Inbound::Envelope(envelope)) => {
                        if let Some(exit) = self.handle_envelope(envelope, &control_tx).await {
                            break exit;
                        }
                    }
                    Some(Inbound::Failed(e)) => {
                        self.on_transport_failure(e);
                        break ServeExit::Reconnect;
                    }
                    None => {
                        self.on_transport_failure(LinkError::ChannelClosed);
                        break ServeExit::Reconnect;
                    }
                },

                _ = tokio::time::sleep_until(
                    self.grace_deadline.unwrap_or_else(tokio::time::Instant::now)
                ), if self.grace_deadline.is_some() => {
                    warn!(
                        "No heartbeat reply from {} within {:?}; reconnecting",
                        self.connector.describe(),
                        self.config.degraded_grace
                    );
                    break ServeExit::Reconnect;
                }

                _ = heartbeat_tick.tick(), if self.state.current() == ConnectionState::Connected => {
                    match self.monitor.on_tick(Instant::now()) {
                        Liveness::Heartbeat(envelope) => {
                            trace!("Sending heartbeat {}", envelope.id());
                            if control_tx.send(envelope).is_ok() {
                                self.stats.inc_heartbeats_sent();
                            }
                        }
                        Liveness::Unreachable { missed } => {
                            warn!(
                                "{} missed {} heartbeats; link degraded",
                                self.connector.describe(),
                                missed
                            );
                            self.set_state(ConnectionState::Degraded);
                            self.grace_deadline =
                                Some(tokio::time::Instant::now() + self.config.degraded_grace);
                        }
                    }
                }

                _ = retry_tick.tick() => self.on_retry_tick(&data_tx),

                Some(command) = self.commands.recv(), if self.state.current().accepts_traffic() => {
                    match command {
                        Command::Send { envelope, reply } => {
                            let id = envelope.id();
                            let envelope = self.tracker.track(envelope, Instant::now());
                            self.waiters.insert(id, reply);
                            self.stats.inc_messages_sent();
                            let _ = data_tx.send(envelope);
                        }
                    }
                }
            }
        };

        // Both I/O tasks must be gone before another transport is opened
        reader_task.abort();
        writer_task.abort();
        let _ = reader_task.await;
        let _ = writer_task.await;
        self.grace_deadline = None;

        exit
    }

    /// Dispatch one inbound envelope. `Some` means serving must stop.
    async fn handle_envelope(
        &mut self,
        envelope: Envelope,
        control_tx: &mpsc::UnboundedSender<Envelope>,
    ) -> Option<ServeExit> {
        let id = envelope.id();

        match envelope.kind() {
            EnvelopeKind::Data => {
                if self.dedup.insert(id) {
                    self.stats.inc_messages_received();
                    let event = LinkEvent::MessageReceived {
                        id,
                        payload: envelope.into_payload(),
                    };
                    // A stalled event consumer must not block shutdown
                    tokio::select! {
                        biased;
                        _ = shutdown_requested(&mut self.shutdown) => {
                            debug!("Shutdown while delivering message {}; not acknowledged", id);
                            return Some(ServeExit::Shutdown);
                        }
                        sent = self.events.send(event) => {
                            if sent.is_err() {
                                trace!("Event receiver dropped; message {} discarded", id);
                            }
                        }
                    }
                } else {
                    self.stats.inc_duplicates();
                    debug!("Duplicate message {}; re-acknowledging", id);
                }

                if control_tx.send(Envelope::ack(id)).is_ok() {
                    self.stats.inc_acks_sent();
                }
            }

            EnvelopeKind::Ack => {
                self.stats.inc_acks_received();
                if self.tracker.on_ack(id).is_some() {
                    if let Some(waiter) = self.waiters.remove(&id) {
                        let _ = waiter.send(Ok(id));
                    }
                }
            }

            EnvelopeKind::HeartbeatAck => {
                if let Some(rtt) = self.monitor.on_heartbeat_ack(id, Instant::now()) {
                    self.stats.record_rtt(rtt);
                    trace!("Heartbeat {} RTT {:?}", id, rtt);
                    let _ = self.events.try_send(LinkEvent::HeartbeatRtt { rtt });
                }

                if self.state.current() == ConnectionState::Degraded {
                    info!("{} answered again; link recovered", self.connector.describe());
                    self.grace_deadline = None;
                    self.set_state(ConnectionState::Connected);
                }
            }

            EnvelopeKind::Heartbeat => {
                // Normally answered by the reader task
                let _ = control_tx.send(Envelope::heartbeat_ack(&envelope));
            }
        }

        None
    }

    fn on_retry_tick(&mut self, data_tx: &mpsc::UnboundedSender<Envelope>) {
        let outcome = self.tracker.tick(Instant::now());

        if !outcome.retransmit.is_empty() {
            self.stats.add_retransmissions(outcome.retransmit.len() as u64);
            for envelope in outcome.retransmit {
                let _ = data_tx.send(envelope);
            }
        }

        for id in outcome.failed {
            self.stats.inc_delivery_failures();
            if let Some(waiter) = self.waiters.remove(&id) {
                let _ = waiter.send(Err(LinkError::DeliveryFailed { id }));
            }
        }
    }

    fn on_transport_failure(&mut self, e: LinkError) {
        match &e {
            LinkError::ChannelClosed => info!("{} closed the connection", self.connector.describe()),
            LinkError::MalformedFrame(cause) => warn!(
                "Protocol violation from {}: {}; dropping connection",
                self.connector.describe(),
                cause
            ),
            _ => warn!("Transport to {} failed: {}", self.connector.describe(), e),
        }

        self.stats.inc_errors();
        self.set_state(ConnectionState::Disconnected);
    }

    /// Fail everything still outstanding and reach `Closed`
    fn close(&mut self, reason: impl Fn() -> LinkError) {
        self.set_state(ConnectionState::Closing);

        let abandoned = self.tracker.drain();
        if !abandoned.is_empty() {
            info!("Abandoning {} unacknowledged message(s)", abandoned.len());
        }
        for (_, waiter) in self.waiters.drain() {
            let _ = waiter.send(Err(reason()));
        }

        self.commands.close();
        while let Ok(Command::Send { reply, .. }) = self.commands.try_recv() {
            let _ = reply.send(Err(reason()));
        }

        self.set_state(ConnectionState::Closed);
        info!("Link closed: {:?}", self.stats.snapshot());
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state.current() == next {
            return;
        }

        match self.state.transition(next) {
            Ok(from) => {
                let _ = self
                    .events
                    .try_send(LinkEvent::StateChanged { from, to: next });
            }
            Err(e) => error!("{}", e),
        }
    }
}

/// Reconnect delay after failed attempt number `attempt` (1-based)
fn backoff_delay(config: &LinkConfig, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(31);
    let delay = config
        .reconnect_backoff_base
        .checked_mul(1u32 << exp)
        .unwrap_or(config.reconnect_backoff_cap)
        .min(config.reconnect_backoff_cap);

    if config.reconnect_jitter > 0.0 {
        let factor = rand::thread_rng().gen_range(0.0..=config.reconnect_jitter);
        delay + delay.mul_f64(factor)
    } else {
        delay
    }
}

/// Resolves once shutdown is signalled or every signal sender is gone
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn read_loop<R>(
    mut reader: FramedReader<R>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    control_tx: mpsc::UnboundedSender<Envelope>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    loop {
        match reader.read_message().await {
            Ok(envelope) if envelope.kind() == EnvelopeKind::Heartbeat => {
                trace!("Answering heartbeat {}", envelope.id());
                let _ = control_tx.send(Envelope::heartbeat_ack(&envelope));
            }
            Ok(envelope) => {
                if inbound_tx.send(Inbound::Envelope(envelope)).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = inbound_tx.send(Inbound::Failed(e));
                break;
            }
        }
    }
}

/// Control envelopes (ACKs and heartbeats) are written ahead of queued data
async fn write_loop<W>(
    mut writer: FramedWriter<W>,
    mut control_rx: mpsc::UnboundedReceiver<Envelope>,
    mut data_rx: mpsc::UnboundedReceiver<Envelope>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    loop {
        let envelope = tokio::select! {
            biased;
            Some(envelope) = control_rx.recv() => envelope,
            Some(envelope) = data_rx.recv() => envelope,
            else => break,
        };

        if let Err(e) = writer.write_message(&envelope).await {
            let _ = inbound_tx.send(Inbound::Failed(e));
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_to_cap() {
        let config = LinkConfig {
            reconnect_backoff_base: Duration::from_secs(1),
            reconnect_backoff_cap: Duration::from_secs(30),
            reconnect_jitter: 0.0,
            ..LinkConfig::default()
        };

        let delays: Vec<u64> = (1..=7)
            .map(|n| backoff_delay(&config, n).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
        assert_eq!(backoff_delay(&config, 64), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_jitter_is_bounded() {
        let config = LinkConfig {
            reconnect_backoff_base: Duration::from_millis(100),
            reconnect_jitter: 0.5,
            ..LinkConfig::default()
        };

        for _ in 0..100 {
            let delay = backoff_delay(&config, 2);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(301));
        }
    }

    #[tokio::test]
    async fn test_shutdown_signal_observed() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { shutdown_requested(&mut rx).await });
        tx.send(true).unwrap();
        waiter.await.unwrap();

        // Dropping the sender also counts as shutdown
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        shutdown_requested(&mut rx).await;
    }
}
