//! Reliable message delivery over a single TCP connection.
//!
//! This crate turns a byte stream into an at-least-once message link with
//! application-level acknowledgments, retransmission with exponential
//! backoff, heartbeat liveness detection and automatic reconnection.
//!
//! ## Features
//!
//! - **Framing**: length-prefixed envelopes over any `AsyncRead + AsyncWrite`
//! - **Acknowledgments**: every DATA envelope is ACKed; unacknowledged ones
//!   are retransmitted until their attempt budget runs out
//! - **Liveness**: HEARTBEAT/HEARTBEAT_ACK exchange with RTT measurement
//! - **Reconnect**: exponential backoff with jitter, replaying pending
//!   messages on the new connection
//! - **Backpressure**: bounded send queue with immediate rejection when full
//!
//! ## Example
//!
//! ```rust,no_run
//! use link_session::{Link, LinkConfig, LinkEvent, TcpConnector};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), link_session::LinkError> {
//! let addr = "127.0.0.1:9000".parse().unwrap();
//! let connector = TcpConnector::new(addr, Duration::from_secs(10));
//! let (link, mut events) = Link::start(LinkConfig::default(), connector)?;
//!
//! let delivery = link.send("hello")?;
//! tokio::spawn(async move {
//!     match delivery.outcome().await {
//!         Ok(id) => println!("message {} acknowledged", id),
//!         Err(e) => println!("message not delivered: {}", e),
//!     }
//! });
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         LinkEvent::StateChanged { from, to } => println!("{} -> {}", from, to),
//!         LinkEvent::MessageReceived { id, payload } => {
//!             println!("received message {} ({} bytes)", id, payload.len());
//!         }
//!         LinkEvent::HeartbeatRtt { rtt } => println!("RTT {:?}", rtt),
//!     }
//! }
//!
//! link.shutdown().await
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod config;
pub mod dedup;
pub mod error;
pub mod link;
pub mod liveness;
pub mod metrics;
pub mod state;
pub mod stats;
mod supervisor;
pub mod tracker;
pub mod transport;

pub use channel::{FramedChannel, FramedReader, FramedWriter};
pub use config::LinkConfig;
pub use dedup::DedupWindow;
pub use error::LinkError;
pub use link::{Delivery, Link, LinkEvent, LinkHandle};
pub use liveness::{Liveness, LivenessMonitor};
pub use metrics::StatsReporter;
pub use state::{ConnectionState, StateMachine};
pub use stats::{LinkStats, StatsSnapshot};
pub use tracker::{PendingEntry, PendingTracker, RetryPolicy, TickOutcome};
pub use transport::{connect_tcp, listen_tcp, Connector, TcpAcceptor, TcpConnector};
