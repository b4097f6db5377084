//! Reliable link node binary.
//!
//! Runs one end of a reliable message link: either dials a peer (`--connect`)
//! or accepts the peer's connections (`--listen`). Received messages are
//! logged, optional test traffic is sent, and the final counters are printed
//! as JSON on shutdown.

use anyhow::{bail, Context};
use clap::Parser;
use link_session::{
    ConnectionState, Connector, Link, LinkError, LinkEvent, LinkHandle, StatsReporter,
    TcpAcceptor, TcpConnector,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::ServiceConfig;
use logging::RedbLogFormatter;

/// Reliable message link over TCP
#[derive(Parser, Debug)]
#[command(name = "redb-link", version, about = "Reliable message link over TCP")]
struct Args {
    /// Listen address, e.g. 0.0.0.0:9000
    #[arg(long, conflicts_with = "connect")]
    listen: Option<SocketAddr>,

    /// Peer address to connect to, e.g. 127.0.0.1:9000
    #[arg(long)]
    connect: Option<SocketAddr>,

    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// ACK timeout before the first retransmission, e.g. 5s
    #[arg(long)]
    base_timeout: Option<humantime::Duration>,

    /// Transmissions per message before giving up
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Heartbeat interval, e.g. 10s
    #[arg(long)]
    heartbeat_interval: Option<humantime::Duration>,

    /// Stats report interval, e.g. 30s
    #[arg(long)]
    stats_interval: Option<humantime::Duration>,

    /// Payload to send once connected
    #[arg(long)]
    message: Option<String>,

    /// Number of times to send the payload
    #[arg(long, default_value_t = 1, requires = "message")]
    count: u32,

    /// Pause between sends
    #[arg(long, default_value = "1s")]
    send_interval: humantime::Duration,
}

impl Args {
    fn apply_to(&self, config: &mut ServiceConfig) {
        if self.listen.is_some() {
            config.listen = self.listen;
            config.connect = None;
        }
        if self.connect.is_some() {
            config.connect = self.connect;
            config.listen = None;
        }
        if let Some(timeout) = self.base_timeout {
            config.link.base_timeout = timeout.into();
        }
        if let Some(attempts) = self.max_attempts {
            config.link.max_attempts = attempts;
        }
        if let Some(interval) = self.heartbeat_interval {
            config.link.heartbeat_interval = interval.into();
        }
        if let Some(interval) = self.stats_interval {
            config.stats_interval = interval.into();
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("link_session={}", args.log_level).parse()?)
        .add_directive(format!("link_wire={}", args.log_level).parse()?)
        .add_directive(format!("redb_link={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .event_format(RedbLogFormatter::new("link".to_string()))
        .init();

    info!("Starting reDB Link Service v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ServiceConfig::load_from_file(&args.config)?;
    args.apply_to(&mut config);
    config.validate()?;

    let result = match (config.listen, config.connect) {
        (_, Some(addr)) => {
            let connector = TcpConnector::new(addr, config.link.connect_timeout);
            run_link(&config, connector, &args).await
        }
        (Some(addr), None) => {
            let acceptor = TcpAcceptor::bind(addr)
                .await
                .with_context(|| format!("failed to listen on {}", addr))?;
            run_link(&config, acceptor, &args).await
        }
        (None, None) => bail!("either --listen or --connect is required"),
    };

    if let Err(e) = &result {
        component_error!("link", "Link terminated: {:#}", e);
    }
    info!("Link node shutdown complete");
    result
}

async fn run_link<C: Connector>(
    config: &ServiceConfig,
    connector: C,
    args: &Args,
) -> anyhow::Result<()> {
    let (link, mut events) = Link::start(config.link.clone(), connector)?;

    let _reporter = StatsReporter::new(link.handle())
        .with_interval(config.stats_interval)
        .start_reporting_task();

    if let Some(message) = &args.message {
        tokio::spawn(send_messages(
            link.handle(),
            message.clone(),
            args.count,
            args.send_interval.into(),
        ));
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => log_event(event),
                None => {
                    info!("Link supervisor stopped");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT signal, initiating graceful shutdown");
                break;
            }
        }
    }

    let handle = link.handle();
    let outcome = link.shutdown().await;

    let stats = serde_json::to_string_pretty(&handle.stats())?;
    println!("{}", stats);

    outcome.map_err(anyhow::Error::from)
}

fn log_event(event: LinkEvent) {
    match event {
        LinkEvent::StateChanged { from, to } => {
            component_info!("state", "Connection {} -> {}", from, to);
        }
        LinkEvent::MessageReceived { id, payload } => match std::str::from_utf8(&payload) {
            Ok(text) => component_info!("events", "Received message {}: {}", id, text),
            Err(_) => component_info!(
                "events",
                "Received message {} ({} bytes of binary payload)",
                id,
                payload.len()
            ),
        },
        LinkEvent::HeartbeatRtt { rtt } => {
            component_debug!("heartbeat", "Heartbeat RTT {:?}", rtt);
        }
    }
}

async fn send_messages(handle: LinkHandle, message: String, count: u32, interval: Duration) {
    if handle.wait_for_state(ConnectionState::Connected).await.is_err() {
        return;
    }

    for n in 1..=count {
        match handle.send(message.clone()) {
            Ok(delivery) => {
                let id = delivery.id();
                component_debug!("sender", "Queued message {} ({}/{})", id, n, count);
                tokio::spawn(async move {
                    match delivery.outcome().await {
                        Ok(id) => component_info!("sender", "Message {} acknowledged", id),
                        Err(e) => component_warn!("sender", "Message {} not delivered: {}", id, e),
                    }
                });
            }
            Err(LinkError::Cancelled) => return,
            Err(e) => component_warn!("sender", "Send {} rejected: {}", n, e),
        }

        if n < count {
            tokio::time::sleep(interval).await;
        }
    }
}
