//! TCP transport for link sessions.
//!
//! The supervisor obtains every transport through a [`Connector`]. A client
//! dials its peer with [`TcpConnector`]; a server uses [`TcpAcceptor`], for
//! which "reconnecting" means waiting for the peer's next inbound connection.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

/// Source of fresh transports for the supervisor
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Byte stream produced by this connector
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Establish one transport
    async fn connect(&self) -> io::Result<Self::Stream>;

    /// Human-readable description of the remote end, for logs
    fn describe(&self) -> String;
}

/// Create a TCP listener bound to the given address
pub async fn listen_tcp(addr: SocketAddr) -> io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Connect to a TCP address
pub async fn connect_tcp(addr: SocketAddr) -> io::Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Dials a fixed peer address with a per-attempt timeout
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: SocketAddr,
    connect_timeout: Duration,
}

impl TcpConnector {
    /// Create a connector for `addr`
    pub fn new(addr: SocketAddr, connect_timeout: Duration) -> Self {
        Self {
            addr,
            connect_timeout,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> io::Result<TcpStream> {
        debug!("Dialing {}", self.addr);
        match tokio::time::timeout(self.connect_timeout, connect_tcp(self.addr)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {} timed out after {:?}", self.addr, self.connect_timeout),
            )),
        }
    }

    fn describe(&self) -> String {
        self.addr.to_string()
    }
}

/// Serves a single peer by accepting its connections one at a time
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    /// Bind a listener on `addr`
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = listen_tcp(addr).await?;
        info!("Listening on {}", listener.local_addr()?);
        Ok(Self { listener })
    }

    /// Wrap an already bound listener
    pub fn from_listener(listener: TcpListener) -> Self {
        Self { listener }
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

#[async_trait]
impl Connector for TcpAcceptor {
    type Stream = TcpStream;

    async fn connect(&self) -> io::Result<TcpStream> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        info!("Accepted connection from {}", peer);
        Ok(stream)
    }

    fn describe(&self) -> String {
        match self.listener.local_addr() {
            Ok(addr) => format!("inbound on {}", addr),
            Err(_) => "inbound".to_string(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory connectors for exercising the supervisor without sockets.

    use super::*;
    use tokio::io::DuplexStream;
    use tokio::sync::{mpsc, Mutex};

    /// Hands out duplex streams pushed by the test; refuses when none is queued
    pub struct DuplexConnector {
        streams: Mutex<mpsc::UnboundedReceiver<DuplexStream>>,
        wait: bool,
    }

    impl DuplexConnector {
        /// Connector that waits for the test to supply the next stream
        pub fn waiting() -> (Self, mpsc::UnboundedSender<DuplexStream>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Self {
                    streams: Mutex::new(rx),
                    wait: true,
                },
                tx,
            )
        }

        /// Connector that fails immediately when no stream is queued
        pub fn refusing() -> (Self, mpsc::UnboundedSender<DuplexStream>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Self {
                    streams: Mutex::new(rx),
                    wait: false,
                },
                tx,
            )
        }
    }

    #[async_trait]
    impl Connector for DuplexConnector {
        type Stream = DuplexStream;

        async fn connect(&self) -> io::Result<DuplexStream> {
            let mut streams = self.streams.lock().await;
            let next = if self.wait {
                streams.recv().await
            } else {
                streams.try_recv().ok()
            };
            next.ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "no stream"))
        }

        fn describe(&self) -> String {
            "duplex".to_string()
        }
    }

    /// Connector whose attempts never complete
    pub struct StalledConnector;

    #[async_trait]
    impl Connector for StalledConnector {
        type Stream = DuplexStream;

        async fn connect(&self) -> io::Result<DuplexStream> {
            std::future::pending().await
        }

        fn describe(&self) -> String {
            "stalled".to_string()
        }
    }
}
