//! Transport abstraction layer for relaynet.
//!
//! A transport is a raw duplex byte channel. It knows nothing about frames
//! or messages: it delivers whatever chunks the operating system hands it
//! to a [`TransportHandler`], and writes whatever bytes it is given in the
//! order it was given them.
//!
//! ```text
//! socket ──read loop──→ TransportHandler::on_receive(bytes)
//!        ←─write loop── Transport::send(bytes)
//! ```
//!
//! Three implementations are provided:
//!
//! - [`TcpTransport`]: one TCP stream, with a read loop and a write loop
//!   running as separate Tokio tasks.
//! - [`LoopbackTransport`]: two in-process endpoints wired to each other,
//!   used so a Host can talk to itself through the same code path as a
//!   remote client.
//! - `WebSocketTransport` (feature `websocket`, on by default): the same
//!   byte chunks carried in binary WebSocket messages.
//!
//! # Lifecycle
//!
//! [`Transport::close`] is idempotent and may be called from any thread,
//! including from inside the handler. Whatever ends the read loop (local
//! close, remote close, I/O error), the handler's
//! [`on_disconnected`](TransportHandler::on_disconnected) fires exactly
//! once, because only the read loop owns the handler and it only exits once.

mod shared;
mod error;
mod loopback;
mod task;
mod tcp;
#[cfg(feature = "websocket")]
mod websocket;

pub use bytes::Bytes;
pub use error::TransportError;
pub use loopback::LoopbackTransport;
pub use task::spawn_supervised;
pub use tcp::{PendingTcp, TcpAcceptor, TcpTransport};
#[cfg(feature = "websocket")]
pub use websocket::{PendingWebSocket, WebSocketAcceptor, WebSocketTransport};

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Default size of a single socket read.
pub const DEFAULT_READ_CHUNK: usize = 4096;

/// Default number of chunks a socket transport queues before it gives up
/// on its peer.
pub const DEFAULT_SEND_QUEUE: usize = 1024;

/// Default time an accepted WebSocket has to complete its upgrade.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Opaque identifier for a transport instance, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportId(u64);

impl TransportId {
    /// Creates a new `TransportId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport-{}", self.0)
    }
}

/// Tuning knobs shared by the socket transports.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Size of the buffer handed to each socket read.
    pub read_chunk_size: usize,
    /// Outbound chunks queued but not yet written. A send that finds the
    /// queue full closes the transport: the peer has stopped reading.
    pub send_queue_capacity: usize,
    /// Upper bound on an accepted WebSocket's upgrade handshake.
    pub handshake_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            read_chunk_size: DEFAULT_READ_CHUNK,
            send_queue_capacity: DEFAULT_SEND_QUEUE,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

/// Receives the events of a running transport.
///
/// The handler is moved into the transport's read loop and only ever
/// called from there, so it gets `&mut self` and needs no locking.
pub trait TransportHandler: Send + 'static {
    /// Called with each chunk of bytes, in arrival order. Chunks have no
    /// relation to message boundaries.
    fn on_receive(&mut self, data: &[u8]);

    /// Called once, after the last `on_receive`, when the transport is gone.
    fn on_disconnected(&mut self);
}

/// A duplex byte channel to one remote endpoint.
pub trait Transport: Send + Sync + 'static {
    /// Queues bytes for writing. Never blocks; write order is preserved.
    ///
    /// # Errors
    /// Returns [`TransportError::Closed`] once the transport is closed, and
    /// [`TransportError::QueueFull`] (after closing it) when the peer has
    /// fallen too far behind.
    fn send(&self, data: Bytes) -> Result<(), TransportError>;

    /// Closes the transport. Safe to call repeatedly and from any context.
    fn close(&self);

    /// `true` until the transport has been closed.
    fn is_connected(&self) -> bool;

    /// Returns the unique identifier of this transport.
    fn id(&self) -> TransportId;

    /// Address of the remote end, when there is one.
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// An accepted connection whose I/O loops have not been started yet.
///
/// Accepting and starting are split so the owner can decide the handler
/// (and the identity it carries) after seeing the connection.
pub trait PendingTransport: Send + 'static {
    /// Starts the transport's I/O loops, delivering events to `handler`.
    fn start(self, handler: Box<dyn TransportHandler>) -> Arc<dyn Transport>;

    /// Address of the remote end.
    fn peer_addr(&self) -> Option<SocketAddr>;
}

/// Accepts incoming connections.
pub trait Acceptor: Send + 'static {
    /// The not-yet-started connection type produced by this acceptor.
    type Pending: PendingTransport;

    /// Waits for and accepts the next incoming connection.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Pending, TransportError>> + Send;

    /// The address this acceptor is listening on.
    fn local_addr(&self) -> Result<SocketAddr, TransportError>;
}
