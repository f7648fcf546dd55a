//! TCP transport: one stream socket, one read loop, one write loop.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

use crate::shared::{FLUSH_TIMEOUT, Outbound, TransportCore, wait_for_shutdown};
use crate::{
    Acceptor, PendingTransport, Transport, TransportError, TransportHandler,
    TransportId, TransportOptions, spawn_supervised,
};

/// A [`Transport`] over a single TCP stream.
///
/// Writes go through a bounded queue drained by a dedicated write task,
/// so [`send`](Transport::send) never blocks and per-connection write
/// order is the order of `send` calls. A peer that stops reading fills
/// the queue, and the send that finds it full closes the transport.
pub struct TcpTransport {
    core: TransportCore,
    peer_addr: Option<SocketAddr>,
}

impl TcpTransport {
    /// Connects to `addr` and starts the transport.
    pub async fn connect(
        addr: &str,
        handler: Box<dyn TransportHandler>,
        options: &TransportOptions,
    ) -> Result<Arc<Self>, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(TransportError::ConnectFailed)?;
        tracing::debug!(addr, "TCP connection established");
        Ok(Self::start(stream, handler, options))
    }

    /// Starts the I/O loops over an already connected stream.
    pub fn start(
        stream: TcpStream,
        handler: Box<dyn TransportHandler>,
        options: &TransportOptions,
    ) -> Arc<Self> {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "failed to set TCP_NODELAY");
        }
        let peer_addr = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel(options.send_queue_capacity.max(1));
        let (core, shutdown) = TransportCore::new(Outbound::Bounded(outbound_tx));

        let transport = Arc::new(Self { core, peer_addr });

        spawn_supervised(
            "tcp-write",
            write_loop(
                writer,
                outbound_rx,
                shutdown.clone(),
                Arc::downgrade(&transport),
            ),
        );
        spawn_supervised(
            "tcp-read",
            read_loop(
                reader,
                handler,
                shutdown,
                Arc::clone(&transport),
                options.read_chunk_size.max(1),
            ),
        );

        transport
    }
}

impl Transport for TcpTransport {
    fn send(&self, data: Bytes) -> Result<(), TransportError> {
        self.core.send(data)
    }

    fn close(&self) {
        self.core.close();
    }

    fn is_connected(&self) -> bool {
        !self.core.is_closed()
    }

    fn id(&self) -> TransportId {
        self.core.id()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }
}

/// Reads chunks until EOF, error, or local close, then notifies the handler.
async fn read_loop(
    mut reader: OwnedReadHalf,
    mut handler: Box<dyn TransportHandler>,
    mut shutdown: watch::Receiver<bool>,
    transport: Arc<TcpTransport>,
    chunk_size: usize,
) -> Result<(), TransportError> {
    let id = transport.id();
    let mut buf = vec![0u8; chunk_size];

    let result = loop {
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => break Ok(()),
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    tracing::debug!(%id, "remote closed the stream");
                    break Ok(());
                }
                Ok(n) => {
                    tracing::trace!(%id, len = n, "received chunk");
                    handler.on_receive(&buf[..n]);
                }
                Err(e) => break Err(TransportError::ReceiveFailed(e)),
            },
        }
    };

    transport.close();
    handler.on_disconnected();
    result
}

/// Drains the outbound queue into the socket. On close, keeps writing
/// what was already queued for up to [`FLUSH_TIMEOUT`], then shuts the
/// write half down.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Bytes>,
    mut shutdown: watch::Receiver<bool>,
    transport: Weak<TcpTransport>,
) -> Result<(), TransportError> {
    loop {
        let chunk = tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => break,
            chunk = outbound.recv() => match chunk {
                Some(chunk) => chunk,
                None => break,
            },
        };

        let write = writer.write_all(&chunk);
        tokio::pin!(write);
        let written = tokio::select! {
            written = &mut write => written,
            _ = wait_for_shutdown(&mut shutdown) => {
                match tokio::time::timeout(FLUSH_TIMEOUT, &mut write).await {
                    Ok(written) => written,
                    Err(_) => {
                        tracing::debug!("peer stopped reading, abandoning write on close");
                        return Ok(());
                    }
                }
            }
        };
        if let Err(e) = written {
            if let Some(transport) = transport.upgrade() {
                transport.close();
            }
            return Err(TransportError::SendFailed(e));
        }
    }

    let flush = async {
        while let Ok(chunk) = outbound.try_recv() {
            writer.write_all(&chunk).await?;
        }
        writer.shutdown().await
    };
    match tokio::time::timeout(FLUSH_TIMEOUT, flush).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(error = %e, "flush on close failed"),
        Err(_) => tracing::debug!("peer stopped reading, queued chunks dropped on close"),
    }
    Ok(())
}

/// A TCP stream accepted by [`TcpAcceptor`], not yet started.
pub struct PendingTcp {
    stream: TcpStream,
    peer_addr: Option<SocketAddr>,
    options: TransportOptions,
}

impl PendingTransport for PendingTcp {
    fn start(self, handler: Box<dyn TransportHandler>) -> Arc<dyn Transport> {
        TcpTransport::start(self.stream, handler, &self.options)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }
}

/// Listens for incoming TCP connections.
pub struct TcpAcceptor {
    listener: TcpListener,
    options: TransportOptions,
}

impl TcpAcceptor {
    /// Binds a listening socket to the given address.
    pub async fn bind(
        addr: &str,
        options: TransportOptions,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::BindFailed)?;
        tracing::info!(addr, "TCP transport listening");
        Ok(Self { listener, options })
    }
}

impl Acceptor for TcpAcceptor {
    type Pending = PendingTcp;

    async fn accept(&mut self) -> Result<PendingTcp, TransportError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::debug!(%addr, "accepted TCP connection");
        Ok(PendingTcp {
            stream,
            peer_addr: Some(addr),
            options: self.options.clone(),
        })
    }

    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.listener
            .local_addr()
            .map_err(TransportError::BindFailed)
    }
}
