//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! Each `send` becomes one binary WebSocket message. The receiving side
//! treats message payloads as plain byte chunks, exactly like TCP reads.
//!
//! The acceptor only accepts the TCP connection. The HTTP upgrade runs on
//! the new transport's own task under a timeout, so a peer that never
//! completes it cannot hold up the accept loop.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use crate::shared::{FLUSH_TIMEOUT, Outbound, TransportCore, wait_for_shutdown};
use crate::{
    Acceptor, PendingTransport, Transport, TransportError, TransportHandler,
    TransportId, TransportOptions, spawn_supervised,
};

fn ws_error(kind: std::io::ErrorKind, e: tokio_tungstenite::tungstenite::Error) -> std::io::Error {
    std::io::Error::new(kind, e)
}

/// A [`Transport`] over one WebSocket connection.
pub struct WebSocketTransport {
    core: TransportCore,
    peer_addr: Option<SocketAddr>,
}

impl WebSocketTransport {
    /// Connects to a `ws://` URL and starts the transport.
    pub async fn connect(
        url: &str,
        handler: Box<dyn TransportHandler>,
        options: &TransportOptions,
    ) -> Result<Arc<Self>, TransportError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| {
                TransportError::ConnectFailed(ws_error(
                    std::io::ErrorKind::ConnectionRefused,
                    e,
                ))
            })?;
        tracing::debug!(url, "WebSocket connection established");
        Ok(Self::start(ws, handler, None, options))
    }

    /// Starts the I/O loops over an established WebSocket stream.
    pub fn start<S>(
        ws: WebSocketStream<S>,
        handler: Box<dyn TransportHandler>,
        peer_addr: Option<SocketAddr>,
        options: &TransportOptions,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (transport, outbound, shutdown) = Self::new(peer_addr, options);
        transport.run(ws, handler, outbound, shutdown);
        transport
    }

    /// Starts a server-side transport over a freshly accepted TCP stream.
    ///
    /// Returns at once. The upgrade handshake runs on the transport's own
    /// task and must finish within `options.handshake_timeout`; sends made
    /// meanwhile are queued. If it fails, the handler sees a disconnect.
    pub fn accept(
        stream: TcpStream,
        handler: Box<dyn TransportHandler>,
        options: &TransportOptions,
    ) -> Arc<Self> {
        let peer_addr = stream.peer_addr().ok();
        let (transport, outbound, shutdown) = Self::new(peer_addr, options);
        spawn_supervised(
            "ws-handshake",
            handshake(
                stream,
                handler,
                outbound,
                shutdown,
                Arc::clone(&transport),
                options.handshake_timeout,
            ),
        );
        transport
    }

    fn new(
        peer_addr: Option<SocketAddr>,
        options: &TransportOptions,
    ) -> (Arc<Self>, mpsc::Receiver<Bytes>, watch::Receiver<bool>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(options.send_queue_capacity.max(1));
        let (core, shutdown) = TransportCore::new(Outbound::Bounded(outbound_tx));
        (Arc::new(Self { core, peer_addr }), outbound_rx, shutdown)
    }

    fn run<S>(
        self: &Arc<Self>,
        ws: WebSocketStream<S>,
        handler: Box<dyn TransportHandler>,
        outbound: mpsc::Receiver<Bytes>,
        shutdown: watch::Receiver<bool>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();
        spawn_supervised(
            "ws-write",
            write_loop(sink, outbound, shutdown.clone(), Arc::downgrade(self)),
        );
        spawn_supervised(
            "ws-read",
            read_loop(stream, handler, shutdown, Arc::clone(self)),
        );
    }
}

impl Transport for WebSocketTransport {
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

/// Runs the server side of the upgrade, then hands over to the I/O loops.
async fn handshake(
    stream: TcpStream,
    mut handler: Box<dyn TransportHandler>,
    outbound: mpsc::Receiver<Bytes>,
    mut shutdown: watch::Receiver<bool>,
    transport: Arc<WebSocketTransport>,
    limit: Duration,
) -> Result<(), TransportError> {
    let id = transport.id();
    let upgraded = tokio::select! {
        _ = wait_for_shutdown(&mut shutdown) => None,
        upgraded = tokio::time::timeout(limit, tokio_tungstenite::accept_async(stream)) => {
            match upgraded {
                Ok(Ok(ws)) => Some(ws),
                Ok(Err(e)) => {
                    tracing::debug!(%id, error = %e, "WebSocket handshake failed");
                    None
                }
                Err(_) => {
                    tracing::warn!(%id, ?limit, "WebSocket handshake timed out");
                    None
                }
            }
        }
    };

    match upgraded {
        Some(ws) => {
            tracing::debug!(%id, addr = ?transport.peer_addr, "WebSocket handshake complete");
            transport.run(ws, handler, outbound, shutdown);
        }
        None => {
            transport.close();
            handler.on_disconnected();
        }
    }
    Ok(())
}

async fn read_loop<S>(
    mut stream: SplitStream<WebSocketStream<S>>,
    mut handler: Box<dyn TransportHandler>,
    mut shutdown: watch::Receiver<bool>,
    transport: Arc<WebSocketTransport>,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let id = transport.id();

    let result = loop {
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => break Ok(()),
            msg = stream.next() => match msg {
                Some(Ok(Message::Binary(data))) => {
                    tracing::trace!(%id, len = data.len(), "received chunk");
                    handler.on_receive(&data);
                }
                Some(Ok(Message::Text(text))) => {
                    handler.on_receive(text.as_str().as_bytes());
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::debug!(%id, "remote closed the WebSocket");
                    break Ok(());
                }
                Some(Ok(_)) => continue, // ping/pong/frame
                Some(Err(e)) => {
                    break Err(TransportError::ReceiveFailed(ws_error(
                        std::io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            },
        }
    };

    transport.close();
    handler.on_disconnected();
    result
}

/// Same contract as the TCP write loop: ordered writes, then a bounded
/// flush on close.
async fn write_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut outbound: mpsc::Receiver<Bytes>,
    mut shutdown: watch::Receiver<bool>,
    transport: Weak<WebSocketTransport>,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let chunk = tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => break,
            chunk = outbound.recv() => match chunk {
                Some(chunk) => chunk,
                None => break,
            },
        };

        let send = sink.send(Message::Binary(chunk));
        tokio::pin!(send);
        let sent = tokio::select! {
            sent = &mut send => sent,
            _ = wait_for_shutdown(&mut shutdown) => {
                match tokio::time::timeout(FLUSH_TIMEOUT, &mut send).await {
                    Ok(sent) => sent,
                    Err(_) => {
                        tracing::debug!("peer stopped reading, abandoning write on close");
                        return Ok(());
                    }
                }
            }
        };
        if let Err(e) = sent {
            if let Some(transport) = transport.upgrade() {
                transport.close();
            }
            return Err(TransportError::SendFailed(ws_error(
                std::io::ErrorKind::BrokenPipe,
                e,
            )));
        }
    }

    let flush = async {
        while let Ok(chunk) = outbound.try_recv() {
            sink.send(Message::Binary(chunk)).await?;
        }
        sink.close().await
    };
    match tokio::time::timeout(FLUSH_TIMEOUT, flush).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(error = %e, "flush on close failed"),
        Err(_) => tracing::debug!("peer stopped reading, queued chunks dropped on close"),
    }
    Ok(())
}

/// A TCP connection accepted by [`WebSocketAcceptor`]. The upgrade has not
/// happened yet; it runs once the transport is started.
pub struct PendingWebSocket {
    stream: TcpStream,
    peer_addr: Option<SocketAddr>,
    options: TransportOptions,
}

impl PendingTransport for PendingWebSocket {
    fn start(self, handler: Box<dyn TransportHandler>) -> Arc<dyn Transport> {
        WebSocketTransport::accept(self.stream, handler, &self.options)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }
}

/// Listens for incoming WebSocket connections.
pub struct WebSocketAcceptor {
    listener: TcpListener,
    options: TransportOptions,
}

impl WebSocketAcceptor {
    /// Binds a new WebSocket listener to the given address.
    pub async fn bind(addr: &str, options: TransportOptions) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::BindFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self { listener, options })
    }
}

impl Acceptor for WebSocketAcceptor {
    type Pending = PendingWebSocket;

    async fn accept(&mut self) -> Result<PendingWebSocket, TransportError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::debug!(%addr, "accepted TCP connection for WebSocket upgrade");
        Ok(PendingWebSocket {
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
