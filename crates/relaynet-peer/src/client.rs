//! The Client role: exactly one connection, to a remote Host.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use relaynet_protocol::{AssignId, Message, MessageRegistry, PeerId, RelayMessage, Side};
use relaynet_transport::{TcpTransport, Transport, TransportError, TransportHandler};

use crate::connection::{Connection, ConnectionReader};
use crate::inbound::{Inbound, InboundSender, push};
use crate::{PeerError, PeerOptions};

struct ClientShared {
    local_id: AtomicI32,
    closing: AtomicBool,
    inbound: InboundSender,
    connection: OnceLock<Connection>,
}

impl ClientShared {
    fn on_message(&self, message: Box<dyn Message>, delivery: relaynet_dispatch::Delivery) {
        if let Some(assign) = message.downcast_ref::<AssignId>() {
            let id = assign.player_id;
            let previous = PeerId(self.local_id.swap(id.0, Ordering::AcqRel));
            if previous != PeerId::UNASSIGNED && previous != id {
                tracing::warn!(%previous, assigned = %id, "host reassigned local id");
            }
            tracing::info!(local_id = %id, "identity assigned by host");
            push(&self.inbound, Inbound::LocalIdAssigned(id));
            return;
        }
        if message.is::<RelayMessage>() {
            // Only a Host unwraps relays.
            tracing::debug!(from = %delivery.from, "dropping relay envelope received by a client");
            return;
        }
        push(&self.inbound, Inbound::Message { message, delivery });
    }

    fn on_closed(&self) {
        if self.closing.load(Ordering::Acquire) {
            return;
        }
        tracing::info!("connection to host lost");
        push(&self.inbound, Inbound::DisconnectedFromHost);
    }
}

/// A peer connected to a remote Host.
///
/// Its identity is [`PeerId::UNASSIGNED`] until the Host's handshake
/// arrives.
pub struct ClientPeer {
    shared: Arc<ClientShared>,
}

impl ClientPeer {
    /// Connects over TCP to `addr` (`host:port`).
    pub async fn connect_tcp(
        addr: &str,
        registry: Arc<MessageRegistry>,
        options: PeerOptions,
        inbound: InboundSender,
    ) -> Result<Self, PeerError> {
        let transport_options = options.transport_options();
        Self::establish(registry, options, inbound, |reader| async move {
            let transport: Arc<dyn Transport> =
                TcpTransport::connect(addr, reader, &transport_options).await?;
            Ok(transport)
        })
        .await
    }

    /// Connects over WebSocket to `url` (`ws://host:port`).
    #[cfg(feature = "websocket")]
    pub async fn connect_ws(
        url: &str,
        registry: Arc<MessageRegistry>,
        options: PeerOptions,
        inbound: InboundSender,
    ) -> Result<Self, PeerError> {
        let transport_options = options.transport_options();
        Self::establish(registry, options, inbound, |reader| async move {
            let transport: Arc<dyn Transport> =
                relaynet_transport::WebSocketTransport::connect(url, reader, &transport_options)
                    .await?;
            Ok(transport)
        })
        .await
    }

    async fn establish<F, Fut>(
        registry: Arc<MessageRegistry>,
        options: PeerOptions,
        inbound: InboundSender,
        connect: F,
    ) -> Result<Self, PeerError>
    where
        F: FnOnce(Box<dyn TransportHandler>) -> Fut,
        Fut: Future<Output = Result<Arc<dyn Transport>, TransportError>>,
    {
        let shared = Arc::new(ClientShared {
            local_id: AtomicI32::new(PeerId::UNASSIGNED.0),
            closing: AtomicBool::new(false),
            inbound,
            connection: OnceLock::new(),
        });

        let on_message: Weak<ClientShared> = Arc::downgrade(&shared);
        let on_closed: Weak<ClientShared> = Arc::downgrade(&shared);
        let reader = ConnectionReader::new(
            PeerId::SERVER,
            Side::Client,
            registry,
            &options,
            Box::new(move |message, delivery| {
                if let Some(shared) = on_message.upgrade() {
                    shared.on_message(message, delivery);
                }
            }),
            Box::new(move || {
                if let Some(shared) = on_closed.upgrade() {
                    shared.on_closed();
                }
            }),
        );

        let transport = connect(Box::new(reader)).await?;
        let connection = Connection::new(PeerId::SERVER, Side::Client, transport, &options);
        tracing::info!(addr = ?connection.peer_addr(), "connected to host");
        let _ = shared.connection.set(connection);

        Ok(Self { shared })
    }

    fn connection(&self) -> Result<&Connection, PeerError> {
        self.shared.connection.get().ok_or(PeerError::Closed)
    }

    /// The identity assigned by the Host, or [`PeerId::UNASSIGNED`].
    pub fn local_id(&self) -> PeerId {
        PeerId(self.shared.local_id.load(Ordering::Acquire))
    }

    /// `true` once the handshake completed and while the link is up.
    pub fn is_connected(&self) -> bool {
        self.local_id() != PeerId::UNASSIGNED
            && self.connection().is_ok_and(Connection::is_alive)
    }

    pub fn host_addr(&self) -> Option<SocketAddr> {
        self.connection().ok().and_then(Connection::peer_addr)
    }

    /// Sends `message` to the Host. The target is always forced to
    /// [`PeerId::SERVER`]; use a [`RelayMessage`] to reach other clients.
    pub fn send(&self, mut message: Box<dyn Message>) -> Result<(), PeerError> {
        let local_id = self.local_id();
        let message_type = message.message_type();
        let header = message
            .header_mut()
            .ok_or(PeerError::NoHeader(message_type))?;
        header.sender = local_id;
        header.target = PeerId::SERVER;
        self.connection()?.send(message.as_ref())
    }

    /// Closes the link without reporting it as a lost host.
    pub fn close(&self) {
        self.shared.closing.store(true, Ordering::Release);
        if let Ok(connection) = self.connection() {
            connection.close();
        }
        tracing::info!("client closed");
    }
}

impl Drop for ClientPeer {
    fn drop(&mut self) {
        if !self.shared.closing.load(Ordering::Acquire) {
            self.close();
        }
    }
}
