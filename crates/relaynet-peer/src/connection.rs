//! One logical channel to one remote identity.
//!
//! A connection is split in two halves:
//!
//! - [`ConnectionReader`] is the transport's handler. It owns the parser,
//!   stamps identities, and forwards messages to a sink. It lives inside
//!   the transport's read loop and needs no locking.
//! - [`Connection`] is the sending half that routing tables hold.

use std::net::SocketAddr;
use std::sync::Arc;

use relaynet_dispatch::Delivery;
use relaynet_protocol::{
    Message, MessageRegistry, PacketParser, PeerId, ProtocolError, Side, TYPE_ID_LEN,
    encode_frame,
};
use relaynet_transport::{Bytes, LoopbackTransport, Transport, TransportHandler, TransportId};

use crate::{PeerError, PeerOptions};

/// Receives every message a connection decodes, already stamped.
pub type MessageSink = Box<dyn FnMut(Box<dyn Message>, Delivery) + Send>;

/// Called once when the connection's transport is gone.
pub type ClosedHook = Box<dyn FnOnce() + Send>;

/// Transport handler for one connection: bytes in, stamped messages out.
pub struct ConnectionReader {
    remote_id: PeerId,
    side: Side,
    parser: PacketParser,
    sink: MessageSink,
    on_closed: Option<ClosedHook>,
}

impl ConnectionReader {
    pub fn new(
        remote_id: PeerId,
        side: Side,
        registry: Arc<MessageRegistry>,
        options: &PeerOptions,
        sink: MessageSink,
        on_closed: ClosedHook,
    ) -> Self {
        Self {
            remote_id,
            side,
            parser: PacketParser::with_limits(
                registry,
                options.max_frame_body,
                options.parser_initial_capacity,
            ),
            sink,
            on_closed: Some(on_closed),
        }
    }
}

impl TransportHandler for ConnectionReader {
    fn on_receive(&mut self, data: &[u8]) {
        let remote_id = self.remote_id;
        let side = self.side;
        let sink = &mut self.sink;
        self.parser.input_raw(data, |mut message| {
            let from = match side {
                // Never trust a client's claimed sender.
                Side::Server => {
                    if let Some(header) = message.header_mut() {
                        if header.sender != remote_id {
                            tracing::trace!(
                                claimed = %header.sender,
                                actual = %remote_id,
                                "overwriting sender id"
                            );
                        }
                        header.sender = remote_id;
                    }
                    remote_id
                }
                Side::Client => message.header().map_or(remote_id, |h| h.sender),
            };
            sink(message, Delivery::new(from, side));
        });
    }

    fn on_disconnected(&mut self) {
        tracing::debug!(remote = %self.remote_id, side = ?self.side, "connection reader finished");
        if let Some(hook) = self.on_closed.take() {
            hook();
        }
    }
}

/// The sending half of a connection.
pub struct Connection {
    remote_id: PeerId,
    side: Side,
    transport: Arc<dyn Transport>,
    max_frame_body: usize,
}

impl Connection {
    pub fn new(
        remote_id: PeerId,
        side: Side,
        transport: Arc<dyn Transport>,
        options: &PeerOptions,
    ) -> Self {
        Self {
            remote_id,
            side,
            transport,
            max_frame_body: options.max_frame_body,
        }
    }

    /// Builds the two halves of an in-process connection.
    ///
    /// Returns `(client, server)`: `client` is the client persona's
    /// connection to the server (remote id [`PeerId::SERVER`]) and
    /// `server` is the server's connection to that persona (remote id
    /// `client_id`).
    pub fn loopback_pair(
        client_id: PeerId,
        client_reader: ConnectionReader,
        server_reader: ConnectionReader,
        options: &PeerOptions,
    ) -> (Self, Self) {
        let (client_end, server_end) =
            LoopbackTransport::pair(Box::new(client_reader), Box::new(server_reader));
        (
            Self::new(PeerId::SERVER, Side::Client, client_end, options),
            Self::new(client_id, Side::Server, server_end, options),
        )
    }

    /// Identity of the far end.
    pub fn remote_id(&self) -> PeerId {
        self.remote_id
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn transport_id(&self) -> TransportId {
        self.transport.id()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.transport.peer_addr()
    }

    /// Checks a message against the frame limit and encodes it.
    pub fn encode(&self, message: &dyn Message) -> Result<Bytes, PeerError> {
        check_frame(message, self.max_frame_body)?;
        Ok(encode_frame(message))
    }

    /// Serializes one frame and queues it on the transport.
    pub fn send(&self, message: &dyn Message) -> Result<(), PeerError> {
        let frame = self.encode(message)?;
        self.send_frame(frame)
    }

    /// Queues an already encoded frame. Used to fan one encoding out to
    /// many connections.
    pub fn send_frame(&self, frame: Bytes) -> Result<(), PeerError> {
        tracing::trace!(remote = %self.remote_id, len = frame.len(), "sending frame");
        self.transport.send(frame).map_err(PeerError::from)
    }

    /// Closes the transport. Idempotent.
    pub fn close(&self) {
        self.transport.close();
    }

    pub fn is_alive(&self) -> bool {
        self.transport.is_connected()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("remote_id", &self.remote_id)
            .field("side", &self.side)
            .field("transport", &self.transport.id())
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Rejects messages whose body would exceed `max_frame_body`.
pub(crate) fn check_frame(message: &dyn Message, max_frame_body: usize) -> Result<(), ProtocolError> {
    let len = TYPE_ID_LEN + message.encoded_len();
    if len > max_frame_body {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: max_frame_body,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inbound::{Inbound, inbound_channel, push};
    use relaynet_protocol::{Header, NetId, RpcArg, RpcMessage};
    use std::time::Duration;

    fn rpc(sender: i32, target: i32) -> RpcMessage {
        let mut msg = RpcMessage::new(NetId(7), "Fire", vec![RpcArg::Int(3)]).unwrap();
        msg.header = Header::new(PeerId(sender), PeerId(target));
        msg
    }

    fn forwarding_reader(
        remote_id: PeerId,
        side: Side,
        inbound: crate::InboundSender,
    ) -> ConnectionReader {
        let closed = inbound.clone();
        ConnectionReader::new(
            remote_id,
            side,
            Arc::new(MessageRegistry::with_builtins()),
            &PeerOptions::default(),
            Box::new(move |message, delivery| push(&inbound, Inbound::Message { message, delivery })),
            Box::new(move || push(&closed, Inbound::PeerDisconnected(remote_id))),
        )
    }

    async fn next(rx: &mut crate::InboundReceiver) -> Inbound {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out")
            .expect("queue closed")
    }

    #[tokio::test]
    async fn test_server_side_overwrites_forged_sender() {
        let (client_tx, _client_rx) = inbound_channel();
        let (server_tx, mut server_rx) = inbound_channel();
        let (client, _server) = Connection::loopback_pair(
            PeerId(100),
            forwarding_reader(PeerId::SERVER, Side::Client, client_tx),
            forwarding_reader(PeerId(100), Side::Server, server_tx),
            &PeerOptions::default(),
        );

        // Claims to be the Host's own persona.
        client.send(&rpc(1, 0)).unwrap();

        match next(&mut server_rx).await {
            Inbound::Message { message, delivery } => {
                assert_eq!(delivery.from, PeerId(100));
                assert_eq!(delivery.side, Side::Server);
                assert_eq!(message.header().map(|h| h.sender), Some(PeerId(100)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_client_side_trusts_header_sender() {
        let (client_tx, mut client_rx) = inbound_channel();
        let (server_tx, _server_rx) = inbound_channel();
        let (_client, server) = Connection::loopback_pair(
            PeerId(100),
            forwarding_reader(PeerId::SERVER, Side::Client, client_tx),
            forwarding_reader(PeerId(100), Side::Server, server_tx),
            &PeerOptions::default(),
        );

        // A relayed message from another client, as the Host forwards it.
        server.send(&rpc(101, 100)).unwrap();

        match next(&mut client_rx).await {
            Inbound::Message { delivery, .. } => {
                assert_eq!(delivery.from, PeerId(101));
                assert_eq!(delivery.side, Side::Client);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_close_fires_hook_once_per_side() {
        let (client_tx, mut client_rx) = inbound_channel();
        let (server_tx, mut server_rx) = inbound_channel();
        let (client, server) = Connection::loopback_pair(
            PeerId(100),
            forwarding_reader(PeerId::SERVER, Side::Client, client_tx),
            forwarding_reader(PeerId(100), Side::Server, server_tx),
            &PeerOptions::default(),
        );

        client.close();
        client.close();
        server.close();

        assert!(matches!(next(&mut client_rx).await, Inbound::PeerDisconnected(PeerId::SERVER)));
        assert!(matches!(next(&mut server_rx).await, Inbound::PeerDisconnected(PeerId(100))));
        assert!(!client.is_alive());

        // Readers were dropped after their single notification.
        assert!(client_rx.recv().await.is_none());
        assert!(server_rx.recv().await.is_none());
    }

    #[test]
    fn test_check_frame_rejects_oversized_message() {
        let msg = RpcMessage::new(NetId(1), "x".repeat(200), vec![]).unwrap();
        assert!(matches!(
            check_frame(&msg, 64),
            Err(ProtocolError::FrameTooLarge { max: 64, .. })
        ));
        assert!(check_frame(&msg, 1024).is_ok());
    }
}
