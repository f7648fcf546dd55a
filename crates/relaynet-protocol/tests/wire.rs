//! End-to-end checks of the public protocol API: an application-defined
//! message kind registered next to the built-ins and pushed through the
//! parser the way a connection does it.

use std::sync::Arc;

use relaynet_protocol::codec::str_len;
use relaynet_protocol::{
    AssignId, Header, Message, MessageKind, MessageRegistry, MessageType, NetId, PacketParser,
    PeerId, ProtocolError, RelayMessage, RpcArg, RpcMessage, WireReader, WireWriter, encode_frame,
    frame_len,
};

#[derive(Debug, Clone, Default, PartialEq)]
struct Position {
    header: Header,
    entity: i64,
    label: String,
    grounded: bool,
}

impl Message for Position {
    fn message_type(&self) -> MessageType {
        Self::TYPE
    }
    fn header(&self) -> Option<&Header> {
        Some(&self.header)
    }
    fn header_mut(&mut self) -> Option<&mut Header> {
        Some(&mut self.header)
    }
    fn encoded_len(&self) -> usize {
        Header::ENCODED_LEN + 8 + str_len(&self.label) + 1
    }
    fn encode(&self, w: &mut WireWriter) {
        w.put_header(&self.header);
        w.put_i64(self.entity);
        w.put_str(&self.label);
        w.put_bool(self.grounded);
    }
    fn decode(&mut self, r: &mut WireReader<'_>) -> Result<(), ProtocolError> {
        self.header = r.get_header()?;
        self.entity = r.get_i64()?;
        self.label = r.get_str()?;
        self.grounded = r.get_bool()?;
        Ok(())
    }
}

impl MessageKind for Position {
    const TYPE: MessageType = MessageType(150);
}

fn registry() -> Arc<MessageRegistry> {
    let mut registry = MessageRegistry::with_builtins();
    registry.register::<Position>().expect("fresh id");
    Arc::new(registry)
}

#[test]
fn test_encoded_len_matches_frame_for_every_kind() {
    let messages: Vec<Box<dyn Message>> = vec![
        Box::new(AssignId {
            player_id: PeerId(100),
        }),
        Box::new(Position {
            header: Header::new(PeerId(1), PeerId::SERVER),
            entity: -9,
            label: "ünïcode".into(),
            grounded: true,
        }),
        Box::new(RpcMessage::new(NetId(7), "Fire", vec![RpcArg::Int(3)]).unwrap()),
        Box::new(RelayMessage::wrap(
            &Position::default(),
            PeerId::BROADCAST,
            vec![PeerId(100), PeerId(101)],
        )),
    ];

    for msg in &messages {
        let frame = encode_frame(msg.as_ref());
        assert_eq!(frame.len(), frame_len(msg.as_ref()), "{msg:?}");
    }
}

#[test]
fn test_mixed_stream_through_parser_in_odd_chunks() {
    let position = Position {
        header: Header::new(PeerId(100), PeerId::SERVER),
        entity: 42,
        label: "spawn".into(),
        grounded: false,
    };
    let rpc = RpcMessage::new(NetId(7), "Fire", vec![RpcArg::Int(3)]).unwrap();

    let mut stream = Vec::new();
    stream.extend_from_slice(&encode_frame(&AssignId {
        player_id: PeerId(101),
    }));
    stream.extend_from_slice(&encode_frame(&position));
    stream.extend_from_slice(&encode_frame(&rpc));

    let mut parser = PacketParser::new(registry());
    let mut out: Vec<Box<dyn Message>> = Vec::new();
    for chunk in stream.chunks(5) {
        parser.input_raw(chunk, |m| out.push(m));
    }

    assert_eq!(out.len(), 3);
    assert_eq!(
        out[0].downcast_ref::<AssignId>().map(|a| a.player_id),
        Some(PeerId(101))
    );
    assert_eq!(out[1].downcast_ref::<Position>(), Some(&position));
    assert_eq!(out[2].downcast_ref::<RpcMessage>(), Some(&rpc));
}

#[test]
fn test_relay_inner_sender_is_whatever_the_client_wrote() {
    // The envelope cannot prevent a client from writing a fake inner
    // sender; it is the Host's job to overwrite it from the outer header.
    let forged = Position {
        header: Header::new(PeerId(999), PeerId(101)),
        ..Position::default()
    };
    let relay = RelayMessage::wrap(&forged, PeerId(101), vec![]);
    let inner = relay.unwrap_inner(&registry()).unwrap();
    assert_eq!(inner.header().map(|h| h.sender), Some(PeerId(999)));
}
