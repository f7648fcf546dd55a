//! Message kinds the layer itself relies on: the identity handshake and
//! the relay envelope.

use bytes::Bytes;

use crate::codec::{WireReader, WireWriter};
use crate::message::{decode_body, encode_body};
use crate::{
    Header, Message, MessageKind, MessageRegistry, MessageType, PeerId, ProtocolError,
};

// ---------------------------------------------------------------------------
// AssignId
// ---------------------------------------------------------------------------

/// Host to Client handshake: "your identity is `player_id`".
///
/// Carries no routing header; the body is a single `PlayerID:i32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignId {
    pub player_id: PeerId,
}

impl Default for AssignId {
    fn default() -> Self {
        Self {
            player_id: PeerId::UNASSIGNED,
        }
    }
}

impl Message for AssignId {
    fn message_type(&self) -> MessageType {
        Self::TYPE
    }

    fn encoded_len(&self) -> usize {
        4
    }

    fn encode(&self, w: &mut WireWriter) {
        w.put_i32(self.player_id.0);
    }

    fn decode(&mut self, r: &mut WireReader<'_>) -> Result<(), ProtocolError> {
        self.player_id = r.get_peer_id()?;
        Ok(())
    }
}

impl MessageKind for AssignId {
    const TYPE: MessageType = MessageType::ASSIGN_ID;
}

// ---------------------------------------------------------------------------
// RelayMessage
// ---------------------------------------------------------------------------

/// A message one client asks the Host to forward to other clients.
///
/// Payload layout:
///
/// ```text
/// Header | Target:i32 | ExcludeCount:i32 | Exclude:i32* | InnerLen:i32 | Inner
/// ```
///
/// `Inner` is a frame body (`TypeID | Payload`). The envelope is always
/// addressed to the server; `target` is the final destination, which may
/// be [`PeerId::BROADCAST`].
///
/// The inner message's own sender field is never trusted: the Host
/// re-stamps it from this envelope's header, which the server-side
/// connection has already stamped with the real sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    pub header: Header,
    pub target: PeerId,
    pub exclude: Vec<PeerId>,
    inner: Bytes,
}

impl Default for RelayMessage {
    fn default() -> Self {
        Self {
            header: Header::default(),
            target: PeerId::BROADCAST,
            exclude: Vec::new(),
            inner: Bytes::new(),
        }
    }
}

impl RelayMessage {
    /// Wraps `inner` for delivery to `target`, skipping `exclude` when
    /// broadcasting.
    pub fn wrap(inner: &dyn Message, target: PeerId, exclude: Vec<PeerId>) -> Self {
        let sender = inner.header().map_or(PeerId::UNASSIGNED, |h| h.sender);
        Self {
            header: Header::new(sender, PeerId::SERVER),
            target,
            exclude,
            inner: encode_body(inner),
        }
    }

    /// The wrapped frame body.
    pub fn inner_body(&self) -> &[u8] {
        &self.inner
    }

    /// Rebuilds the wrapped message.
    ///
    /// # Errors
    /// Fails if the inner body is not a registered, well-formed message.
    pub fn unwrap_inner(
        &self,
        registry: &MessageRegistry,
    ) -> Result<Box<dyn Message>, ProtocolError> {
        decode_body(registry, &self.inner)
    }
}

impl Message for RelayMessage {
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
        Header::ENCODED_LEN + 4 + 4 + 4 * self.exclude.len() + 4 + self.inner.len()
    }

    fn encode(&self, w: &mut WireWriter) {
        w.put_header(&self.header);
        w.put_i32(self.target.0);
        w.put_i32(self.exclude.len() as i32);
        for id in &self.exclude {
            w.put_i32(id.0);
        }
        w.put_i32(self.inner.len() as i32);
        w.put_slice(&self.inner);
    }

    fn decode(&mut self, r: &mut WireReader<'_>) -> Result<(), ProtocolError> {
        self.header = r.get_header()?;
        self.target = r.get_peer_id()?;

        let count = r.get_len()?;
        // Bound the allocation by what the body can actually hold.
        if count.saturating_mul(4) > r.remaining() {
            return Err(ProtocolError::Truncated {
                needed: count.saturating_mul(4),
                available: r.remaining(),
            });
        }
        self.exclude = (0..count)
            .map(|_| r.get_peer_id())
            .collect::<Result<_, _>>()?;

        let inner_len = r.get_len()?;
        self.inner = Bytes::copy_from_slice(r.get_bytes(inner_len)?);
        Ok(())
    }
}

impl MessageKind for RelayMessage {
    const TYPE: MessageType = MessageType::RELAY;
}
