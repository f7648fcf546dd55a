use relaynet_dispatch::Delivery;
use relaynet_protocol::{Message, PeerId, Side};

use crate::inbound::{Inbound, InboundSender, push};
use crate::PeerError;

/// Single-process peer: every message loops straight back to the local
/// inbound queue, as if the Host were talking to itself.
#[derive(Debug)]
pub struct OfflinePeer {
    inbound: InboundSender,
}

impl OfflinePeer {
    pub fn start(inbound: InboundSender) -> Self {
        tracing::info!("offline peer started");
        push(&inbound, Inbound::LocalIdAssigned(PeerId::HOST_SELF));
        Self { inbound }
    }

    pub fn local_id(&self) -> PeerId {
        PeerId::HOST_SELF
    }

    /// Queues `message` for local dispatch as a server-side delivery.
    pub fn send(&self, message: Box<dyn Message>) -> Result<(), PeerError> {
        let from = message.header().map_or(PeerId::HOST_SELF, |h| h.sender);
        if self.inbound.is_closed() {
            return Err(PeerError::Closed);
        }
        push(
            &self.inbound,
            Inbound::Message {
                message,
                delivery: Delivery::new(from, Side::Server),
            },
        );
        Ok(())
    }
}
