//! What network tasks hand to the polling thread.

use relaynet_dispatch::Delivery;
use relaynet_protocol::{Message, PeerId};
use tokio::sync::mpsc;

/// One item on a peer's inbound queue.
///
/// I/O tasks only ever produce these; a single consumer drains the queue
/// and runs application handlers, so handler code never races with itself.
#[derive(Debug)]
pub enum Inbound {
    /// A decoded, identity-stamped message.
    Message {
        message: Box<dyn Message>,
        delivery: Delivery,
    },
    /// This process now has an identity (handshake done, or Host/Offline
    /// started).
    LocalIdAssigned(PeerId),
    /// A remote client joined the Host.
    PeerConnected(PeerId),
    /// A remote client left the Host.
    PeerDisconnected(PeerId),
    /// The Client's connection to its Host is gone.
    DisconnectedFromHost,
}

pub type InboundSender = mpsc::UnboundedSender<Inbound>;
pub type InboundReceiver = mpsc::UnboundedReceiver<Inbound>;

/// Creates a fresh inbound queue.
pub fn inbound_channel() -> (InboundSender, InboundReceiver) {
    mpsc::unbounded_channel()
}

/// Pushes onto the queue; a dropped receiver means nobody is listening
/// any more, which is not an error for the producer.
pub(crate) fn push(inbound: &InboundSender, item: Inbound) {
    if inbound.send(item).is_err() {
        tracing::trace!("inbound queue closed, dropping item");
    }
}
