use std::fmt;

use relaynet_protocol::PeerId;

/// Lifecycle notifications returned by [`NetworkContext::poll`](crate::NetworkContext::poll),
/// in the order they happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    /// This process has an identity: [`PeerId::HOST_SELF`] for a Host or
    /// Offline session, the Host-assigned id for a Client.
    LocalIdAssigned(PeerId),
    /// A remote client joined (Host only).
    PeerConnected(PeerId),
    /// A remote client left (Host only).
    PeerDisconnected(PeerId),
    /// The Client lost its Host. The context is back to Offline.
    DisconnectedFromHost,
}

impl fmt::Display for NetworkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkEvent::LocalIdAssigned(id) => write!(f, "local id assigned: {id}"),
            NetworkEvent::PeerConnected(id) => write!(f, "{id} connected"),
            NetworkEvent::PeerDisconnected(id) => write!(f, "{id} disconnected"),
            NetworkEvent::DisconnectedFromHost => f.write_str("disconnected from host"),
        }
    }
}
