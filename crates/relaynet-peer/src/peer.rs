use std::fmt;
use std::net::SocketAddr;

use relaynet_protocol::{Message, PeerId};

use crate::{ClientPeer, HostPeer, OfflinePeer, PeerError};

/// Which role a process currently plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Offline,
    Client,
    Host,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Offline => f.write_str("offline"),
            Role::Client => f.write_str("client"),
            Role::Host => f.write_str("host"),
        }
    }
}

/// The active peer, whichever role it has.
pub enum Peer {
    Offline(OfflinePeer),
    Client(ClientPeer),
    Host(HostPeer),
}

impl Peer {
    pub fn role(&self) -> Role {
        match self {
            Peer::Offline(_) => Role::Offline,
            Peer::Client(_) => Role::Client,
            Peer::Host(_) => Role::Host,
        }
    }

    pub fn local_id(&self) -> PeerId {
        match self {
            Peer::Offline(p) => p.local_id(),
            Peer::Client(p) => p.local_id(),
            Peer::Host(p) => p.local_id(),
        }
    }

    pub fn send(&self, message: Box<dyn Message>) -> Result<(), PeerError> {
        match self {
            Peer::Offline(p) => p.send(message),
            Peer::Client(p) => p.send(message),
            Peer::Host(p) => p.send(message),
        }
    }

    /// Offline and Host peers are always "connected"; a Client only once
    /// its handshake has completed.
    pub fn is_connected(&self) -> bool {
        match self {
            Peer::Offline(_) | Peer::Host(_) => true,
            Peer::Client(p) => p.is_connected(),
        }
    }

    pub fn connection_count(&self) -> usize {
        match self {
            Peer::Host(p) => p.connection_count(),
            Peer::Client(p) => usize::from(p.is_connected()),
            Peer::Offline(_) => 0,
        }
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        match self {
            Peer::Host(p) => p.connected_peers(),
            Peer::Client(p) if p.is_connected() => vec![PeerId::SERVER],
            _ => Vec::new(),
        }
    }

    /// Listening address for a Host, the Host's address for a Client.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Peer::Host(p) => p.local_addr(),
            Peer::Client(p) => p.host_addr(),
            Peer::Offline(_) => None,
        }
    }

    pub fn close(&self) {
        match self {
            Peer::Offline(_) => tracing::info!("offline peer closed"),
            Peer::Client(p) => p.close(),
            Peer::Host(p) => p.close(),
        }
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("role", &self.role())
            .field("local_id", &self.local_id())
            .finish()
    }
}
