//! Error types for the peer layer.

use relaynet_protocol::{MessageType, ProtocolError};
use relaynet_transport::TransportError;

/// Errors surfaced by connections and peers.
///
/// Routine routing conditions (unknown target, relay integrity failures)
/// are logged and dropped instead; see the peer implementations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Only message kinds with a routing header can be sent by a peer.
    #[error("message {0} carries no routing header")]
    NoHeader(MessageType),

    /// The peer has been closed.
    #[error("peer closed")]
    Closed,
}
