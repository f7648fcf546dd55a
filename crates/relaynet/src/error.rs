//! Unified error type for relaynet.

use relaynet_dispatch::DispatchError;
use relaynet_peer::PeerError;
use relaynet_protocol::ProtocolError;
use relaynet_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `relaynet` crate you deal with this single error type
/// instead of importing errors from each layer. The `#[from]` attributes
/// let `?` convert layer errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum RelaynetError {
    /// Socket or loopback failure (bind, connect, send on a closed link).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Encoding, decoding or registration failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Routing failure reported by the active peer.
    #[error(transparent)]
    Peer(#[from] PeerError),

    /// The configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// No role has been started, or the last session was closed.
    #[error("network not started")]
    NotStarted,

    /// `update_rate_hz` is 0; call `poll` manually instead.
    #[error("update loop disabled by configuration")]
    ManualPolling,
}
