//! Identity types and protocol constants.
//!
//! Everything here is a plain value type. The numeric values are part of
//! the wire format and must never change.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Hard ceiling on a frame's declared body length (TypeID included).
pub const DEFAULT_MAX_FRAME_BODY: usize = 64 * 1024;

/// Default number of remote clients a Host accepts at once.
pub const DEFAULT_MAX_CONNECTIONS: usize = 16;

/// Size of the `BodyLength` prefix in front of every frame.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Size of the `TypeID` at the start of every body.
pub const TYPE_ID_LEN: usize = 4;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// The network identity of a participant.
///
/// A handful of values are sentinels with protocol meaning rather than
/// real peers: see the associated constants.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PeerId(pub i32);

impl PeerId {
    /// The authoritative routing point. Messages addressed here are
    /// handled by the Host's server persona.
    pub const SERVER: PeerId = PeerId(0);
    /// The Host's own player identity.
    pub const HOST_SELF: PeerId = PeerId(1);
    /// First identity handed to an accepted client. Later clients get
    /// monotonically increasing ids.
    pub const FIRST_DYNAMIC: PeerId = PeerId(100);
    /// Target meaning "every connected peer".
    pub const BROADCAST: PeerId = PeerId(-1);
    /// Identity a Client holds until the Host assigns it one.
    pub const UNASSIGNED: PeerId = PeerId(-1);

    /// `true` for the sentinel values that never name a real remote client.
    pub fn is_sentinel(self) -> bool {
        self.0 < Self::FIRST_DYNAMIC.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Numeric type id of a message kind. Globally unique and stable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MessageType(pub i32);

impl MessageType {
    /// Identity assignment handshake, Host to Client.
    pub const ASSIGN_ID: MessageType = MessageType(1);
    /// Client-to-client delivery through the Host.
    pub const RELAY: MessageType = MessageType(2);
    /// Remote procedure call envelope.
    pub const RPC: MessageType = MessageType(3);
    /// First id available to application messages. Everything below is
    /// reserved for this layer.
    pub const FIRST_USER: MessageType = MessageType(100);
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type-{}", self.0)
    }
}

/// Identity of a remote-controlled object. Opaque to this layer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NetId(pub i32);

impl fmt::Display for NetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "net-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Routing header
// ---------------------------------------------------------------------------

/// Routing information carried by message kinds that can be addressed.
///
/// On the wire: `SenderID:i32 | TargetID:i32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub sender: PeerId,
    pub target: PeerId,
}

impl Header {
    /// Encoded size in bytes.
    pub const ENCODED_LEN: usize = 8;

    pub fn new(sender: PeerId, target: PeerId) -> Self {
        Self { sender, target }
    }
}

impl Default for Header {
    fn default() -> Self {
        Self {
            sender: PeerId::UNASSIGNED,
            target: PeerId::SERVER,
        }
    }
}

/// Which persona received a message.
///
/// A Host process receives both as the server (from its clients, including
/// its own loopback persona) and as a client (from its own server persona).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Received by an authoritative endpoint: a Host's server-side
    /// connection, or an offline peer.
    Server,
    /// Received from the Host by a client endpoint.
    Client,
}
