//! Connections and peer roles for relaynet.
//!
//! A process runs exactly one [`Peer`] at a time:
//!
//! - [`OfflinePeer`]: no sockets. Everything sent loops back locally.
//! - [`ClientPeer`]: one connection to a remote Host. Its identity is
//!   assigned by the Host's handshake.
//! - [`HostPeer`]: accepts clients, assigns identities, routes and relays.
//!   It also plays as a client of itself over an in-process loopback.
//!
//! # Threading
//!
//! I/O runs on Tokio tasks, but nothing here calls application code.
//! Every decoded message and lifecycle event is pushed onto an
//! [`Inbound`] queue that the application drains on a single consumer.
//!
//! # Identity
//!
//! On the server side of every connection the sender field of each
//! incoming header is overwritten with the connection's assigned id, so a
//! client can never impersonate another participant.

mod client;
mod connection;
mod error;
mod host;
mod inbound;
mod offline;
mod options;
mod peer;
mod relay;

pub use client::ClientPeer;
pub use connection::{ClosedHook, Connection, ConnectionReader, MessageSink};
pub use error::PeerError;
pub use host::HostPeer;
pub use inbound::{Inbound, InboundReceiver, InboundSender, inbound_channel};
pub use offline::OfflinePeer;
pub use options::PeerOptions;
pub use peer::{Peer, Role};
