//! # relaynet
//!
//! Message-oriented networking for small authoritative sessions.
//!
//! One process hosts; the others connect as clients. Clients only ever
//! hold a connection to the Host, which assigns their ids, stamps the
//! real sender on everything they send, and relays client-to-client
//! traffic. The Host also plays as a client of itself over an in-process
//! loopback, so game code is the same on every machine.
//!
//! ```text
//! NetworkContext ── Peer (Offline | Client | Host)
//!       │                 └── Connection ── PacketParser ── Transport
//!       └── MessageDispatcher ←── poll() drains what the peer queued
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relaynet::prelude::*;
//!
//! # async fn run() -> Result<(), RelaynetError> {
//! let net = NetworkContext::builder().build();
//! net.dispatcher().register::<RpcMessage, _>(|rpc, delivery| {
//!     println!("{} called {} on {}", delivery.from, rpc.method(), rpc.net_id());
//!     Ok(())
//! });
//! net.start_host(7777).await?;
//! let _updates = net.spawn_update_loop(|_, events, _| {
//!     for event in events {
//!         println!("{event}");
//!     }
//! })?;
//! # Ok(())
//! # }
//! ```

mod config;
mod context;
mod error;
mod event;
mod logging;
pub mod pump;
mod rpc;

pub use config::NetConfig;
pub use context::{NetworkContext, NetworkContextBuilder};
pub use error::RelaynetError;
pub use event::NetworkEvent;
pub use logging::init_tracing;
pub use rpc::{NetIdentity, RpcTarget, SpawnRegistry};

pub use relaynet_dispatch as dispatch;
pub use relaynet_peer as peer;
pub use relaynet_protocol as protocol;
pub use relaynet_transport as transport;

/// Everything an application usually needs.
pub mod prelude {
    pub use crate::pump::{UpdateHandle, UpdateInfo};
    pub use crate::{
        NetConfig, NetIdentity, NetworkContext, NetworkEvent, RelaynetError, RpcTarget,
        SpawnRegistry,
    };
    pub use relaynet_dispatch::{Delivery, HandlerResult, HandlerTable, Listener};
    pub use relaynet_peer::Role;
    pub use relaynet_protocol::codec::str_len;
    pub use relaynet_protocol::{
        Header, Message, MessageKind, MessageType, NetId, PeerId, ProtocolError, RpcArg,
        RpcMessage, Side, Vector3, WireReader, WireWriter,
    };
}
