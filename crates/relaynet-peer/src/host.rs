//! The Host role: an authoritative server that is also a client of itself.
//!
//! # Routing table
//!
//! The Host keeps one `PeerId -> Connection` table behind a single mutex.
//! It holds every accepted remote client plus one extra entry,
//! [`PeerId::HOST_SELF`], which is the server-side end of an in-process
//! loopback pair. The client-side end of that pair is how the Host's own
//! player persona talks to its server persona, through exactly the same
//! parse/stamp/dispatch path as a remote client.
//!
//! ```text
//!                 ┌──────────── HostPeer ─────────────┐
//!  remote client ─┤ table[100] ─┐                     │
//!  remote client ─┤ table[101] ─┼─→ server persona    │
//!                 │ table[1] ←──┴── loopback ── self_client (client persona)
//!                 └───────────────────────────────────┘
//! ```
//!
//! Insertions happen on the accept loop, removals on transport close
//! callbacks, and lookups on any thread that sends. Fan-out snapshots the
//! table under the lock and writes outside it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use relaynet_dispatch::Delivery;
use relaynet_protocol::{
    AssignId, Message, MessageRegistry, PeerId, RelayMessage, Side, encode_frame,
};
use relaynet_transport::{Acceptor, PendingTransport, TransportError, spawn_supervised};
use tokio::task::JoinHandle;

use crate::connection::{Connection, ConnectionReader, check_frame};
use crate::inbound::{Inbound, InboundSender, push};
use crate::{PeerError, PeerOptions};

pub(crate) struct HostShared {
    options: PeerOptions,
    registry: Arc<MessageRegistry>,
    inbound: InboundSender,
    table: Mutex<HashMap<PeerId, Arc<Connection>>>,
    self_client: Connection,
    next_id: AtomicI32,
    closing: AtomicBool,
}

impl HostShared {
    fn new(
        options: PeerOptions,
        registry: Arc<MessageRegistry>,
        inbound: InboundSender,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<HostShared>| {
            let client_reader = ConnectionReader::new(
                PeerId::SERVER,
                Side::Client,
                Arc::clone(&registry),
                &options,
                client_sink(inbound.clone()),
                Box::new(|| tracing::debug!("host client persona closed")),
            );
            let server_reader =
                server_reader(weak.clone(), PeerId::HOST_SELF, &registry, &options);
            let (self_client, self_server) =
                Connection::loopback_pair(PeerId::HOST_SELF, client_reader, server_reader, &options);

            let mut table = HashMap::new();
            table.insert(PeerId::HOST_SELF, Arc::new(self_server));

            HostShared {
                options,
                registry,
                inbound,
                table: Mutex::new(table),
                self_client,
                next_id: AtomicI32::new(PeerId::FIRST_DYNAMIC.0),
                closing: AtomicBool::new(false),
            }
        })
    }

    pub(crate) fn registry(&self) -> &MessageRegistry {
        &self.registry
    }

    fn remote_count(table: &HashMap<PeerId, Arc<Connection>>) -> usize {
        table.keys().filter(|id| **id != PeerId::HOST_SELF).count()
    }

    /// Registers a freshly accepted transport under a new identity.
    fn admit<P: PendingTransport>(self: &Arc<Self>, pending: P) {
        if self.closing.load(Ordering::Acquire) {
            return;
        }
        let addr = pending.peer_addr();
        let current = Self::remote_count(&self.table.lock());
        if current >= self.options.max_connections {
            tracing::warn!(
                ?addr,
                max = self.options.max_connections,
                "connection rejected: server full"
            );
            // Dropping the pending transport closes the socket.
            return;
        }

        let Some(id) = allocate_id(&self.next_id) else {
            tracing::warn!(?addr, "connection rejected: peer ids exhausted");
            return;
        };
        // Announced before any of its messages can reach the queue.
        push(&self.inbound, Inbound::PeerConnected(id));

        let reader = server_reader(Arc::downgrade(self), id, &self.registry, &self.options);
        let transport = pending.start(Box::new(reader));
        let connection = Arc::new(Connection::new(id, Side::Server, transport, &self.options));

        self.table.lock().insert(id, Arc::clone(&connection));
        if !connection.is_alive() {
            // Closed before it was registered; its eviction already ran.
            self.table.lock().remove(&id);
            return;
        }

        tracing::info!(peer_id = %id, ?addr, "client connected");
        if let Err(e) = connection.send(&AssignId { player_id: id }) {
            tracing::debug!(peer_id = %id, error = %e, "failed to send identity handshake");
        }
    }

    /// Drops a closed connection from the table.
    fn evict(&self, id: PeerId) {
        let removed = self.table.lock().remove(&id);
        if self.closing.load(Ordering::Acquire) || id == PeerId::HOST_SELF {
            return;
        }
        if removed.is_some() {
            tracing::info!(peer_id = %id, "client disconnected");
        }
        push(&self.inbound, Inbound::PeerDisconnected(id));
    }

    fn lookup(&self, id: PeerId) -> Option<Arc<Connection>> {
        self.table.lock().get(&id).cloned()
    }

    /// Delivers into this process's own queue as the server persona.
    pub(crate) fn deliver_local(&self, message: Box<dyn Message>, from: PeerId) {
        push(
            &self.inbound,
            Inbound::Message {
                message,
                delivery: Delivery::new(from, Side::Server),
            },
        );
    }

    /// The routing decision for every message the Host sends or forwards.
    pub(crate) fn route(&self, message: Box<dyn Message>, exclude: &[PeerId]) -> Result<(), PeerError> {
        let Some(header) = message.header().copied() else {
            return Err(PeerError::NoHeader(message.message_type()));
        };

        if header.target == PeerId::SERVER {
            if header.sender == PeerId::HOST_SELF {
                // The Host acting as its own client.
                return self.self_client.send(message.as_ref());
            }
            self.deliver_local(message, header.sender);
            return Ok(());
        }

        if header.target == PeerId::BROADCAST {
            return self.broadcast(message.as_ref(), exclude);
        }

        match self.lookup(header.target) {
            Some(connection) => connection.send(message.as_ref()),
            None => {
                tracing::warn!(
                    target_id = %header.target,
                    message_type = %message.message_type(),
                    "target not connected, dropping message"
                );
                Ok(())
            }
        }
    }

    /// Encodes once and writes to every table entry not in `exclude`.
    fn broadcast(&self, message: &dyn Message, exclude: &[PeerId]) -> Result<(), PeerError> {
        check_frame(message, self.options.max_frame_body)?;
        let frame = encode_frame(message);
        let targets: Vec<Arc<Connection>> = self
            .table
            .lock()
            .iter()
            .filter(|(id, _)| !exclude.contains(id))
            .map(|(_, connection)| Arc::clone(connection))
            .collect();

        tracing::trace!(
            message_type = %message.message_type(),
            recipients = targets.len(),
            "broadcasting"
        );
        for connection in targets {
            // A peer disconnecting mid-broadcast is not the sender's problem.
            if let Err(e) = connection.send_frame(frame.clone()) {
                tracing::debug!(peer_id = %connection.remote_id(), error = %e, "broadcast send failed");
            }
        }
        Ok(())
    }

    fn close(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        let connections: Vec<Arc<Connection>> =
            self.table.lock().drain().map(|(_, c)| c).collect();
        for connection in connections {
            connection.close();
        }
        self.self_client.close();
    }
}

/// Hands out the next dynamic id. Ids are never reused, so the counter
/// stops at `i32::MAX` instead of wrapping into reserved values.
fn allocate_id(counter: &AtomicI32) -> Option<PeerId> {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_add(1))
        .ok()
        .map(PeerId)
}

/// Reader for a server-side connection: stamps `id`, unwraps relays,
/// queues everything else.
fn server_reader(
    host: Weak<HostShared>,
    id: PeerId,
    registry: &Arc<MessageRegistry>,
    options: &PeerOptions,
) -> ConnectionReader {
    let on_message = host.clone();
    ConnectionReader::new(
        id,
        Side::Server,
        Arc::clone(registry),
        options,
        Box::new(move |message, delivery| {
            let Some(host) = on_message.upgrade() else {
                return;
            };
            if let Some(relay) = message.downcast_ref::<RelayMessage>() {
                host.route_relay(relay);
                return;
            }
            if message.is::<AssignId>() {
                tracing::debug!(from = %delivery.from, "ignoring identity handshake sent to the server");
                return;
            }
            push(&host.inbound, Inbound::Message { message, delivery });
        }),
        Box::new(move || {
            if let Some(host) = host.upgrade() {
                host.evict(id);
            }
        }),
    )
}

/// Reader for the Host's own client persona.
fn client_sink(inbound: InboundSender) -> crate::connection::MessageSink {
    Box::new(move |message, delivery| {
        if message.is::<AssignId>() || message.is::<RelayMessage>() {
            return;
        }
        push(&inbound, Inbound::Message { message, delivery });
    })
}

/// Accepts until the acceptor fails permanently or the Host goes away.
async fn accept_loop<A: Acceptor>(
    mut acceptor: A,
    host: Weak<HostShared>,
) -> Result<(), TransportError> {
    loop {
        let accepted = acceptor.accept().await;
        let Some(host) = host.upgrade() else {
            return Ok(());
        };
        if host.closing.load(Ordering::Acquire) {
            return Ok(());
        }
        match accepted {
            Ok(pending) => host.admit(pending),
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                drop(host);
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        }
    }
}

/// A peer that listens for clients and routes between them.
pub struct HostPeer {
    shared: Arc<HostShared>,
    local_addr: Option<SocketAddr>,
    accept_task: JoinHandle<()>,
}

impl HostPeer {
    /// Starts hosting on an already bound acceptor.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<A: Acceptor>(
        acceptor: A,
        registry: Arc<MessageRegistry>,
        options: PeerOptions,
        inbound: InboundSender,
    ) -> Self {
        let local_addr = acceptor.local_addr().ok();
        let shared = HostShared::new(options, registry, inbound);
        let accept_task =
            spawn_supervised("host-accept", accept_loop(acceptor, Arc::downgrade(&shared)));

        tracing::info!(?local_addr, "host started");
        push(&shared.inbound, Inbound::LocalIdAssigned(PeerId::HOST_SELF));

        Self {
            shared,
            local_addr,
            accept_task,
        }
    }

    pub fn local_id(&self) -> PeerId {
        PeerId::HOST_SELF
    }

    /// Address the Host is listening on.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Connected remote clients (the Host's own persona excluded).
    pub fn connection_count(&self) -> usize {
        HostShared::remote_count(&self.shared.table.lock())
    }

    /// Ids of connected remote clients, ascending.
    pub fn connected_peers(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self
            .shared
            .table
            .lock()
            .keys()
            .copied()
            .filter(|id| *id != PeerId::HOST_SELF)
            .collect();
        ids.sort();
        ids
    }

    /// Routes `message` by its header. See the module docs.
    pub fn send(&self, message: Box<dyn Message>) -> Result<(), PeerError> {
        self.send_excluding(message, &[])
    }

    /// Like [`send`](Self::send); broadcasts skip the ids in `exclude`.
    pub fn send_excluding(&self, message: Box<dyn Message>, exclude: &[PeerId]) -> Result<(), PeerError> {
        if self.shared.closing.load(Ordering::Acquire) {
            return Err(PeerError::Closed);
        }
        self.shared.route(message, exclude)
    }

    /// Disconnects one remote client.
    pub fn kick(&self, id: PeerId) -> bool {
        if id == PeerId::HOST_SELF {
            return false;
        }
        match self.shared.lookup(id) {
            Some(connection) => {
                connection.close();
                true
            }
            None => false,
        }
    }

    /// Stops accepting and closes every connection. No events are emitted
    /// for the connections closed here.
    pub fn close(&self) {
        self.accept_task.abort();
        self.shared.close();
        tracing::info!("host closed");
    }
}

impl Drop for HostPeer {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.shared.close();
    }
}
