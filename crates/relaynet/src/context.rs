//! `NetworkContext`: the object the rest of an application talks to.
//!
//! It owns the message registry, the dispatcher and the active peer, and
//! it is the only place role transitions happen:
//!
//! ```text
//!           start_offline / start_host
//! (stopped) ──────────────────────────→ Offline | Host
//!     │            connect                  │
//!     ├──────────────────────────→ Client ──┤ handshake → connected
//!     │                                     │
//!     ←──────── close / host lost ──────────┘
//! ```
//!
//! A context is cheap to clone; clones share everything. There is no
//! global instance: construct one and pass it to whoever needs it.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::net::SocketAddr;

use parking_lot::{Mutex, RwLock};
use relaynet_dispatch::{Delivery, Listener, MessageDispatcher};
use relaynet_peer::{
    ClientPeer, HostPeer, Inbound, InboundReceiver, OfflinePeer, Peer, PeerError, Role,
    inbound_channel,
};
use relaynet_protocol::{
    Message, MessageKind, MessageRegistry, PeerId, RelayMessage, RpcMessage, Side,
};
use relaynet_transport::TcpAcceptor;
use tracing::{debug, info, trace, warn};

use crate::pump::{self, UpdateHandle, UpdateInfo};
use crate::{NetConfig, NetworkEvent, RelaynetError, RpcTarget, SpawnRegistry};

/// Builder for a [`NetworkContext`].
///
/// # Example
///
/// ```rust,ignore
/// let net = NetworkContext::builder()
///     .config(NetConfig::from_json_str(&json)?)
///     .register::<Chat>()?
///     .build();
/// net.start_host(7777).await?;
/// ```
pub struct NetworkContextBuilder {
    config: NetConfig,
    registry: MessageRegistry,
}

impl NetworkContextBuilder {
    /// Default config, built-in message kinds registered.
    pub fn new() -> Self {
        Self {
            config: NetConfig::default(),
            registry: MessageRegistry::with_builtins(),
        }
    }

    pub fn config(mut self, config: NetConfig) -> Self {
        self.config = config.validated();
        self
    }

    /// Registers an application message kind.
    ///
    /// # Errors
    /// Fails if another kind already uses `T::TYPE`.
    pub fn register<T: MessageKind>(mut self) -> Result<Self, RelaynetError> {
        self.registry.register::<T>()?;
        Ok(self)
    }

    pub fn build(self) -> NetworkContext {
        debug!(
            kinds = self.registry.len(),
            max_connections = self.config.max_connections,
            "network context built"
        );
        NetworkContext {
            inner: Arc::new(Inner {
                config: self.config,
                registry: Arc::new(self.registry),
                dispatcher: MessageDispatcher::new(),
                session: Mutex::new(None),
                sessions_started: AtomicU64::new(0),
                rpc_target: RwLock::new(None),
                spawn_registry: RwLock::new(None),
            }),
        }
    }
}

impl Default for NetworkContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The running peer plus the queue it reports into.
struct Session {
    id: u64,
    peer: Arc<Peer>,
    inbound: InboundReceiver,
}

struct Inner {
    config: NetConfig,
    registry: Arc<MessageRegistry>,
    dispatcher: MessageDispatcher,
    session: Mutex<Option<Session>>,
    sessions_started: AtomicU64,
    rpc_target: RwLock<Option<Arc<dyn RpcTarget>>>,
    spawn_registry: RwLock<Option<Arc<dyn SpawnRegistry>>>,
}

/// Handle to the network layer. See the module docs.
#[derive(Clone)]
pub struct NetworkContext {
    inner: Arc<Inner>,
}

impl NetworkContext {
    pub fn builder() -> NetworkContextBuilder {
        NetworkContextBuilder::new()
    }

    pub fn config(&self) -> &NetConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<MessageRegistry> {
        &self.inner.registry
    }

    pub fn dispatcher(&self) -> &MessageDispatcher {
        &self.inner.dispatcher
    }

    // -- Role transitions ----------------------------------------------------

    /// Runs without sockets: every send loops back to this process.
    ///
    /// Must be called from within a Tokio runtime, like every `start_*`.
    pub fn start_offline(&self) {
        self.close();
        let (tx, rx) = inbound_channel();
        self.install(Peer::Offline(OfflinePeer::start(tx)), rx);
    }

    /// Hosts on `0.0.0.0:port` over TCP.
    pub async fn start_host(&self, port: u16) -> Result<(), RelaynetError> {
        self.start_host_at(&format!("0.0.0.0:{port}")).await
    }

    /// Hosts on an explicit address (`127.0.0.1:0` picks a free port; see
    /// [`local_addr`](Self::local_addr)).
    pub async fn start_host_at(&self, addr: &str) -> Result<(), RelaynetError> {
        self.close();
        let options = self.inner.config.peer_options();
        let acceptor = TcpAcceptor::bind(addr, options.transport_options()).await?;
        let (tx, rx) = inbound_channel();
        let host = HostPeer::start(acceptor, Arc::clone(&self.inner.registry), options, tx);
        self.install(Peer::Host(host), rx);
        Ok(())
    }

    /// Hosts over WebSocket on `addr`.
    #[cfg(feature = "websocket")]
    pub async fn start_host_ws(&self, addr: &str) -> Result<(), RelaynetError> {
        self.close();
        let options = self.inner.config.peer_options();
        let acceptor =
            relaynet_transport::WebSocketAcceptor::bind(addr, options.transport_options()).await?;
        let (tx, rx) = inbound_channel();
        let host = HostPeer::start(acceptor, Arc::clone(&self.inner.registry), options, tx);
        self.install(Peer::Host(host), rx);
        Ok(())
    }

    /// Connects to a Host over TCP. The local id stays
    /// [`PeerId::UNASSIGNED`] until the handshake shows up in
    /// [`poll`](Self::poll) as [`NetworkEvent::LocalIdAssigned`].
    pub async fn connect(&self, host: &str, port: u16) -> Result<(), RelaynetError> {
        self.close();
        let (tx, rx) = inbound_channel();
        let client = ClientPeer::connect_tcp(
            &format!("{host}:{port}"),
            Arc::clone(&self.inner.registry),
            self.inner.config.peer_options(),
            tx,
        )
        .await?;
        self.install(Peer::Client(client), rx);
        Ok(())
    }

    /// Connects to a Host over WebSocket (`ws://host:port`).
    #[cfg(feature = "websocket")]
    pub async fn connect_ws(&self, url: &str) -> Result<(), RelaynetError> {
        self.close();
        let (tx, rx) = inbound_channel();
        let client = ClientPeer::connect_ws(
            url,
            Arc::clone(&self.inner.registry),
            self.inner.config.peer_options(),
            tx,
        )
        .await?;
        self.install(Peer::Client(client), rx);
        Ok(())
    }

    /// Ends the current session, if any. Nothing queued by it is delivered
    /// and no events are reported for it. Idempotent.
    pub fn close(&self) {
        let previous = self.inner.session.lock().take();
        if let Some(session) = previous {
            info!(role = %session.peer.role(), "closing network session");
            session.peer.close();
        }
    }

    fn install(&self, peer: Peer, inbound: InboundReceiver) {
        let id = self.inner.sessions_started.fetch_add(1, Ordering::Relaxed) + 1;
        info!(role = %peer.role(), session = id, "network session started");
        let previous = self.inner.session.lock().replace(Session {
            id,
            peer: Arc::new(peer),
            inbound,
        });
        if let Some(previous) = previous {
            // Another start raced this one; the later one wins.
            previous.peer.close();
        }
    }

    /// Drops session `id` if it is still the current one.
    fn end_session(&self, id: u64) {
        let ended = {
            let mut guard = self.inner.session.lock();
            match guard.as_ref() {
                Some(session) if session.id == id => guard.take(),
                _ => None,
            }
        };
        if let Some(session) = ended {
            info!(session = id, "host lost, back to offline");
            session.peer.close();
        }
    }

    fn peer(&self) -> Result<Arc<Peer>, RelaynetError> {
        self.inner
            .session
            .lock()
            .as_ref()
            .map(|s| Arc::clone(&s.peer))
            .ok_or(RelaynetError::NotStarted)
    }

    // -- Queries -------------------------------------------------------------

    /// The current role. A context with no session counts as Offline.
    pub fn role(&self) -> Role {
        self.peer().map_or(Role::Offline, |p| p.role())
    }

    pub fn is_started(&self) -> bool {
        self.inner.session.lock().is_some()
    }

    /// This process's identity, or [`PeerId::UNASSIGNED`].
    pub fn local_id(&self) -> PeerId {
        self.peer().map_or(PeerId::UNASSIGNED, |p| p.local_id())
    }

    pub fn is_connected(&self) -> bool {
        self.peer().is_ok_and(|p| p.is_connected())
    }

    /// Remote clients for a Host, 1 or 0 for a Client.
    pub fn connection_count(&self) -> usize {
        self.peer().map_or(0, |p| p.connection_count())
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.peer().map(|p| p.connected_peers()).unwrap_or_default()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.peer().ok().and_then(|p| p.local_addr())
    }

    // -- Sending -------------------------------------------------------------

    /// Sends to the authoritative server: the remote Host for a Client,
    /// this process's own server persona for a Host or Offline session.
    pub fn send_to_server<M: Message>(&self, mut message: M) -> Result<(), RelaynetError> {
        let peer = self.peer()?;
        if let Some(header) = message.header_mut() {
            header.sender = peer.local_id();
            header.target = PeerId::SERVER;
        }
        peer.send(Box::new(message))?;
        Ok(())
    }

    /// Sends to one participant. A Client's message is relayed by the Host.
    /// Unknown targets are logged by the Host and dropped.
    pub fn send_to_player<M: Message>(&self, target: PeerId, message: M) -> Result<(), RelaynetError> {
        self.route(message, target, &[])
    }

    /// Sends to every participant except `exclude`.
    pub fn broadcast<M: Message>(&self, message: M, exclude: Option<PeerId>) -> Result<(), RelaynetError> {
        self.route(message, PeerId::BROADCAST, exclude.as_slice())
    }

    pub fn broadcast_excluding<M: Message>(
        &self,
        message: M,
        exclude: &[PeerId],
    ) -> Result<(), RelaynetError> {
        self.route(message, PeerId::BROADCAST, exclude)
    }

    /// Broadcasts a received message on behalf of its original sender.
    ///
    /// Only a Host can vouch for someone else's identity: on a Host the
    /// header sender is kept as is, anywhere else this is a plain
    /// [`broadcast`](Self::broadcast).
    pub fn rebroadcast<M: Message>(&self, mut message: M, exclude: Option<PeerId>) -> Result<(), RelaynetError> {
        let peer = self.peer()?;
        let Peer::Host(host) = peer.as_ref() else {
            return self.broadcast(message, exclude);
        };
        let message_type = message.message_type();
        let header = message
            .header_mut()
            .ok_or(PeerError::NoHeader(message_type))?;
        header.target = PeerId::BROADCAST;
        host.send_excluding(Box::new(message), exclude.as_slice())?;
        Ok(())
    }

    fn route<M: Message>(&self, mut message: M, target: PeerId, exclude: &[PeerId]) -> Result<(), RelaynetError> {
        let peer = self.peer()?;
        let local_id = peer.local_id();
        let message_type = message.message_type();
        let header = message
            .header_mut()
            .ok_or(PeerError::NoHeader(message_type))?;
        header.sender = local_id;
        header.target = target;

        match peer.as_ref() {
            Peer::Client(client) => {
                let relay = RelayMessage::wrap(&message, target, exclude.to_vec());
                client.send(Box::new(relay))?;
            }
            Peer::Host(host) => host.send_excluding(Box::new(message), exclude)?,
            Peer::Offline(offline) => {
                if target == PeerId::BROADCAST && exclude.contains(&local_id) {
                    trace!(%message_type, "offline broadcast excludes self, nothing to do");
                    return Ok(());
                }
                offline.send(Box::new(message))?;
            }
        }
        Ok(())
    }

    // -- Handlers ------------------------------------------------------------

    /// Registers every handler `listener` declares. See
    /// [`MessageDispatcher::bind`].
    pub fn bind<L: Listener>(&self, listener: &Arc<L>) -> Result<usize, RelaynetError> {
        Ok(self.inner.dispatcher.bind(listener)?)
    }

    pub fn unbind<L: Listener>(&self, listener: &Arc<L>) -> bool {
        self.inner.dispatcher.unbind(listener)
    }

    /// Installs the object that resolves RPC calls, replacing any previous
    /// one.
    pub fn set_rpc_target(&self, target: Arc<dyn RpcTarget>) {
        *self.inner.rpc_target.write() = Some(target);
    }

    pub fn clear_rpc_target(&self) {
        *self.inner.rpc_target.write() = None;
    }

    /// Installs the object table consulted before server-side RPCs reach
    /// the [`RpcTarget`]: calls for unknown objects, or from a peer that
    /// does not own the object, are dropped.
    pub fn set_spawn_registry(&self, registry: Arc<dyn SpawnRegistry>) {
        *self.inner.spawn_registry.write() = Some(registry);
    }

    pub fn spawn_registry(&self) -> Option<Arc<dyn SpawnRegistry>> {
        self.inner.spawn_registry.read().clone()
    }

    // -- Polling -------------------------------------------------------------

    /// Drains everything the network produced since the last call:
    /// dispatches messages to bound handlers (and RPCs to the
    /// [`RpcTarget`]) on the calling thread, and returns lifecycle events.
    pub fn poll(&self) -> Vec<NetworkEvent> {
        self.drain().0
    }

    /// Like [`poll`](Self::poll), also reporting how many queue items were
    /// processed.
    pub(crate) fn drain(&self) -> (Vec<NetworkEvent>, usize) {
        let (items, session_id) = {
            let mut guard = self.inner.session.lock();
            let Some(session) = guard.as_mut() else {
                return (Vec::new(), 0);
            };
            let mut items = Vec::new();
            while let Ok(item) = session.inbound.try_recv() {
                items.push(item);
            }
            (items, session.id)
        };

        let drained = items.len();
        let mut events = Vec::new();
        for item in items {
            match item {
                Inbound::Message { message, delivery } => self.deliver(message.as_ref(), &delivery),
                Inbound::LocalIdAssigned(id) => events.push(NetworkEvent::LocalIdAssigned(id)),
                Inbound::PeerConnected(id) => events.push(NetworkEvent::PeerConnected(id)),
                Inbound::PeerDisconnected(id) => events.push(NetworkEvent::PeerDisconnected(id)),
                Inbound::DisconnectedFromHost => {
                    self.end_session(session_id);
                    events.push(NetworkEvent::DisconnectedFromHost);
                }
            }
        }
        (events, drained)
    }

    fn deliver(&self, message: &dyn Message, delivery: &Delivery) {
        let message_type = message.message_type();
        let handled = self.inner.dispatcher.dispatch(message, delivery);

        let Some(rpc) = message.downcast_ref::<RpcMessage>() else {
            if self.inner.dispatcher.handler_count(message_type) == 0 {
                trace!(%message_type, from = %delivery.from, "no handler bound");
            }
            return;
        };

        if !self.rpc_authorized(rpc, delivery) {
            return;
        }
        let target = self.inner.rpc_target.read().clone();
        let invoked = target.is_some_and(|target| {
            catch_unwind(AssertUnwindSafe(|| {
                target.invoke(rpc.net_id(), rpc.method(), rpc.args(), delivery)
            }))
            .unwrap_or_else(|_| {
                warn!(net_id = %rpc.net_id(), method = rpc.method(), "rpc target panicked");
                false
            })
        });
        if !invoked && handled == 0 {
            debug!(
                net_id = %rpc.net_id(),
                method = rpc.method(),
                from = %delivery.from,
                "unhandled rpc"
            );
        }
    }

    /// Server-side calls must name a registered object owned by the
    /// sender. Calls the Host forwards to clients are trusted.
    fn rpc_authorized(&self, rpc: &RpcMessage, delivery: &Delivery) -> bool {
        if delivery.side != Side::Server {
            return true;
        }
        let Some(registry) = self.spawn_registry() else {
            return true;
        };
        match registry.lookup(rpc.net_id()) {
            Some(identity) if identity.accepts(delivery) => true,
            Some(identity) => {
                warn!(
                    net_id = %rpc.net_id(),
                    owner = %identity.owner,
                    from = %delivery.from,
                    method = rpc.method(),
                    "rpc from non-owner dropped"
                );
                false
            }
            None => {
                debug!(net_id = %rpc.net_id(), method = rpc.method(), "rpc for unknown object dropped");
                false
            }
        }
    }

    /// Spawns the fixed-rate update loop. Each update polls this context
    /// and passes the events to `on_update`.
    ///
    /// # Errors
    /// [`RelaynetError::ManualPolling`] when `update_rate_hz` is 0.
    pub fn spawn_update_loop<F>(&self, on_update: F) -> Result<UpdateHandle, RelaynetError>
    where
        F: FnMut(&NetworkContext, &[NetworkEvent], &UpdateInfo) + Send + 'static,
    {
        pump::spawn(self.clone(), on_update)
    }
}

impl std::fmt::Debug for NetworkContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkContext")
            .field("role", &self.role())
            .field("local_id", &self.local_id())
            .field("dispatcher", &self.inner.dispatcher)
            .finish()
    }
}
