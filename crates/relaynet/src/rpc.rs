//! Hook for resolving RPC calls to application objects.
//!
//! The network layer only transports `(NetId, method, args)`. Which object
//! a `NetId` names, and whether it has such a method, is the
//! application's business: it answers through an [`RpcTarget`].

use relaynet_dispatch::Delivery;
use relaynet_protocol::{NetId, PeerId, RpcArg};
use serde::{Deserialize, Serialize};

/// Resolves and runs remote procedure calls.
///
/// Called on the polling task, after the dispatcher's own handlers for
/// the same message.
pub trait RpcTarget: Send + Sync + 'static {
    /// Returns `true` if some object handled the call.
    fn invoke(&self, net_id: NetId, method: &str, args: &[RpcArg], delivery: &Delivery) -> bool;
}

impl<F> RpcTarget for F
where
    F: Fn(NetId, &str, &[RpcArg], &Delivery) -> bool + Send + Sync + 'static,
{
    fn invoke(&self, net_id: NetId, method: &str, args: &[RpcArg], delivery: &Delivery) -> bool {
        self(net_id, method, args, delivery)
    }
}

/// The application's table of remote-controlled objects.
///
/// The network layer never creates or destroys objects; it only asks
/// who owns a `NetId` before offering a server-side RPC to the
/// [`RpcTarget`].
pub trait SpawnRegistry: Send + Sync + 'static {
    fn register(&self, identity: NetIdentity);

    fn unregister(&self, net_id: NetId) -> Option<NetIdentity>;

    fn lookup(&self, net_id: NetId) -> Option<NetIdentity>;
}

/// Network identity of a remote-controlled object, independent of how the
/// application represents that object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetIdentity {
    pub net_id: NetId,
    /// The peer allowed to drive this object.
    pub owner: PeerId,
}

impl NetIdentity {
    pub fn new(net_id: NetId, owner: PeerId) -> Self {
        Self { net_id, owner }
    }

    /// `true` if a call delivered as `delivery` comes from the owner, or
    /// from the Host's server persona, which may drive anything.
    pub fn accepts(&self, delivery: &Delivery) -> bool {
        delivery.from == self.owner || delivery.from == PeerId::SERVER
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaynet_protocol::Side;

    #[test]
    fn test_closure_is_an_rpc_target() {
        let target = |net_id: NetId, method: &str, _: &[RpcArg], _: &Delivery| {
            net_id == NetId(7) && method == "Fire"
        };
        let delivery = Delivery::new(PeerId(100), Side::Server);
        assert!(target.invoke(NetId(7), "Fire", &[], &delivery));
        assert!(!target.invoke(NetId(8), "Fire", &[], &delivery));
    }

    #[test]
    fn test_net_identity_accepts_owner_and_server() {
        let identity = NetIdentity::new(NetId(7), PeerId(100));
        assert!(identity.accepts(&Delivery::new(PeerId(100), Side::Server)));
        assert!(identity.accepts(&Delivery::new(PeerId::SERVER, Side::Client)));
        assert!(!identity.accepts(&Delivery::new(PeerId(101), Side::Server)));
    }
}
