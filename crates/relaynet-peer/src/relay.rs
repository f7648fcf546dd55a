//! Host-side handling of [`RelayMessage`] envelopes.
//!
//! A client cannot address another client directly; it wraps the message
//! in a relay envelope addressed to the server. The Host unwraps it,
//! re-stamps the inner sender from the envelope (whose sender the
//! server-side connection already overwrote), and routes it onwards.

use relaynet_protocol::{PeerId, RelayMessage};

use crate::host::HostShared;

impl HostShared {
    pub(crate) fn route_relay(&self, relay: &RelayMessage) {
        let sender = relay.header.sender;
        if relay.header.target != PeerId::SERVER {
            tracing::debug!(from = %sender, target_id = %relay.header.target, "relay not addressed to the server, dropping");
            return;
        }

        let mut inner = match relay.unwrap_inner(self.registry()) {
            Ok(inner) => inner,
            Err(e) => {
                tracing::warn!(from = %sender, error = %e, "malformed relay payload, dropping");
                return;
            }
        };
        if inner.is::<RelayMessage>() {
            tracing::warn!(from = %sender, "nested relay envelope, dropping");
            return;
        }

        let message_type = inner.message_type();
        let Some(header) = inner.header_mut() else {
            tracing::warn!(from = %sender, %message_type, "relayed message has no header, dropping");
            return;
        };
        // The inner sender is whatever the client claimed; replace it.
        header.sender = sender;
        header.target = relay.target;

        tracing::trace!(from = %sender, target_id = %relay.target, %message_type, "relaying");
        if let Err(e) = self.route(inner, &relay.exclude) {
            tracing::warn!(from = %sender, error = %e, "relay routing failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use relaynet_protocol::{Header, Message, NetId, RpcMessage};

    use super::*;

    #[test]
    fn test_wrap_carries_target_and_exclusions() {
        let mut inner = RpcMessage::new(NetId(3), "Wave", vec![]).unwrap();
        inner.header = Header::new(PeerId(100), PeerId(101));
        let relay = RelayMessage::wrap(&inner, PeerId::BROADCAST, vec![PeerId(100)]);

        assert_eq!(relay.header, Header::new(PeerId(100), PeerId::SERVER));
        assert_eq!(relay.target, PeerId::BROADCAST);
        assert_eq!(relay.exclude, vec![PeerId(100)]);
        assert!(!relay.inner_body().is_empty());
        assert_eq!(relay.message_type(), RelayMessage::default().message_type());
    }
}
