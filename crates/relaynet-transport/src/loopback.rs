//! In-process transport: two endpoints wired back to back.

use std::sync::{Arc, OnceLock, Weak};

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::shared::{Outbound, TransportCore, wait_for_shutdown};
use crate::{Transport, TransportError, TransportHandler, TransportId, spawn_supervised};

/// One end of an in-process byte pipe.
///
/// Bytes sent on one endpoint arrive at the other endpoint's handler from
/// a separate task, never inline inside `send`. Closing either endpoint
/// closes both.
pub struct LoopbackTransport {
    core: TransportCore,
    peer: OnceLock<Weak<LoopbackTransport>>,
}

impl LoopbackTransport {
    /// Creates a connected pair. `handler_a` receives what `b` sends and
    /// `handler_b` receives what `a` sends.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn pair(
        handler_a: Box<dyn TransportHandler>,
        handler_b: Box<dyn TransportHandler>,
    ) -> (Arc<Self>, Arc<Self>) {
        let (a_to_b, b_inbox) = mpsc::unbounded_channel();
        let (b_to_a, a_inbox) = mpsc::unbounded_channel();

        let (core_a, shutdown_a) = TransportCore::new(Outbound::Unbounded(a_to_b));
        let (core_b, shutdown_b) = TransportCore::new(Outbound::Unbounded(b_to_a));

        let a = Arc::new(Self {
            core: core_a,
            peer: OnceLock::new(),
        });
        let b = Arc::new(Self {
            core: core_b,
            peer: OnceLock::new(),
        });
        let _ = a.peer.set(Arc::downgrade(&b));
        let _ = b.peer.set(Arc::downgrade(&a));

        tracing::debug!(a = %a.id(), b = %b.id(), "loopback pair created");

        spawn_supervised(
            "loopback-deliver",
            deliver_loop(a_inbox, handler_a, shutdown_a, Arc::clone(&a)),
        );
        spawn_supervised(
            "loopback-deliver",
            deliver_loop(b_inbox, handler_b, shutdown_b, Arc::clone(&b)),
        );

        (a, b)
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, data: Bytes) -> Result<(), TransportError> {
        self.core.send(data)
    }

    fn close(&self) {
        if !self.core.close() {
            return;
        }
        if let Some(peer) = self.peer.get().and_then(Weak::upgrade) {
            peer.close();
        }
    }

    fn is_connected(&self) -> bool {
        !self.core.is_closed()
    }

    fn id(&self) -> TransportId {
        self.core.id()
    }
}

/// Hands chunks sent by the other endpoint to this endpoint's handler.
async fn deliver_loop(
    mut inbox: mpsc::UnboundedReceiver<Bytes>,
    mut handler: Box<dyn TransportHandler>,
    mut shutdown: watch::Receiver<bool>,
    endpoint: Arc<LoopbackTransport>,
) -> Result<(), TransportError> {
    loop {
        tokio::select! {
            biased;
            chunk = inbox.recv() => match chunk {
                Some(chunk) => handler.on_receive(&chunk),
                None => break,
            },
            _ = wait_for_shutdown(&mut shutdown) => break,
        }
    }

    // Bytes sent before the close still arrive.
    while let Ok(chunk) = inbox.try_recv() {
        handler.on_receive(&chunk);
    }

    endpoint.close();
    handler.on_disconnected();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    enum Event {
        Data(Vec<u8>),
        Disconnected,
    }

    struct Forward(mpsc::UnboundedSender<Event>);

    impl TransportHandler for Forward {
        fn on_receive(&mut self, data: &[u8]) {
            let _ = self.0.send(Event::Data(data.to_vec()));
        }

        fn on_disconnected(&mut self) {
            let _ = self.0.send(Event::Disconnected);
        }
    }

    fn forwarding() -> (Box<dyn TransportHandler>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Box::new(Forward(tx)), rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_bytes_cross_to_the_other_endpoint() {
        let (ha, mut rx_a) = forwarding();
        let (hb, mut rx_b) = forwarding();
        let (a, b) = LoopbackTransport::pair(ha, hb);

        a.send(Bytes::from_static(b"ping")).unwrap();
        b.send(Bytes::from_static(b"pong")).unwrap();

        match next(&mut rx_b).await {
            Event::Data(d) => assert_eq!(d, b"ping"),
            Event::Disconnected => panic!("unexpected disconnect"),
        }
        match next(&mut rx_a).await {
            Event::Data(d) => assert_eq!(d, b"pong"),
            Event::Disconnected => panic!("unexpected disconnect"),
        }
    }

    #[tokio::test]
    async fn test_send_preserves_order() {
        let (ha, _rx_a) = forwarding();
        let (hb, mut rx_b) = forwarding();
        let (a, _b) = LoopbackTransport::pair(ha, hb);

        for i in 0u8..10 {
            a.send(Bytes::from(vec![i])).unwrap();
        }
        for i in 0u8..10 {
            match next(&mut rx_b).await {
                Event::Data(d) => assert_eq!(d, vec![i]),
                Event::Disconnected => panic!("unexpected disconnect"),
            }
        }
    }

    #[tokio::test]
    async fn test_close_closes_both_and_notifies_once() {
        let (ha, mut rx_a) = forwarding();
        let (hb, mut rx_b) = forwarding();
        let (a, b) = LoopbackTransport::pair(ha, hb);

        b.close();
        b.close();
        assert!(!a.is_connected());
        assert!(!b.is_connected());

        assert!(matches!(next(&mut rx_a).await, Event::Disconnected));
        assert!(matches!(next(&mut rx_b).await, Event::Disconnected));

        // The handlers were dropped after the single notification.
        assert!(rx_a.recv().await.is_none());
        assert!(rx_b.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (ha, _rx_a) = forwarding();
        let (hb, _rx_b) = forwarding();
        let (a, _b) = LoopbackTransport::pair(ha, hb);

        a.close();
        assert!(matches!(
            a.send(Bytes::from_static(b"late")),
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_bytes_sent_before_close_are_delivered() {
        let (ha, _rx_a) = forwarding();
        let (hb, mut rx_b) = forwarding();
        let (a, _b) = LoopbackTransport::pair(ha, hb);

        a.send(Bytes::from_static(b"last words")).unwrap();
        a.close();

        match next(&mut rx_b).await {
            Event::Data(d) => assert_eq!(d, b"last words"),
            Event::Disconnected => panic!("data was dropped"),
        }
        assert!(matches!(next(&mut rx_b).await, Event::Disconnected));
    }
}
