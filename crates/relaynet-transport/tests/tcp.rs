//! Integration tests for the socket transports.
//!
//! A real listener is bound on 127.0.0.1:0 and a real client connects to
//! it, so these exercise the spawned read and write loops end to end.

use std::time::Duration;

use relaynet_transport::{
    Acceptor, Bytes, PendingTransport, TcpAcceptor, TcpTransport, Transport,
    TransportError, TransportHandler, TransportOptions,
};
use tokio::sync::mpsc;

#[derive(Debug)]
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
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("handler dropped")
}

/// Collects `len` bytes, however the OS chooses to chunk them.
async fn read_exact(rx: &mut mpsc::UnboundedReceiver<Event>, len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    while out.len() < len {
        match next(rx).await {
            Event::Data(d) => out.extend_from_slice(&d),
            Event::Disconnected => panic!("disconnected after {} bytes", out.len()),
        }
    }
    out
}

async fn tcp_pair() -> (
    std::sync::Arc<dyn Transport>,
    mpsc::UnboundedReceiver<Event>,
    std::sync::Arc<TcpTransport>,
    mpsc::UnboundedReceiver<Event>,
) {
    let mut acceptor = TcpAcceptor::bind("127.0.0.1:0", TransportOptions::default())
        .await
        .expect("should bind");
    let addr = acceptor.local_addr().expect("bound address").to_string();

    let accept = tokio::spawn(async move { acceptor.accept().await.expect("should accept") });

    let (client_handler, client_rx) = forwarding();
    let client = TcpTransport::connect(&addr, client_handler, &TransportOptions::default())
        .await
        .expect("should connect");

    let pending = accept.await.expect("accept task");
    assert!(pending.peer_addr().is_some());
    let (server_handler, server_rx) = forwarding();
    let server = pending.start(server_handler);

    (server, server_rx, client, client_rx)
}

#[tokio::test]
async fn test_tcp_bytes_flow_both_ways() {
    let (server, mut server_rx, client, mut client_rx) = tcp_pair().await;

    client.send(Bytes::from_static(b"hello from client")).unwrap();
    assert_eq!(read_exact(&mut server_rx, 17).await, b"hello from client");

    server.send(Bytes::from_static(b"hello from server")).unwrap();
    assert_eq!(read_exact(&mut client_rx, 17).await, b"hello from server");
}

#[tokio::test]
async fn test_tcp_write_order_is_preserved() {
    let (_server, mut server_rx, client, _client_rx) = tcp_pair().await;

    let mut expected = Vec::new();
    for i in 0u8..200 {
        let chunk = vec![i; 37];
        expected.extend_from_slice(&chunk);
        client.send(Bytes::from(chunk)).unwrap();
    }

    assert_eq!(read_exact(&mut server_rx, expected.len()).await, expected);
}

#[tokio::test]
async fn test_tcp_remote_close_notifies_once() {
    let (server, mut server_rx, client, mut client_rx) = tcp_pair().await;

    client.close();
    client.close();
    assert!(!client.is_connected());

    assert!(matches!(next(&mut client_rx).await, Event::Disconnected));
    assert!(matches!(next(&mut server_rx).await, Event::Disconnected));
    assert!(!server.is_connected());

    // Handlers are dropped after their single notification.
    assert!(client_rx.recv().await.is_none());
    assert!(server_rx.recv().await.is_none());
}

#[tokio::test]
async fn test_tcp_queued_bytes_flush_before_close() {
    let (_server, mut server_rx, client, _client_rx) = tcp_pair().await;

    client.send(Bytes::from_static(b"goodbye")).unwrap();
    client.close();

    assert_eq!(read_exact(&mut server_rx, 7).await, b"goodbye");
    assert!(matches!(next(&mut server_rx).await, Event::Disconnected));
}

#[tokio::test]
async fn test_tcp_send_after_close_is_rejected() {
    let (_server, _server_rx, client, _client_rx) = tcp_pair().await;
    client.close();
    assert!(client.send(Bytes::from_static(b"x")).is_err());
}

#[tokio::test]
async fn test_tcp_connect_to_closed_port_fails() {
    let acceptor = TcpAcceptor::bind("127.0.0.1:0", TransportOptions::default())
        .await
        .unwrap();
    let addr = acceptor.local_addr().unwrap().to_string();
    drop(acceptor);

    let (handler, _rx) = forwarding();
    let result = TcpTransport::connect(&addr, handler, &TransportOptions::default()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_tcp_peer_that_stops_reading_is_disconnected() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    // Accepted and held open, but never read from.
    let stalled = tokio::spawn(async move { listener.accept().await.expect("should accept") });

    let options = TransportOptions {
        send_queue_capacity: 4,
        ..TransportOptions::default()
    };
    let (handler, mut rx) = forwarding();
    let client = TcpTransport::connect(&addr, handler, &options)
        .await
        .expect("should connect");
    let _stalled = stalled.await.unwrap();

    // Nothing yields between sends, so the write task cannot drain.
    let chunk = Bytes::from(vec![0u8; 1024 * 1024]);
    let mut accepted = 0;
    let err = loop {
        match client.send(chunk.clone()) {
            Ok(()) => accepted += 1,
            Err(e) => break e,
        }
        assert!(accepted <= 4, "queue grew past its capacity");
    };

    assert_eq!(accepted, 4);
    assert!(matches!(err, TransportError::QueueFull { capacity: 4 }));
    assert!(!client.is_connected());
    assert!(matches!(next(&mut rx).await, Event::Disconnected));
    assert!(matches!(
        client.send(Bytes::from_static(b"x")),
        Err(TransportError::Closed)
    ));
}

#[cfg(feature = "websocket")]
mod websocket {
    use super::*;
    use relaynet_transport::{WebSocketAcceptor, WebSocketTransport};

    #[tokio::test]
    async fn test_websocket_bytes_flow_and_close() {
        let mut acceptor = WebSocketAcceptor::bind("127.0.0.1:0", TransportOptions::default())
            .await
            .expect("should bind");
        let addr = acceptor.local_addr().unwrap();

        let accept = tokio::spawn(async move { acceptor.accept().await.expect("should accept") });

        let (client_handler, mut client_rx) = forwarding();
        let client = WebSocketTransport::connect(
            &format!("ws://{addr}"),
            client_handler,
            &TransportOptions::default(),
        )
        .await
            .expect("should connect");

        let (server_handler, mut server_rx) = forwarding();
        let server = accept.await.unwrap().start(server_handler);

        client.send(Bytes::from_static(b"over ws")).unwrap();
        assert_eq!(read_exact(&mut server_rx, 7).await, b"over ws");

        server.send(Bytes::from_static(b"and back")).unwrap();
        assert_eq!(read_exact(&mut client_rx, 8).await, b"and back");

        server.close();
        assert!(matches!(next(&mut server_rx).await, Event::Disconnected));
        assert!(matches!(next(&mut client_rx).await, Event::Disconnected));
    }

    #[tokio::test]
    async fn test_websocket_idle_peer_does_not_block_later_clients() {
        let options = TransportOptions {
            handshake_timeout: Duration::from_millis(300),
            ..TransportOptions::default()
        };
        let mut acceptor = WebSocketAcceptor::bind("127.0.0.1:0", options.clone())
            .await
            .expect("should bind");
        let addr = acceptor.local_addr().unwrap();

        // Opens TCP and never sends the HTTP upgrade.
        let _idle_socket = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (idle_handler, mut idle_rx) = forwarding();
        let idle = acceptor
            .accept()
            .await
            .expect("should accept idle peer")
            .start(idle_handler);

        let (server_handler, mut server_rx) = forwarding();
        let accept = tokio::spawn(async move {
            acceptor
                .accept()
                .await
                .expect("should accept")
                .start(server_handler)
        });

        let (client_handler, _client_rx) = forwarding();
        let client = tokio::time::timeout(
            Duration::from_secs(3),
            WebSocketTransport::connect(&format!("ws://{addr}"), client_handler, &options),
        )
        .await
        .expect("client stalled behind an idle peer")
        .expect("should connect");
        let _server = accept.await.unwrap();

        client.send(Bytes::from_static(b"made it")).unwrap();
        assert_eq!(read_exact(&mut server_rx, 7).await, b"made it");

        // The idle peer is dropped once its handshake times out.
        assert!(matches!(next(&mut idle_rx).await, Event::Disconnected));
        assert!(!idle.is_connected());
    }

    #[tokio::test]
    async fn test_websocket_sends_before_upgrade_are_delivered() {
        let mut acceptor = WebSocketAcceptor::bind("127.0.0.1:0", TransportOptions::default())
            .await
            .expect("should bind");
        let addr = acceptor.local_addr().unwrap();

        let accept = tokio::spawn(async move {
            let (handler, _rx) = forwarding();
            let server = acceptor.accept().await.expect("should accept").start(handler);
            // Queued while the upgrade is still in flight.
            server.send(Bytes::from_static(b"welcome")).unwrap();
            server
        });

        let (client_handler, mut client_rx) = forwarding();
        let _client = WebSocketTransport::connect(
            &format!("ws://{addr}"),
            client_handler,
            &TransportOptions::default(),
        )
        .await
        .expect("should connect");
        let _server = accept.await.unwrap();

        assert_eq!(read_exact(&mut client_rx, 7).await, b"welcome");
    }
}
