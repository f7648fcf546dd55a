use std::sync::Arc;

use relaynet::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct Say {
    header: Header,
    text: String,
}

impl Message for Say {
    fn message_type(&self) -> MessageType {
        Self::TYPE
    }
    fn header(&self) -> Option<&Header> {
        Some(&self.header)
    }
    fn header_mut(&mut self) -> Option<&mut Header> {
        Some(&mut self.header)
    }
    fn encoded_len(&self) -> usize {
        Header::ENCODED_LEN + str_len(&self.text)
    }
    fn encode(&self, w: &mut WireWriter) {
        w.put_header(&self.header);
        w.put_str(&self.text);
    }
    fn decode(&mut self, r: &mut WireReader<'_>) -> Result<(), ProtocolError> {
        self.header = r.get_header()?;
        self.text = r.get_str()?;
        Ok(())
    }
}

impl MessageKind for Say {
    const TYPE: MessageType = MessageType::FIRST_USER;
}

fn say(text: impl Into<String>) -> Say {
    Say {
        header: Header::default(),
        text: text.into(),
    }
}

/// The one shared object every participant can call into.
const LOBBY: NetId = NetId(1);

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

/// Prints chat lines, and on the Host answers `Ping` RPCs.
struct ChatLog {
    net: NetworkContext,
}

impl Listener for ChatLog {
    fn bindings(self: Arc<Self>, table: &mut HandlerTable) {
        table.on::<Say, _>(|msg, delivery| {
            println!("[{}] {}", delivery.from, msg.text);
            Ok(())
        });
        table.on::<RpcMessage, _>(move |rpc, delivery| {
            if delivery.side != Side::Server || rpc.net_id() != LOBBY || rpc.method() != "Ping" {
                return Ok(());
            }
            let peers = self.net.connected_peers();
            self.net
                .send_to_player(delivery.from, say(format!("pong, {} player(s) online", peers.len())))?;
            Ok(())
        });
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

const USAGE: &str = "usage: relay-chat host <port> | relay-chat join <host> <port>";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    relaynet::init_tracing("info");

    let net = NetworkContext::builder().register::<Say>()?.build();
    let log = Arc::new(ChatLog { net: net.clone() });
    net.bind(&log)?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["host", port] => net.start_host(port.parse()?).await?,
        ["join", host, port] => net.connect(host, port.parse()?).await?,
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }

    let _updates = net.spawn_update_loop(|net, events, _| {
        for event in events {
            match event {
                NetworkEvent::LocalIdAssigned(id) => println!("* you are {id}"),
                NetworkEvent::PeerConnected(id) => println!("* {id} joined"),
                NetworkEvent::PeerDisconnected(id) => println!("* {id} left"),
                NetworkEvent::DisconnectedFromHost => {
                    println!("* host went away ({} now)", net.role());
                }
            }
        }
    })?;

    eprintln!("type to chat, /w <id> <text> to whisper, /ping, /quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let sent = match line.split_once(' ') {
            _ if line == "/quit" => break,
            _ if line == "/ping" => {
                net.send_to_server(RpcMessage::new(LOBBY, "Ping", vec![])?)
            }
            Some(("/w", rest)) => match rest.split_once(' ') {
                Some((id, text)) => match id.parse() {
                    Ok(id) => net.send_to_player(PeerId(id), say(text)),
                    Err(_) => {
                        eprintln!("not a player id: {id}");
                        continue;
                    }
                },
                None => continue,
            },
            _ if line.is_empty() => continue,
            _ => net.broadcast(say(line), None),
        };
        if let Err(e) = sent {
            eprintln!("send failed: {e}");
        }
    }

    net.close();
    Ok(())
}
