use std::time::Duration;

use relaynet_protocol::{DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_FRAME_BODY, DEFAULT_PARSER_CAPACITY};
use relaynet_transport::{
    DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_READ_CHUNK, DEFAULT_SEND_QUEUE, TransportOptions,
};

/// Limits and buffer sizes shared by every connection a peer opens.
#[derive(Debug, Clone)]
pub struct PeerOptions {
    /// Remote clients a Host accepts at once. The Host's own loopback
    /// persona does not count.
    pub max_connections: usize,
    /// Largest frame body (TypeID included) sent or accepted.
    pub max_frame_body: usize,
    /// Starting size of each connection's parser buffer.
    pub parser_initial_capacity: usize,
    /// Size of a single socket read.
    pub read_chunk_size: usize,
    /// Frames queued per connection before a peer that stopped reading is
    /// disconnected.
    pub send_queue_capacity: usize,
    /// Time an accepted WebSocket client has to finish its upgrade.
    pub handshake_timeout: Duration,
}

impl Default for PeerOptions {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_frame_body: DEFAULT_MAX_FRAME_BODY,
            parser_initial_capacity: DEFAULT_PARSER_CAPACITY,
            read_chunk_size: DEFAULT_READ_CHUNK,
            send_queue_capacity: DEFAULT_SEND_QUEUE,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl PeerOptions {
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            read_chunk_size: self.read_chunk_size,
            send_queue_capacity: self.send_queue_capacity,
            handshake_timeout: self.handshake_timeout,
        }
    }
}
