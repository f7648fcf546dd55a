//! Network configuration.

use std::time::Duration;

use relaynet_peer::PeerOptions;
use relaynet_protocol::{
    DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_FRAME_BODY, DEFAULT_PARSER_CAPACITY, Header, TYPE_ID_LEN,
};
use relaynet_transport::{DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_READ_CHUNK, DEFAULT_SEND_QUEUE};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Everything a [`NetworkContext`](crate::NetworkContext) can be tuned with.
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// let config = relaynet::NetConfig::from_json_str(r#"{ "max_connections": 4 }"#).unwrap();
/// assert_eq!(config.max_connections, 4);
/// assert_eq!(config.update_rate_hz, 30);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Remote clients a Host accepts at once.
    pub max_connections: usize,
    /// Largest frame body (TypeID included) sent or accepted.
    pub max_frame_body: usize,
    /// Starting size of each connection's parser buffer.
    pub parser_initial_capacity: usize,
    /// Size of a single socket read.
    pub read_chunk_size: usize,
    /// Frames queued per connection. A peer that lets its queue fill up
    /// is disconnected.
    pub send_queue_capacity: usize,
    /// Time an accepted WebSocket client has to finish its upgrade.
    pub handshake_timeout_ms: u64,
    /// How often the update loop drains the inbound queue. 0 = the
    /// application calls `poll` itself.
    pub update_rate_hz: u32,
    /// Random delay (0 to this many µs) added to the first update.
    pub update_jitter_us: u64,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_frame_body: DEFAULT_MAX_FRAME_BODY,
            parser_initial_capacity: DEFAULT_PARSER_CAPACITY,
            read_chunk_size: DEFAULT_READ_CHUNK,
            send_queue_capacity: DEFAULT_SEND_QUEUE,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT.as_millis() as u64,
            update_rate_hz: 30,
            update_jitter_us: 2_000,
        }
    }
}

impl NetConfig {
    pub const MAX_UPDATE_RATE_HZ: u32 = 128;
    /// Smallest usable frame body: a TypeID and a routing header.
    pub const MIN_FRAME_BODY: usize = TYPE_ID_LEN + Header::ENCODED_LEN;
    /// Frames are length-prefixed with an `i32`; keep well below that.
    pub const MAX_FRAME_BODY: usize = 16 * 1024 * 1024;
    pub const MIN_BUFFER: usize = 64;
    pub const MIN_HANDSHAKE_TIMEOUT_MS: u64 = 100;

    /// Parses a JSON document. Missing fields take their defaults; the
    /// result is [`validated`](Self::validated).
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config.validated())
    }

    /// Clamps out-of-range values so the config is safe to use.
    pub fn validated(mut self) -> Self {
        if self.max_connections == 0 {
            warn!("max_connections is 0, clamping to 1");
            self.max_connections = 1;
        }
        let frame = self
            .max_frame_body
            .clamp(Self::MIN_FRAME_BODY, Self::MAX_FRAME_BODY);
        if frame != self.max_frame_body {
            warn!(
                requested = self.max_frame_body,
                clamped = frame,
                "max_frame_body out of range, clamping"
            );
            self.max_frame_body = frame;
        }
        if self.parser_initial_capacity < Self::MIN_BUFFER {
            warn!(
                requested = self.parser_initial_capacity,
                "parser_initial_capacity too small, clamping"
            );
            self.parser_initial_capacity = Self::MIN_BUFFER;
        }
        if self.read_chunk_size < Self::MIN_BUFFER {
            warn!(
                requested = self.read_chunk_size,
                "read_chunk_size too small, clamping"
            );
            self.read_chunk_size = Self::MIN_BUFFER;
        }
        if self.send_queue_capacity == 0 {
            warn!("send_queue_capacity is 0, clamping to 1");
            self.send_queue_capacity = 1;
        }
        if self.handshake_timeout_ms < Self::MIN_HANDSHAKE_TIMEOUT_MS {
            warn!(
                requested = self.handshake_timeout_ms,
                min = Self::MIN_HANDSHAKE_TIMEOUT_MS,
                "handshake_timeout_ms too small, clamping"
            );
            self.handshake_timeout_ms = Self::MIN_HANDSHAKE_TIMEOUT_MS;
        }
        if self.update_rate_hz > Self::MAX_UPDATE_RATE_HZ {
            warn!(
                rate = self.update_rate_hz,
                max = Self::MAX_UPDATE_RATE_HZ,
                "update_rate_hz exceeds maximum, clamping"
            );
            self.update_rate_hz = Self::MAX_UPDATE_RATE_HZ;
        }
        self
    }

    /// Interval between updates, or `None` for manual polling.
    pub fn update_interval(&self) -> Option<Duration> {
        if self.update_rate_hz == 0 {
            None
        } else {
            Some(Duration::from_secs_f64(1.0 / self.update_rate_hz as f64))
        }
    }

    pub fn peer_options(&self) -> PeerOptions {
        PeerOptions {
            max_connections: self.max_connections,
            max_frame_body: self.max_frame_body,
            parser_initial_capacity: self.parser_initial_capacity,
            read_chunk_size: self.read_chunk_size,
            send_queue_capacity: self.send_queue_capacity,
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_layer_defaults() {
        let config = NetConfig::default();
        assert_eq!(config.max_connections, 16);
        assert_eq!(config.max_frame_body, 64 * 1024);
        assert_eq!(config.update_interval(), Some(Duration::from_secs_f64(1.0 / 30.0)));
    }

    #[test]
    fn test_from_json_str_fills_missing_fields() {
        let config = NetConfig::from_json_str(r#"{"update_rate_hz": 0}"#).unwrap();
        assert_eq!(config.update_rate_hz, 0);
        assert_eq!(config.update_interval(), None);
        assert_eq!(config.read_chunk_size, DEFAULT_READ_CHUNK);
    }

    #[test]
    fn test_from_json_str_rejects_wrong_types() {
        assert!(NetConfig::from_json_str(r#"{"max_connections": "many"}"#).is_err());
    }

    #[test]
    fn test_validated_clamps_out_of_range_values() {
        let config = NetConfig {
            max_connections: 0,
            max_frame_body: 1,
            parser_initial_capacity: 0,
            read_chunk_size: 3,
            send_queue_capacity: 0,
            handshake_timeout_ms: 0,
            update_rate_hz: 1_000,
            update_jitter_us: 0,
        }
        .validated();

        assert_eq!(config.max_connections, 1);
        assert_eq!(config.max_frame_body, NetConfig::MIN_FRAME_BODY);
        assert_eq!(config.parser_initial_capacity, NetConfig::MIN_BUFFER);
        assert_eq!(config.read_chunk_size, NetConfig::MIN_BUFFER);
        assert_eq!(config.send_queue_capacity, 1);
        assert_eq!(config.handshake_timeout_ms, NetConfig::MIN_HANDSHAKE_TIMEOUT_MS);
        assert_eq!(config.update_rate_hz, NetConfig::MAX_UPDATE_RATE_HZ);
    }

    #[test]
    fn test_validated_caps_huge_frames() {
        let config = NetConfig {
            max_frame_body: usize::MAX,
            ..NetConfig::default()
        }
        .validated();
        assert_eq!(config.max_frame_body, NetConfig::MAX_FRAME_BODY);
    }

    #[test]
    fn test_peer_options_carry_limits() {
        let options = NetConfig {
            max_connections: 3,
            send_queue_capacity: 8,
            handshake_timeout_ms: 250,
            ..NetConfig::default()
        }
        .peer_options();
        assert_eq!(options.max_connections, 3);
        assert_eq!(options.max_frame_body, DEFAULT_MAX_FRAME_BODY);
        assert_eq!(options.send_queue_capacity, 8);
        assert_eq!(options.handshake_timeout, Duration::from_millis(250));
        assert_eq!(options.transport_options().send_queue_capacity, 8);
    }
}
