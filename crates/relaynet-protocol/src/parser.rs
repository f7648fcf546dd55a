//! Stream reassembly: raw chunks in, whole messages out.

use std::sync::Arc;

use crate::message::decode_body;
use crate::{
    DEFAULT_MAX_FRAME_BODY, LENGTH_PREFIX_LEN, Message, MessageRegistry, TYPE_ID_LEN,
};

/// Default starting size of the parser's buffer.
pub const DEFAULT_PARSER_CAPACITY: usize = 4096;

/// Reassembles length-prefixed frames from an ordered byte stream.
///
/// One parser per connection; it is single-writer and needs no locking.
/// Chunk boundaries are arbitrary: a frame may arrive split across many
/// calls to [`input_raw`](Self::input_raw), or many frames in one call.
///
/// The buffer is a flat `Vec<u8>` with a read and a write cursor. Consumed
/// bytes are compacted away once they take up more than half the buffer;
/// the buffer only grows (doubling) when compaction cannot make room.
pub struct PacketParser {
    registry: Arc<MessageRegistry>,
    buf: Vec<u8>,
    read: usize,
    write: usize,
    max_body: usize,
}

impl PacketParser {
    pub fn new(registry: Arc<MessageRegistry>) -> Self {
        Self::with_limits(registry, DEFAULT_MAX_FRAME_BODY, DEFAULT_PARSER_CAPACITY)
    }

    /// `max_body` bounds a frame's declared body length (TypeID included).
    pub fn with_limits(
        registry: Arc<MessageRegistry>,
        max_body: usize,
        initial_capacity: usize,
    ) -> Self {
        Self {
            registry,
            buf: vec![0; initial_capacity.max(LENGTH_PREFIX_LEN)],
            read: 0,
            write: 0,
            max_body,
        }
    }

    /// Bytes received but not yet consumed as frames.
    pub fn buffered(&self) -> usize {
        self.write - self.read
    }

    /// Current buffer size.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Appends `data` and emits every complete frame now available, in
    /// arrival order. Returns how many messages were emitted.
    ///
    /// Frames of an unknown type, or that fail to decode, are logged and
    /// skipped individually. A declared length outside `TYPE_ID_LEN..=max_body`
    /// poisons the stream: everything buffered is dropped.
    pub fn input_raw<F>(&mut self, data: &[u8], mut on_message: F) -> usize
    where
        F: FnMut(Box<dyn Message>),
    {
        self.reserve(data.len());
        self.buf[self.write..self.write + data.len()].copy_from_slice(data);
        self.write += data.len();

        let mut emitted = 0;
        while self.buffered() >= LENGTH_PREFIX_LEN {
            let mut prefix = [0u8; LENGTH_PREFIX_LEN];
            prefix.copy_from_slice(&self.buf[self.read..self.read + LENGTH_PREFIX_LEN]);
            let declared = i32::from_le_bytes(prefix);

            let body_len = match usize::try_from(declared) {
                Ok(len) if (TYPE_ID_LEN..=self.max_body).contains(&len) => len,
                _ => {
                    tracing::warn!(
                        declared,
                        max = self.max_body,
                        dropped = self.buffered(),
                        "invalid frame length, discarding receive buffer"
                    );
                    self.read = self.write;
                    break;
                }
            };

            if self.buffered() - LENGTH_PREFIX_LEN < body_len {
                break;
            }

            let start = self.read + LENGTH_PREFIX_LEN;
            let end = start + body_len;
            let decoded = decode_body(&self.registry, &self.buf[start..end]);
            self.read = end;

            match decoded {
                Ok(msg) => {
                    tracing::trace!(
                        message_type = %msg.message_type(),
                        len = body_len,
                        "frame decoded"
                    );
                    emitted += 1;
                    on_message(msg);
                }
                Err(e) => {
                    tracing::warn!(error = %e, len = body_len, "skipping undecodable frame");
                }
            }
        }

        if self.read == self.write {
            self.read = 0;
            self.write = 0;
        } else if self.read > self.buf.len() / 2 {
            self.compact();
        }

        emitted
    }

    /// Drops all buffered bytes.
    pub fn reset(&mut self) {
        self.read = 0;
        self.write = 0;
    }

    fn compact(&mut self) {
        self.buf.copy_within(self.read..self.write, 0);
        self.write -= self.read;
        self.read = 0;
    }

    /// Makes room for `additional` bytes after the write cursor.
    fn reserve(&mut self, additional: usize) {
        if self.write + additional <= self.buf.len() {
            return;
        }
        if self.read > 0 {
            self.compact();
            if self.write + additional <= self.buf.len() {
                return;
            }
        }
        let needed = self.write + additional;
        let mut capacity = self.buf.len().max(1);
        while capacity < needed {
            capacity *= 2;
        }
        tracing::trace!(from = self.buf.len(), to = capacity, "parser buffer grown");
        self.buf.resize(capacity, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::WireWriter;
    use crate::message::tests::{Chat, chat, chat_registry};
    use crate::{AssignId, PeerId, encode_frame};

    fn parser() -> PacketParser {
        PacketParser::new(Arc::new(chat_registry()))
    }

    fn collect(parser: &mut PacketParser, data: &[u8]) -> Vec<Box<dyn Message>> {
        let mut out = Vec::new();
        parser.input_raw(data, |m| out.push(m));
        out
    }

    fn texts(messages: &[Box<dyn Message>]) -> Vec<String> {
        messages
            .iter()
            .map(|m| m.downcast_ref::<Chat>().expect("chat").text.clone())
            .collect()
    }

    #[test]
    fn test_input_raw_whole_frame_emits_one_message() {
        let mut p = parser();
        let frame = encode_frame(&chat(100, 0, "hello"));
        let out = collect(&mut p, &frame);
        assert_eq!(texts(&out), vec!["hello"]);
        assert_eq!(p.buffered(), 0);
    }

    #[test]
    fn test_input_raw_byte_at_a_time_matches_whole() {
        let original = chat(100, 0, "split into single bytes");
        let frame = encode_frame(&original);

        let mut p = parser();
        let mut out = Vec::new();
        for (i, byte) in frame.iter().enumerate() {
            let n = p.input_raw(std::slice::from_ref(byte), |m| out.push(m));
            if i + 1 < frame.len() {
                assert_eq!(n, 0, "emitted early at byte {i}");
            }
        }
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].downcast_ref::<Chat>(), Some(&original));
    }

    #[test]
    fn test_input_raw_many_frames_in_one_chunk_keep_order() {
        let mut stream = Vec::new();
        for text in ["a", "bb", "ccc"] {
            stream.extend_from_slice(&encode_frame(&chat(100, 0, text)));
        }
        let mut p = parser();
        assert_eq!(texts(&collect(&mut p, &stream)), vec!["a", "bb", "ccc"]);
    }

    #[test]
    fn test_input_raw_frame_split_across_chunks() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&encode_frame(&chat(100, 0, "first")));
        stream.extend_from_slice(&encode_frame(&chat(100, 0, "second")));
        let (a, b) = stream.split_at(stream.len() / 2 + 3);

        let mut p = parser();
        let mut out = collect(&mut p, a);
        assert_eq!(out.len(), 1);
        assert!(p.buffered() > 0);
        out.extend(collect(&mut p, b));
        assert_eq!(texts(&out), vec!["first", "second"]);
    }

    #[test]
    fn test_input_raw_oversized_length_discards_buffer() {
        let mut p = PacketParser::with_limits(Arc::new(chat_registry()), 64, 128);
        let mut w = WireWriter::new();
        w.put_i32(1_000_000);
        w.put_slice(&[0xAB; 40]);
        let bytes = w.freeze();

        let out = collect(&mut p, &bytes);
        assert!(out.is_empty());
        assert_eq!(p.buffered(), 0);
        assert_eq!(p.capacity(), 128, "buffer must not grow toward the bogus length");

        // The parser keeps working on later input.
        let out = collect(&mut p, &encode_frame(&chat(100, 0, "after")));
        assert_eq!(texts(&out), vec!["after"]);
    }

    #[test]
    fn test_input_raw_length_too_small_for_type_id_discards() {
        let mut p = parser();
        let mut w = WireWriter::new();
        w.put_i32(2);
        w.put_slice(&[1, 2]);
        assert!(collect(&mut p, &w.freeze()).is_empty());
        assert_eq!(p.buffered(), 0);
    }

    #[test]
    fn test_input_raw_negative_length_discards() {
        let mut p = parser();
        assert!(collect(&mut p, &(-8i32).to_le_bytes()).is_empty());
        assert_eq!(p.buffered(), 0);
    }

    #[test]
    fn test_input_raw_unknown_type_skips_only_that_frame() {
        let mut w = WireWriter::new();
        w.put_i32(8);
        w.put_i32(4242);
        w.put_i32(0);
        let unknown = w.freeze();

        let mut stream = Vec::new();
        stream.extend_from_slice(&encode_frame(&chat(100, 0, "before")));
        stream.extend_from_slice(&unknown);
        stream.extend_from_slice(&encode_frame(&chat(100, 0, "after")));

        let mut p = parser();
        assert_eq!(texts(&collect(&mut p, &stream)), vec!["before", "after"]);
    }

    #[test]
    fn test_input_raw_malformed_body_skips_only_that_frame() {
        // An AssignId frame whose body is one byte short.
        let mut w = WireWriter::new();
        w.put_i32(7);
        w.put_i32(1);
        w.put_slice(&[0, 0, 0]);
        let broken = w.freeze();

        let mut stream = broken.to_vec();
        stream.extend_from_slice(&encode_frame(&AssignId {
            player_id: PeerId(100),
        }));

        let mut p = parser();
        let out = collect(&mut p, &stream);
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].downcast_ref::<AssignId>().map(|a| a.player_id),
            Some(PeerId(100))
        );
    }

    #[test]
    fn test_input_raw_compaction_bounds_buffer_growth() {
        let mut p = PacketParser::with_limits(Arc::new(chat_registry()), 1024, 64);
        let frame = encode_frame(&chat(100, 0, "steady traffic"));
        let mut stream = Vec::new();
        for _ in 0..500 {
            stream.extend_from_slice(&frame);
        }

        let mut count = 0;
        for chunk in stream.chunks(frame.len() - 3) {
            count += p.input_raw(chunk, |_| {});
        }
        assert_eq!(count, 500);
        assert!(p.capacity() <= 64, "capacity grew to {}", p.capacity());
    }

    #[test]
    fn test_input_raw_grows_for_large_frame() {
        let mut p = PacketParser::with_limits(Arc::new(chat_registry()), 8192, 16);
        let big = "x".repeat(3000);
        let out = collect(&mut p, &encode_frame(&chat(100, 0, &big)));
        assert_eq!(texts(&out), vec![big]);
        assert!(p.capacity() >= 3000);
    }
}
