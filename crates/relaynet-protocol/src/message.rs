//! The message model and frame encoding.
//!
//! A message is a typed value that knows how to write its own payload and
//! how long that payload is. Framing (`BodyLength | TypeID | Payload`) is
//! applied here, once, for every kind.

use std::any::Any;
use std::fmt;

use bytes::Bytes;

use crate::codec::{WireReader, WireWriter};
use crate::{
    Header, LENGTH_PREFIX_LEN, MessageRegistry, MessageType, ProtocolError,
    TYPE_ID_LEN,
};

/// A message that can travel on the wire.
///
/// This trait is object safe: the layers above move messages around as
/// `Box<dyn Message>` and call `downcast_ref` on them to get the concrete
/// type back.
///
/// `encoded_len` must equal the number of bytes `encode` writes. The
/// payload written by `encode` excludes the TypeID; when the kind carries
/// a [`Header`], the header is the first thing in the payload.
///
/// The explicit `'static` bound makes `&dyn Message` mean
/// `&(dyn Message + 'static)`, which downcasting requires.
pub trait Message: Any + Send + Sync + fmt::Debug + 'static {
    fn message_type(&self) -> MessageType;

    /// Routing header, for kinds that carry one.
    fn header(&self) -> Option<&Header> {
        None
    }

    fn header_mut(&mut self) -> Option<&mut Header> {
        None
    }

    /// Payload size in bytes.
    fn encoded_len(&self) -> usize;

    fn encode(&self, w: &mut WireWriter);

    /// Overwrites `self` with the payload read from `r`.
    fn decode(&mut self, r: &mut WireReader<'_>) -> Result<(), ProtocolError>;
}

impl dyn Message {
    /// Returns the concrete message if it is a `T`.
    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        let any: &dyn Any = self;
        any.downcast_ref::<T>()
    }

    pub fn is<T: Message>(&self) -> bool {
        self.downcast_ref::<T>().is_some()
    }
}

/// A concrete message kind with a statically known type id.
///
/// `Default` builds the empty instance the registry decodes into.
pub trait MessageKind: Message + Default {
    const TYPE: MessageType;
}

/// Total frame size for a message: prefix, TypeID and payload.
pub fn frame_len(msg: &dyn Message) -> usize {
    LENGTH_PREFIX_LEN + TYPE_ID_LEN + msg.encoded_len()
}

/// Serializes a complete frame into a single buffer.
pub fn encode_frame(msg: &dyn Message) -> Bytes {
    let body_len = TYPE_ID_LEN + msg.encoded_len();
    let mut w = WireWriter::with_capacity(LENGTH_PREFIX_LEN + body_len);
    w.put_i32(body_len as i32);
    w.put_i32(msg.message_type().0);
    msg.encode(&mut w);
    debug_assert_eq!(
        w.len(),
        LENGTH_PREFIX_LEN + body_len,
        "{:?}: encoded_len disagrees with encode",
        msg.message_type()
    );
    w.freeze()
}

/// Serializes a frame body (`TypeID | Payload`) without the length prefix.
pub fn encode_body(msg: &dyn Message) -> Bytes {
    let mut w = WireWriter::with_capacity(TYPE_ID_LEN + msg.encoded_len());
    w.put_i32(msg.message_type().0);
    msg.encode(&mut w);
    w.freeze()
}

/// Rebuilds a message from a frame body (`TypeID | Payload`).
///
/// # Errors
/// Fails on unknown type ids, malformed payloads, and payloads with
/// unread trailing bytes.
pub fn decode_body(
    registry: &MessageRegistry,
    body: &[u8],
) -> Result<Box<dyn Message>, ProtocolError> {
    let mut r = WireReader::new(body);
    let message_type = MessageType(r.get_i32()?);
    let mut msg = registry
        .create(message_type)
        .ok_or(ProtocolError::UnknownType(message_type))?;
    msg.decode(&mut r)?;
    if r.remaining() > 0 {
        return Err(ProtocolError::TrailingBytes(r.remaining()));
    }
    Ok(msg)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::codec::str_len;
    use crate::PeerId;

    /// A small application message used across the crate's tests.
    #[derive(Debug, Clone, Default, PartialEq)]
    pub(crate) struct Chat {
        pub header: Header,
        pub text: String,
    }

    impl Message for Chat {
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

    impl MessageKind for Chat {
        const TYPE: MessageType = MessageType(100);
    }

    pub(crate) fn chat(sender: i32, target: i32, text: &str) -> Chat {
        Chat {
            header: Header::new(PeerId(sender), PeerId(target)),
            text: text.to_owned(),
        }
    }

    pub(crate) fn chat_registry() -> MessageRegistry {
        let mut registry = MessageRegistry::with_builtins();
        registry.register::<Chat>().unwrap();
        registry
    }

    #[test]
    fn test_encode_frame_layout() {
        let frame = encode_frame(&chat(100, 0, "hi"));
        let mut r = WireReader::new(&frame);
        // BodyLength counts the TypeID and the payload.
        assert_eq!(r.get_i32().unwrap(), 4 + 8 + 4 + 2);
        assert_eq!(r.get_i32().unwrap(), 100);
        assert_eq!(r.get_header().unwrap(), Header::new(PeerId(100), PeerId(0)));
        assert_eq!(r.get_str().unwrap(), "hi");
        assert_eq!(r.remaining(), 0);
        assert_eq!(frame.len(), frame_len(&chat(100, 0, "hi")));
    }

    #[test]
    fn test_decode_body_rebuilds_message() {
        let registry = chat_registry();
        let original = chat(3, 4, "hello");
        let body = encode_body(&original);

        let decoded = decode_body(&registry, &body).unwrap();
        assert!(decoded.is::<Chat>());
        assert_eq!(decoded.downcast_ref::<Chat>(), Some(&original));
    }

    #[test]
    fn test_decode_body_unknown_type() {
        let registry = MessageRegistry::with_builtins();
        let body = encode_body(&chat(3, 4, "hello"));
        assert!(matches!(
            decode_body(&registry, &body),
            Err(ProtocolError::UnknownType(MessageType(100)))
        ));
    }

    #[test]
    fn test_decode_body_trailing_bytes_rejected() {
        let registry = chat_registry();
        let mut body = encode_body(&chat(3, 4, "hello")).to_vec();
        body.extend_from_slice(&[0, 0]);
        assert!(matches!(
            decode_body(&registry, &body),
            Err(ProtocolError::TrailingBytes(2))
        ));
    }

    #[test]
    fn test_downcast_ref_wrong_type_is_none() {
        let boxed: Box<dyn Message> = Box::new(chat(1, 0, "x"));
        assert!(boxed.downcast_ref::<crate::AssignId>().is_none());
    }
}
