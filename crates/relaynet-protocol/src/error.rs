//! Error types for the protocol layer.

use crate::{MessageType, RpcArg};

/// Errors that can occur while encoding, decoding or registering messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The input ended before a field could be read.
    #[error("truncated input: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// A length field on the wire was negative.
    #[error("negative length field: {0}")]
    NegativeLength(i32),

    /// A string field did not contain valid UTF-8.
    #[error("invalid utf-8 in string field")]
    InvalidUtf8(#[source] std::str::Utf8Error),

    /// No factory is registered for this type id.
    #[error("unknown message type {0}")]
    UnknownType(MessageType),

    /// A second message kind tried to claim an id already in use.
    #[error("message type {message_type} already registered by {existing}")]
    DuplicateType {
        message_type: MessageType,
        existing: &'static str,
    },

    /// An RPC argument carried a tag this layer does not know.
    #[error("unknown rpc argument tag {0}")]
    UnknownArgTag(u8),

    /// An RPC call had more arguments than the one-byte count can express.
    #[error("too many rpc arguments: {0} (max {max})", max = RpcArg::MAX_COUNT)]
    TooManyArgs(usize),

    /// A frame's body is larger than the configured maximum.
    #[error("frame body of {len} bytes exceeds maximum of {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// A message's decoder left bytes unread at the end of its body.
    #[error("{0} trailing bytes after message body")]
    TrailingBytes(usize),

    /// The message is structurally valid but violates a protocol rule.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
