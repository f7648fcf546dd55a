//! Wire protocol for relaynet.
//!
//! This crate defines what travels between peers and how it is framed:
//!
//! - **Types** ([`PeerId`], [`MessageType`], [`Header`], ...): identities
//!   and the reserved sentinel values.
//! - **Codec** ([`WireWriter`], [`WireReader`]): little-endian primitives.
//! - **Messages** ([`Message`], [`MessageKind`]) and the built-in kinds
//!   ([`AssignId`], [`RelayMessage`], [`RpcMessage`]).
//! - **Registry** ([`MessageRegistry`]): type id to empty instance.
//! - **Parser** ([`PacketParser`]): byte stream to messages.
//!
//! # Wire format
//!
//! ```text
//! Frame   := BodyLength:i32 | Body
//! Body    := TypeID:i32 | Payload
//! Header  := SenderID:i32 | TargetID:i32
//! String  := Length:i32 | UTF-8 bytes
//! ```
//!
//! All integers are little-endian. `BodyLength` counts the TypeID.
//!
//! The protocol layer knows nothing about connections or routing; it only
//! turns messages into bytes and back.

mod builtin;
pub mod codec;
mod error;
mod message;
mod parser;
mod registry;
mod rpc;
mod types;

pub use builtin::{AssignId, RelayMessage};
pub use codec::{WireReader, WireWriter};
pub use error::ProtocolError;
pub use message::{Message, MessageKind, decode_body, encode_body, encode_frame, frame_len};
pub use parser::{DEFAULT_PARSER_CAPACITY, PacketParser};
pub use registry::MessageRegistry;
pub use rpc::{RpcArg, RpcMessage, Vector3};
pub use types::{
    DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_FRAME_BODY, Header, LENGTH_PREFIX_LEN, MessageType,
    NetId, PeerId, Side, TYPE_ID_LEN,
};
