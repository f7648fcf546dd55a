//! Remote procedure call envelope.
//!
//! An [`RpcMessage`] carries `(NetID, method name, arguments)` end to end.
//! This layer never resolves who executes the call.

use crate::codec::{WireReader, WireWriter, str_len};
use crate::{Header, Message, MessageKind, MessageType, NetId, ProtocolError};

/// A three-component float vector.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// One RPC argument. The wire form is a one-byte tag followed by the
/// typed payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcArg {
    Int(i32),
    Float(f32),
    Bool(bool),
    Str(String),
    Vector3(Vector3),
    Long(i64),
}

impl RpcArg {
    /// Most arguments a call can carry (the count is a `u8`).
    pub const MAX_COUNT: usize = u8::MAX as usize;

    pub const TAG_INT: u8 = 1;
    pub const TAG_FLOAT: u8 = 2;
    pub const TAG_BOOL: u8 = 3;
    pub const TAG_STR: u8 = 4;
    pub const TAG_VECTOR3: u8 = 5;
    pub const TAG_LONG: u8 = 6;

    pub fn tag(&self) -> u8 {
        match self {
            RpcArg::Int(_) => Self::TAG_INT,
            RpcArg::Float(_) => Self::TAG_FLOAT,
            RpcArg::Bool(_) => Self::TAG_BOOL,
            RpcArg::Str(_) => Self::TAG_STR,
            RpcArg::Vector3(_) => Self::TAG_VECTOR3,
            RpcArg::Long(_) => Self::TAG_LONG,
        }
    }

    /// Encoded size including the tag byte.
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            RpcArg::Int(_) | RpcArg::Float(_) => 4,
            RpcArg::Bool(_) => 1,
            RpcArg::Str(s) => str_len(s),
            RpcArg::Vector3(_) => 12,
            RpcArg::Long(_) => 8,
        }
    }

    fn encode(&self, w: &mut WireWriter) {
        w.put_u8(self.tag());
        match self {
            RpcArg::Int(v) => w.put_i32(*v),
            RpcArg::Float(v) => w.put_f32(*v),
            RpcArg::Bool(v) => w.put_bool(*v),
            RpcArg::Str(s) => w.put_str(s),
            RpcArg::Vector3(v) => {
                w.put_f32(v.x);
                w.put_f32(v.y);
                w.put_f32(v.z);
            }
            RpcArg::Long(v) => w.put_i64(*v),
        }
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let arg = match r.get_u8()? {
            Self::TAG_INT => RpcArg::Int(r.get_i32()?),
            Self::TAG_FLOAT => RpcArg::Float(r.get_f32()?),
            Self::TAG_BOOL => RpcArg::Bool(r.get_bool()?),
            Self::TAG_STR => RpcArg::Str(r.get_str()?),
            Self::TAG_VECTOR3 => RpcArg::Vector3(Vector3 {
                x: r.get_f32()?,
                y: r.get_f32()?,
                z: r.get_f32()?,
            }),
            Self::TAG_LONG => RpcArg::Long(r.get_i64()?),
            tag => return Err(ProtocolError::UnknownArgTag(tag)),
        };
        Ok(arg)
    }
}

impl From<i32> for RpcArg {
    fn from(v: i32) -> Self {
        RpcArg::Int(v)
    }
}

impl From<f32> for RpcArg {
    fn from(v: f32) -> Self {
        RpcArg::Float(v)
    }
}

impl From<bool> for RpcArg {
    fn from(v: bool) -> Self {
        RpcArg::Bool(v)
    }
}

impl From<String> for RpcArg {
    fn from(v: String) -> Self {
        RpcArg::Str(v)
    }
}

impl From<&str> for RpcArg {
    fn from(v: &str) -> Self {
        RpcArg::Str(v.to_owned())
    }
}

impl From<Vector3> for RpcArg {
    fn from(v: Vector3) -> Self {
        RpcArg::Vector3(v)
    }
}

impl From<i64> for RpcArg {
    fn from(v: i64) -> Self {
        RpcArg::Long(v)
    }
}

/// A remote procedure call: invoke `method` on the object `net_id` with
/// `args`.
///
/// Payload layout:
///
/// ```text
/// Header | NetID:i32 | Method:String | ArgCount:u8 | (Tag:u8 | Payload)*
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RpcMessage {
    pub header: Header,
    net_id: NetId,
    method: String,
    args: Vec<RpcArg>,
}

impl Default for RpcMessage {
    fn default() -> Self {
        Self {
            header: Header::default(),
            net_id: NetId(0),
            method: String::new(),
            args: Vec::new(),
        }
    }
}

impl RpcMessage {
    /// # Errors
    /// Returns [`ProtocolError::TooManyArgs`] past [`RpcArg::MAX_COUNT`].
    pub fn new(
        net_id: NetId,
        method: impl Into<String>,
        args: Vec<RpcArg>,
    ) -> Result<Self, ProtocolError> {
        if args.len() > RpcArg::MAX_COUNT {
            return Err(ProtocolError::TooManyArgs(args.len()));
        }
        Ok(Self {
            header: Header::default(),
            net_id,
            method: method.into(),
            args,
        })
    }

    pub fn net_id(&self) -> NetId {
        self.net_id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn args(&self) -> &[RpcArg] {
        &self.args
    }
}

impl Message for RpcMessage {
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
        Header::ENCODED_LEN
            + 4
            + str_len(&self.method)
            + 1
            + self.args.iter().map(RpcArg::encoded_len).sum::<usize>()
    }

    fn encode(&self, w: &mut WireWriter) {
        w.put_header(&self.header);
        w.put_i32(self.net_id.0);
        w.put_str(&self.method);
        // `new` caps the count, so this never truncates.
        w.put_u8(self.args.len() as u8);
        for arg in &self.args {
            arg.encode(w);
        }
    }

    fn decode(&mut self, r: &mut WireReader<'_>) -> Result<(), ProtocolError> {
        self.header = r.get_header()?;
        self.net_id = NetId(r.get_i32()?);
        self.method = r.get_str()?;
        let count = r.get_u8()?;
        self.args = (0..count)
            .map(|_| RpcArg::decode(r))
            .collect::<Result<_, _>>()?;
        Ok(())
    }
}

impl MessageKind for RpcMessage {
    const TYPE: MessageType = MessageType::RPC;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MessageRegistry, PeerId, decode_body, encode_body, encode_frame};

    fn fire() -> RpcMessage {
        let mut msg = RpcMessage::new(NetId(7), "Fire", vec![RpcArg::Int(3)]).unwrap();
        msg.header = Header::new(PeerId(100), PeerId::SERVER);
        msg
    }

    #[test]
    fn test_rpc_wire_layout() {
        let body = encode_body(&fire());
        let mut r = WireReader::new(&body);
        assert_eq!(r.get_i32().unwrap(), 3);
        assert_eq!(r.get_header().unwrap(), Header::new(PeerId(100), PeerId(0)));
        assert_eq!(r.get_i32().unwrap(), 7);
        assert_eq!(r.get_str().unwrap(), "Fire");
        assert_eq!(r.get_u8().unwrap(), 1);
        assert_eq!(r.get_u8().unwrap(), RpcArg::TAG_INT);
        assert_eq!(r.get_i32().unwrap(), 3);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_rpc_every_arg_kind_decodes() {
        let registry = MessageRegistry::with_builtins();
        let msg = RpcMessage::new(
            NetId(-2),
            "Configure",
            vec![
                1i32.into(),
                2.5f32.into(),
                true.into(),
                "name".into(),
                Vector3::new(1.0, -2.0, 3.5).into(),
                (i64::MAX).into(),
            ],
        )
        .unwrap();

        let frame = encode_frame(&msg);
        assert_eq!(frame.len(), 8 + msg.encoded_len());

        let decoded = decode_body(&registry, &frame[4..]).unwrap();
        assert_eq!(decoded.downcast_ref::<RpcMessage>(), Some(&msg));
    }

    #[test]
    fn test_rpc_too_many_args_rejected() {
        let args = vec![RpcArg::Bool(false); RpcArg::MAX_COUNT + 1];
        assert!(matches!(
            RpcMessage::new(NetId(1), "Overflow", args),
            Err(ProtocolError::TooManyArgs(256))
        ));
    }

    #[test]
    fn test_rpc_unknown_tag_rejected() {
        let mut w = WireWriter::new();
        w.put_header(&Header::default());
        w.put_i32(1);
        w.put_str("M");
        w.put_u8(1);
        w.put_u8(42);
        let bytes = w.freeze();

        let mut msg = RpcMessage::default();
        assert!(matches!(
            msg.decode(&mut WireReader::new(&bytes)),
            Err(ProtocolError::UnknownArgTag(42))
        ));
    }
}
