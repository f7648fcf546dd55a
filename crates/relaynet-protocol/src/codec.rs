//! Primitive little-endian encoding.
//!
//! [`WireWriter`] appends to a growable buffer; [`WireReader`] walks a
//! borrowed slice with a cursor and bounds-checks every read, so malformed
//! input surfaces as a [`ProtocolError`] instead of a panic.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Header, PeerId, ProtocolError};

/// Writes primitives into a buffer in wire order.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.put_i32_le(v);
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.put_i64_le(v);
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn put_f32(&mut self, v: f32) {
        self.buf.put_f32_le(v);
    }

    /// One byte: `1` for true, `0` for false.
    pub fn put_bool(&mut self, v: bool) {
        self.buf.put_u8(u8::from(v));
    }

    /// `Length:i32` followed by the UTF-8 bytes.
    pub fn put_str(&mut self, s: &str) {
        self.put_i32(s.len() as i32);
        self.buf.put_slice(s.as_bytes());
    }

    /// Raw bytes with no length prefix.
    pub fn put_slice(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    pub fn put_header(&mut self, header: &Header) {
        self.put_i32(header.sender.0);
        self.put_i32(header.target.0);
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finishes writing and hands back the bytes.
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Encoded size of a string field.
pub fn str_len(s: &str) -> usize {
    4 + s.len()
}

/// Reads primitives from a slice in wire order.
#[derive(Debug)]
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Current cursor offset from the start of the slice.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < n {
            return Err(ProtocolError::Truncated {
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn get_i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn get_i64(&mut self) -> Result<i64, ProtocolError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn get_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn get_f32(&mut self) -> Result<f32, ProtocolError> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    /// Any non-zero byte reads as `true`.
    pub fn get_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.get_u8()? != 0)
    }

    /// Reads an `i32` length and rejects negative values.
    pub fn get_len(&mut self) -> Result<usize, ProtocolError> {
        let len = self.get_i32()?;
        usize::try_from(len).map_err(|_| ProtocolError::NegativeLength(len))
    }

    pub fn get_str(&mut self) -> Result<String, ProtocolError> {
        let len = self.get_len()?;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(ProtocolError::InvalidUtf8)
    }

    /// Exactly `n` raw bytes.
    pub fn get_bytes(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        self.take(n)
    }

    pub fn get_peer_id(&mut self) -> Result<PeerId, ProtocolError> {
        self.get_i32().map(PeerId)
    }

    pub fn get_header(&mut self) -> Result<Header, ProtocolError> {
        Ok(Header {
            sender: self.get_peer_id()?,
            target: self.get_peer_id()?,
        })
    }
}
