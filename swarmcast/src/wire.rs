//! Wire format serialization and deserialization.
//!
//! Every datagram starts with a one-byte packet type. Integers are
//! big-endian.
//!
//! ## Advertisement (type 0)
//!
//! ```text
//! type (1) || count (1) || count × (file_id (2) || size_kb (2))
//! ```
//!
//! ## Request (type 1)
//!
//! ```text
//! type (1) || target (4) || file_id (4) || chunk_id (4)
//! ```
//!
//! ## Reply (type 2)
//!
//! ```text
//! type (1) || original_requester (4) || file_id (4) || file_size_kb (4)
//! || chunk_id (4) || chunk bytes (chunk_size)
//! ```
//!
//! The chunk body is opaque filler. Its length is the chunk size and may not
//! exceed `CHUNK_SIZE`.

use thiserror::Error;

use crate::types::{
    AdvertisedFile, Advertisement, NodeAddress, Reply, Request, CHUNK_SIZE, MAX_ADVERTISED_FILES,
    PACKET_ADVERTISEMENT, PACKET_REPLY, PACKET_REQUEST,
};

/// Decoding error types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected end of buffer")]
    UnexpectedEof,
    /// Invalid length value or trailing bytes.
    #[error("invalid length")]
    InvalidLength,
    #[error("invalid packet type")]
    InvalidMessageType,
}

/// Zero-copy reader over a byte slice.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Returns the number of bytes remaining.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        if self.pos >= self.buf.len() {
            return Err(DecodeError::UnexpectedEof);
        }
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    /// Read a fixed number of bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::UnexpectedEof);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u16_be(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32_be(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_address(&mut self) -> Result<NodeAddress, DecodeError> {
        self.read_u32_be().map(NodeAddress::new)
    }

    /// Consume everything left in the buffer.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }
}

/// Writer for encoding packets.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    /// Append `len` zero bytes.
    pub fn write_zeros(&mut self, len: usize) {
        self.buf.resize(self.buf.len() + len, 0);
    }

    pub fn write_u16_be(&mut self, v: u16) {
        self.write_bytes(&v.to_be_bytes());
    }

    pub fn write_u32_be(&mut self, v: u32) {
        self.write_bytes(&v.to_be_bytes());
    }

    pub fn write_address(&mut self, addr: NodeAddress) {
        self.write_u32_be(addr.as_u32());
    }

    /// Finish writing and return the buffer.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Trait for types that can be encoded to wire format.
pub trait Encode {
    fn encode(&self, w: &mut Writer);

    /// Encode and return the bytes.
    fn encode_to_vec(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.encode(&mut w);
        w.finish()
    }
}

/// Trait for types that can be decoded from wire format.
pub trait Decode: Sized {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError>;

    /// Decode from a byte slice (strict: rejects trailing bytes).
    fn decode_from_slice(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data);
        let result = Self::decode(&mut r)?;
        if !r.is_empty() {
            return Err(DecodeError::InvalidLength);
        }
        Ok(result)
    }
}

/// A complete datagram.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Advertisement(Advertisement),
    Request(Request),
    Reply(Reply),
}

impl Message {
    /// Short name for logs and statistics.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Advertisement(_) => "advertisement",
            Message::Request(_) => "request",
            Message::Reply(_) => "reply",
        }
    }
}

/// Packet type byte of an encoded datagram, without decoding the rest.
pub fn peek_type(data: &[u8]) -> Option<u8> {
    data.first().copied()
}

// Bodies below exclude the leading type byte, which `Message` owns.

impl Encode for Advertisement {
    /// Entries past the one-byte count limit are dropped.
    fn encode(&self, w: &mut Writer) {
        let count = self.files.len().min(MAX_ADVERTISED_FILES);
        w.write_u8(count as u8);
        for file in &self.files[..count] {
            w.write_u16_be(file.file_id);
            w.write_u16_be(file.size_kb);
        }
    }
}

impl Decode for Advertisement {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let count = r.read_u8()? as usize;
        let mut files = Vec::with_capacity(count);
        for _ in 0..count {
            let file_id = r.read_u16_be()?;
            let size_kb = r.read_u16_be()?;
            files.push(AdvertisedFile { file_id, size_kb });
        }
        Ok(Advertisement { files })
    }
}

impl Encode for Request {
    fn encode(&self, w: &mut Writer) {
        w.write_address(self.target);
        w.write_u32_be(self.file_id);
        w.write_u32_be(self.chunk_id);
    }
}

impl Decode for Request {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let target = r.read_address()?;
        let file_id = r.read_u32_be()?;
        let chunk_id = r.read_u32_be()?;
        Ok(Request {
            target,
            file_id,
            chunk_id,
        })
    }
}

impl Encode for Reply {
    fn encode(&self, w: &mut Writer) {
        w.write_address(self.original_requester);
        w.write_u32_be(self.file_id);
        w.write_u32_be(self.file_size_kb);
        w.write_u32_be(self.chunk_id);
        w.write_zeros(self.chunk_size as usize);
    }
}

impl Decode for Reply {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let original_requester = r.read_address()?;
        let file_id = r.read_u32_be()?;
        let file_size_kb = r.read_u32_be()?;
        let chunk_id = r.read_u32_be()?;
        let body = r.read_rest();
        if body.len() > CHUNK_SIZE as usize {
            return Err(DecodeError::InvalidLength);
        }
        Ok(Reply {
            original_requester,
            file_id,
            file_size_kb,
            chunk_id,
            chunk_size: body.len() as u16,
        })
    }
}

impl Encode for Message {
    fn encode(&self, w: &mut Writer) {
        match self {
            Message::Advertisement(a) => {
                w.write_u8(PACKET_ADVERTISEMENT);
                a.encode(w);
            }
            Message::Request(r) => {
                w.write_u8(PACKET_REQUEST);
                r.encode(w);
            }
            Message::Reply(r) => {
                w.write_u8(PACKET_REPLY);
                r.encode(w);
            }
        }
    }
}

impl Decode for Message {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        match r.read_u8()? {
            PACKET_ADVERTISEMENT => Ok(Message::Advertisement(Advertisement::decode(r)?)),
            PACKET_REQUEST => Ok(Message::Request(Request::decode(r)?)),
            PACKET_REPLY => Ok(Message::Reply(Reply::decode(r)?)),
            _ => Err(DecodeError::InvalidMessageType),
        }
    }
}
