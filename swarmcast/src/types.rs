//! Core types and constants for the swarmcast protocol.

use core::fmt;
use std::net::Ipv4Addr;

use thiserror::Error;

/// Transfer unit in bytes. Every chunk except the last is exactly this long.
pub const CHUNK_SIZE: u32 = 1450;

/// Bytes per kilobyte for file size classes.
pub const BYTES_PER_KB: u64 = 1000;

// Packet types (leading byte on the wire)
pub const PACKET_ADVERTISEMENT: u8 = 0;
pub const PACKET_REQUEST: u8 = 1;
pub const PACKET_REPLY: u8 = 2;

/// Request length on the wire: type (1) + target (4) + file_id (4) + chunk_id (4).
pub const REQUEST_LEN: usize = 13;

/// Reply header length on the wire, before the opaque chunk bytes.
pub const REPLY_HEADER_LEN: usize = 17;

/// Bytes per advertised file entry: file_id (2) + size_kb (2).
pub const ADVERTISED_FILE_LEN: usize = 4;

/// Hard limit imposed by the one-byte advertisement count.
pub const MAX_ADVERTISED_FILES: usize = u8::MAX as usize;

/// Globally unique file identifier.
pub type FileId = u32;

/// Address of a node on the broadcast medium.
///
/// Wraps an IPv4 address in host byte order. Rendered as a dotted quad.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeAddress(u32);

impl NodeAddress {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        NodeAddress(raw)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for NodeAddress {
    fn from(raw: u32) -> Self {
        NodeAddress(raw)
    }
}

impl From<Ipv4Addr> for NodeAddress {
    fn from(addr: Ipv4Addr) -> Self {
        NodeAddress(u32::from(addr))
    }
}

impl From<NodeAddress> for Ipv4Addr {
    fn from(addr: NodeAddress) -> Self {
        Ipv4Addr::from(addr.0)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&Ipv4Addr::from(self.0), f)
    }
}

impl fmt::Debug for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeAddress({})", self)
    }
}

/// One entry of an Advertisement.
///
/// Ids and sizes are 16 bits wide on the wire; the engine truncates when
/// building an advertisement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdvertisedFile {
    pub file_id: u16,
    pub size_kb: u16,
}

/// Periodic broadcast listing the files the sender holds in full.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Advertisement {
    pub files: Vec<AdvertisedFile>,
}

/// Request for one chunk, addressed to a single responder.
///
/// Sent on the broadcast medium; every node other than `target` ignores it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Request {
    /// Intended responder.
    pub target: NodeAddress,
    pub file_id: FileId,
    pub chunk_id: u32,
}

/// Chunk delivery in answer to a Request.
///
/// The chunk body carries no content; only its length travels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reply {
    /// Node that sent the Request this Reply answers.
    pub original_requester: NodeAddress,
    pub file_id: FileId,
    pub file_size_kb: u32,
    pub chunk_id: u32,
    /// Number of opaque payload bytes following the header.
    pub chunk_size: u16,
}

/// The three logical timer slots of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerSlot {
    Advertise,
    Request,
    Reply,
}

impl TimerSlot {
    /// All slots, in index order.
    pub const ALL: [TimerSlot; 3] = [TimerSlot::Advertise, TimerSlot::Request, TimerSlot::Reply];

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            TimerSlot::Advertise => 0,
            TimerSlot::Request => 1,
            TimerSlot::Reply => 2,
        }
    }
}

/// Where the engine currently intends to pull a chunk from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingRequest {
    pub target: NodeAddress,
    pub file_id: FileId,
}

/// Events emitted by the node for the host to observe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// First packet ever received from this address.
    NeighborDiscovered { address: NodeAddress },
    /// A chunk not previously held was stored.
    ChunkReceived {
        file_id: FileId,
        chunk_id: u32,
        from: NodeAddress,
    },
    /// Every chunk of the file is now held locally.
    FileCompleted { file_id: FileId },
    /// The node stopped processing after a protocol violation.
    Halted { reason: ProtocolError },
}

/// Protocol violations. Any of these halts the node that detects it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A Request addressed to this node named a file it has no record of.
    #[error("{requester} requested unknown file {file_id}")]
    UnknownFile {
        requester: NodeAddress,
        file_id: FileId,
    },
    /// A Request addressed to this node named a chunk it does not hold.
    #[error("{requester} requested chunk {chunk_id} of file {file_id}, which is not held")]
    ChunkNotHeld {
        requester: NodeAddress,
        file_id: FileId,
        chunk_id: u32,
    },
}

/// Packet counters kept by every node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransportMetrics {
    pub advertisements_sent: u64,
    pub requests_sent: u64,
    pub replies_sent: u64,
    pub advertisements_received: u64,
    pub requests_received: u64,
    pub replies_received: u64,
    /// Requests overheard that were addressed to another node.
    pub requests_ignored: u64,
    /// Reply chunks that were already held.
    pub duplicate_chunks: u64,
    /// Datagrams that failed to decode.
    pub decode_failures: u64,
}

impl TransportMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total packets handed to the transport.
    pub fn total_sent(&self) -> u64 {
        self.advertisements_sent + self.requests_sent + self.replies_sent
    }

    /// Total packets that decoded successfully.
    pub fn total_received(&self) -> u64 {
        self.advertisements_received + self.requests_received + self.replies_received
    }
}
