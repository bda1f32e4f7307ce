//! lshr wire protocol: packet types, tags and protocol constants.

use crate::identity::{ContentHash, TransferId};

/// Current protocol version. Carried in every announce.
pub const PROTOCOL_VERSION: u8 = 1;

/// Well-known UDP port of the reference deployment.
pub const DEFAULT_PORT: u16 = 23543;

/// Packet type tags (first byte of every datagram).
pub const TAG_ANNOUNCE: u8 = 0x0A;
pub const TAG_DATA_BLOCK: u8 = 0x0B;
pub const TAG_ACCEPT: u8 = 0x0C;
pub const TAG_MISSING_REPORT: u8 = 0x0D;

/// Digest length in bytes (block hash and content hash).
pub const DIGEST_LEN: usize = 16;

/// Largest UDP payload over IPv4 (65535 - 20 IP - 8 UDP).
pub const MAX_DATAGRAM: usize = 65507;

/// Announce fixed part: tag + version + filename length + hash + id + size + blocks.
pub const ANNOUNCE_HEADER: usize = 1 + 1 + 2 + DIGEST_LEN + 8 + 8 + 8;

/// Data block fixed part: tag + id + index + hash + payload size (u32).
pub const DATA_BLOCK_HEADER: usize = 1 + 8 + 8 + DIGEST_LEN + 4;

/// Accept: tag + id.
pub const ACCEPT_LEN: usize = 1 + 8;

/// Missing report fixed part: tag + id + count (u32).
pub const MISSING_REPORT_HEADER: usize = 1 + 8 + 4;

/// Default block size in bytes.
pub const DEFAULT_BLOCK_SIZE: u32 = 1024;

/// Largest block whose data packet still fits in one datagram.
pub const MAX_BLOCK_SIZE: u32 = (MAX_DATAGRAM - DATA_BLOCK_HEADER) as u32;

/// Upper bound on indices carried by one missing report.
pub const MAX_REPORT_INDICES: usize = 1024;

/// Offer of a file. Broadcast repeatedly by the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announce {
    pub version: u8,
    /// Raw filename bytes as chosen by the sender. Not necessarily UTF-8.
    pub filename: Vec<u8>,
    pub content_hash: ContentHash,
    pub transfer_id: TransferId,
    pub total_size: u64,
    pub num_blocks: u64,
}

impl Announce {
    /// Filename for display and logging; invalid UTF-8 is replaced.
    pub fn display_name(&self) -> String {
        String::from_utf8_lossy(&self.filename).into_owned()
    }

    /// Check that the block count can describe `total_size` bytes.
    /// Every block carries between one and `MAX_BLOCK_SIZE` bytes, and an
    /// empty file has no blocks.
    pub fn is_consistent(&self) -> bool {
        if self.total_size == 0 {
            return self.num_blocks == 0;
        }
        let fewest = self.total_size.div_ceil(MAX_BLOCK_SIZE as u64);
        self.num_blocks >= fewest && self.num_blocks <= self.total_size
    }
}

/// One chunk of file content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock {
    pub transfer_id: TransferId,
    pub block_index: u64,
    /// Digest of `payload` only.
    pub block_hash: [u8; DIGEST_LEN],
    pub payload: Vec<u8>,
}

/// Receiver accepted the transfer. Unicast back to the announcing address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accept {
    pub transfer_id: TransferId,
}

/// Block indices the receiver still lacks, ascending. Empty means complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingReport {
    pub transfer_id: TransferId,
    pub missing: Vec<u64>,
}

impl MissingReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// All wire packet types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Announce(Announce),
    DataBlock(DataBlock),
    Accept(Accept),
    MissingReport(MissingReport),
}

impl Packet {
    pub fn transfer_id(&self) -> TransferId {
        match self {
            Packet::Announce(a) => a.transfer_id,
            Packet::DataBlock(d) => d.transfer_id,
            Packet::Accept(a) => a.transfer_id,
            Packet::MissingReport(r) => r.transfer_id,
        }
    }

    /// Human-readable kind for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Announce(_) => "announce",
            Packet::DataBlock(_) => "data",
            Packet::Accept(_) => "accept",
            Packet::MissingReport(_) => "missing-report",
        }
    }
}
