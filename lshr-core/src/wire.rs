//! Framing: one packet per datagram, tag byte first, little-endian integers.
//!
//! ```text
//! Announce      0x0A | version u8 | name_len u16 | name | content_hash [16] | id u64 | total u64 | blocks u64
//! DataBlock     0x0B | id u64 | index u64 | block_hash [16] | payload_len u32 | payload
//! Accept        0x0C | id u64
//! MissingReport 0x0D | id u64 | count u32 | index u64 * count
//! ```
//!
//! Decoders return either a fully valid packet or an error; nothing is
//! partially filled in.

use crate::identity::{ContentHash, TransferId};
use crate::protocol::*;

/// Encode any packet into a datagram.
pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>, EncodeError> {
    match packet {
        Packet::Announce(a) => encode_announce(a),
        Packet::DataBlock(d) => encode_data_block(d),
        Packet::Accept(a) => Ok(encode_accept(a)),
        Packet::MissingReport(r) => encode_missing_report(r),
    }
}

pub fn encode_announce(a: &Announce) -> Result<Vec<u8>, EncodeError> {
    let name_len: u16 = a
        .filename
        .len()
        .try_into()
        .map_err(|_| EncodeError::FilenameTooLong(a.filename.len()))?;
    let mut out = Vec::with_capacity(ANNOUNCE_HEADER + a.filename.len());
    out.push(TAG_ANNOUNCE);
    out.push(a.version);
    out.extend_from_slice(&name_len.to_le_bytes());
    out.extend_from_slice(&a.filename);
    out.extend_from_slice(a.content_hash.as_bytes());
    out.extend_from_slice(&a.transfer_id.as_u64().to_le_bytes());
    out.extend_from_slice(&a.total_size.to_le_bytes());
    out.extend_from_slice(&a.num_blocks.to_le_bytes());
    Ok(out)
}

pub fn encode_data_block(d: &DataBlock) -> Result<Vec<u8>, EncodeError> {
    let size: u32 = d
        .payload
        .len()
        .try_into()
        .map_err(|_| EncodeError::PayloadTooLarge(d.payload.len()))?;
    let mut out = Vec::with_capacity(DATA_BLOCK_HEADER + d.payload.len());
    out.push(TAG_DATA_BLOCK);
    out.extend_from_slice(&d.transfer_id.as_u64().to_le_bytes());
    out.extend_from_slice(&d.block_index.to_le_bytes());
    out.extend_from_slice(&d.block_hash);
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(&d.payload);
    Ok(out)
}

pub fn encode_accept(a: &Accept) -> Vec<u8> {
    let mut out = Vec::with_capacity(ACCEPT_LEN);
    out.push(TAG_ACCEPT);
    out.extend_from_slice(&a.transfer_id.as_u64().to_le_bytes());
    out
}

pub fn encode_missing_report(r: &MissingReport) -> Result<Vec<u8>, EncodeError> {
    if r.missing.len() > MAX_REPORT_INDICES {
        return Err(EncodeError::TooManyIndices(r.missing.len()));
    }
    if let Some(pos) = first_unordered(&r.missing) {
        return Err(EncodeError::UnorderedIndices(pos));
    }
    let mut out = Vec::with_capacity(MISSING_REPORT_HEADER + 8 * r.missing.len());
    out.push(TAG_MISSING_REPORT);
    out.extend_from_slice(&r.transfer_id.as_u64().to_le_bytes());
    out.extend_from_slice(&(r.missing.len() as u32).to_le_bytes());
    for idx in &r.missing {
        out.extend_from_slice(&idx.to_le_bytes());
    }
    Ok(out)
}

/// Error encoding a packet (value not representable on the wire).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("filename of {0} bytes exceeds u16 length prefix")]
    FilenameTooLong(usize),
    #[error("payload of {0} bytes exceeds u32 size field")]
    PayloadTooLarge(usize),
    #[error("missing report with {0} indices exceeds per-report limit")]
    TooManyIndices(usize),
    #[error("missing report indices not strictly ascending at position {0}")]
    UnorderedIndices(usize),
}

/// Which length-prefixed field disagreed with the bytes present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Filename,
    Payload,
    Indices,
}

/// Error decoding a datagram.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown packet type 0x{0:02x}")]
    UnknownPacketType(u8),
    #[error("packet type mismatch: expected 0x{expected:02x}, got 0x{got:02x}")]
    PacketTypeMismatch { expected: u8, got: u8 },
    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u8, got: u8 },
    #[error("truncated packet: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("{field:?} length mismatch: declared {declared}, available {available}")]
    LengthMismatch {
        field: Field,
        declared: usize,
        available: usize,
    },
    #[error("{0} trailing bytes after packet")]
    TrailingBytes(usize),
    #[error("missing report declares {0} indices, above per-report limit")]
    TooManyIndices(usize),
    #[error("missing report indices not strictly ascending at position {0}")]
    UnorderedIndices(usize),
}

/// Decode any packet, dispatching on the tag byte.
pub fn decode_packet(bytes: &[u8]) -> Result<Packet, DecodeError> {
    let tag = *bytes.first().ok_or(DecodeError::Truncated { need: 1, have: 0 })?;
    match tag {
        TAG_ANNOUNCE => decode_announce(bytes).map(Packet::Announce),
        TAG_DATA_BLOCK => decode_data_block(bytes).map(Packet::DataBlock),
        TAG_ACCEPT => decode_accept(bytes).map(Packet::Accept),
        TAG_MISSING_REPORT => decode_missing_report(bytes).map(Packet::MissingReport),
        other => Err(DecodeError::UnknownPacketType(other)),
    }
}

pub fn decode_announce(bytes: &[u8]) -> Result<Announce, DecodeError> {
    let mut r = Reader::new(bytes, TAG_ANNOUNCE, ANNOUNCE_HEADER)?;
    let version = r.u8()?;
    if version != PROTOCOL_VERSION {
        return Err(DecodeError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            got: version,
        });
    }
    let name_len = r.u16()? as usize;
    let filename = r.sized(Field::Filename, name_len)?.to_vec();
    let content_hash = ContentHash::from_bytes(r.digest()?);
    let transfer_id = TransferId::from_u64(r.u64()?);
    let total_size = r.u64()?;
    let num_blocks = r.u64()?;
    r.finish()?;
    Ok(Announce {
        version,
        filename,
        content_hash,
        transfer_id,
        total_size,
        num_blocks,
    })
}

pub fn decode_data_block(bytes: &[u8]) -> Result<DataBlock, DecodeError> {
    let mut r = Reader::new(bytes, TAG_DATA_BLOCK, DATA_BLOCK_HEADER)?;
    let transfer_id = TransferId::from_u64(r.u64()?);
    let block_index = r.u64()?;
    let block_hash = r.digest()?;
    let size = r.u32()? as usize;
    // Payload must fill the datagram exactly.
    if r.remaining() != size {
        return Err(DecodeError::LengthMismatch {
            field: Field::Payload,
            declared: size,
            available: r.remaining(),
        });
    }
    let payload = r.sized(Field::Payload, size)?.to_vec();
    Ok(DataBlock {
        transfer_id,
        block_index,
        block_hash,
        payload,
    })
}

pub fn decode_accept(bytes: &[u8]) -> Result<Accept, DecodeError> {
    let mut r = Reader::new(bytes, TAG_ACCEPT, ACCEPT_LEN)?;
    let transfer_id = TransferId::from_u64(r.u64()?);
    r.finish()?;
    Ok(Accept { transfer_id })
}

pub fn decode_missing_report(bytes: &[u8]) -> Result<MissingReport, DecodeError> {
    let mut r = Reader::new(bytes, TAG_MISSING_REPORT, MISSING_REPORT_HEADER)?;
    let transfer_id = TransferId::from_u64(r.u64()?);
    let count = r.u32()? as usize;
    if count > MAX_REPORT_INDICES {
        return Err(DecodeError::TooManyIndices(count));
    }
    let declared = count.saturating_mul(8);
    if r.remaining() != declared {
        return Err(DecodeError::LengthMismatch {
            field: Field::Indices,
            declared,
            available: r.remaining(),
        });
    }
    let mut missing = Vec::with_capacity(count);
    for _ in 0..count {
        missing.push(r.u64()?);
    }
    if let Some(pos) = first_unordered(&missing) {
        return Err(DecodeError::UnorderedIndices(pos));
    }
    Ok(MissingReport {
        transfer_id,
        missing,
    })
}

/// Position of the first index not greater than its predecessor.
fn first_unordered(indices: &[u64]) -> Option<usize> {
    indices.windows(2).position(|w| w[0] >= w[1]).map(|p| p + 1)
}

/// Bounds-checked little-endian cursor over one datagram.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Checks the tag as soon as one byte is present, then the fixed header
    /// length, and positions the cursor after the tag.
    fn new(buf: &'a [u8], tag: u8, header: usize) -> Result<Self, DecodeError> {
        let got = *buf.first().ok_or(DecodeError::Truncated {
            need: header,
            have: 0,
        })?;
        if got != tag {
            return Err(DecodeError::PacketTypeMismatch { expected: tag, got });
        }
        if buf.len() < header {
            return Err(DecodeError::Truncated {
                need: header,
                have: buf.len(),
            });
        }
        Ok(Self { buf, pos: 1 })
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::Truncated {
                need: self.pos + n,
                have: self.buf.len(),
            });
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn sized(&mut self, field: Field, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::LengthMismatch {
                field,
                declared: n,
                available: self.remaining(),
            });
        }
        self.take(n)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let mut b = [0u8; 2];
        b.copy_from_slice(self.take(2)?);
        Ok(u16::from_le_bytes(b))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(b))
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(b))
    }

    fn digest(&mut self) -> Result<[u8; DIGEST_LEN], DecodeError> {
        let mut b = [0u8; DIGEST_LEN];
        b.copy_from_slice(self.take(DIGEST_LEN)?);
        Ok(b)
    }

    fn finish(self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}
