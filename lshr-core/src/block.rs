//! Block layout: split a file into fixed-size blocks, read blocks back from the source.

use std::io::{self, Read, Seek, SeekFrom};

use crate::protocol::{DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE};

/// How a file of `total_size` bytes is cut into blocks. All blocks are
/// `block_size` long except the last, which holds the remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    total_size: u64,
    block_size: u32,
}

impl BlockLayout {
    /// A zero block size means the default; sizes above the datagram limit are clamped.
    pub fn new(total_size: u64, block_size: u32) -> Self {
        let block_size = match block_size {
            0 => DEFAULT_BLOCK_SIZE,
            n => n.min(MAX_BLOCK_SIZE),
        };
        Self {
            total_size,
            block_size,
        }
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn num_blocks(&self) -> u64 {
        self.total_size.div_ceil(self.block_size as u64)
    }

    /// Byte offset and length of block `index`, or None past the end.
    pub fn span(&self, index: u64) -> Option<(u64, usize)> {
        if index >= self.num_blocks() {
            return None;
        }
        let start = index * self.block_size as u64;
        let end = (start + self.block_size as u64).min(self.total_size);
        Some((start, (end - start) as usize))
    }
}

/// Random-access file content. The core never opens files itself; the host
/// hands over anything seekable.
pub trait BlockSource {
    /// Fill `buf` with the bytes at `offset`. Short reads are errors.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
}

impl<T: Read + Seek> BlockSource for T {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.read_exact(buf)
    }
}
