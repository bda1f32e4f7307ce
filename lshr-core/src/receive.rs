//! Receive session: buffer verified blocks of one accepted transfer, report
//! what is missing, reassemble once the whole-file digest checks out.

use std::collections::BTreeMap;

use crate::identity::ContentHash;
use crate::integrity::{self, ContentHasher};
use crate::protocol::{Announce, DataBlock, MissingReport, MAX_REPORT_INDICES};

/// Tick thresholds for one receive session.
#[derive(Debug, Clone, Copy)]
pub struct ReceiveConfig {
    /// Idle ticks (no new block) before a missing report is produced.
    pub report_interval_ticks: u64,
    /// Idle ticks before the session gives up.
    pub stall_timeout_ticks: u64,
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        Self {
            report_interval_ticks: 1,
            stall_timeout_ticks: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    AwaitingBlocks,
    Complete,
    Failed(ReceiveFailure),
}

/// Why a receive session ended without a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReceiveFailure {
    #[error("no progress before stall timeout")]
    Stalled,
    #[error("all blocks verified but content hash does not match")]
    HashMismatch,
    #[error("cancelled")]
    Cancelled,
}

/// What happened to an incoming block that was not rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Verified and stored; more blocks outstanding.
    Stored,
    /// Verified and stored; the transfer is now complete.
    Completed,
    /// Index already present.
    Duplicate,
    /// Different transfer, or session no longer awaiting blocks.
    Ignored,
}

/// Block rejected by the session. The index stays missing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReceiveError {
    #[error("block {index} out of range (transfer has {num_blocks} blocks)")]
    OutOfRangeBlock { index: u64, num_blocks: u64 },
    #[error("block {index} hash mismatch")]
    HashMismatch { index: u64 },
    #[error("block {index} of {len} bytes does not fit the announced size")]
    OversizedBlock { index: u64, len: usize },
    #[error("all blocks present but content hash mismatch")]
    ContentHashMismatch,
}

pub struct ReceiveSession {
    announce: Announce,
    config: ReceiveConfig,
    /// Sparse map index -> verified payload.
    blocks: BTreeMap<u64, Vec<u8>>,
    stored_bytes: u64,
    state: ReceiveState,
    idle_ticks: u64,
}

impl ReceiveSession {
    /// A transfer with no blocks is checked immediately.
    pub fn new(announce: Announce, config: ReceiveConfig) -> Self {
        let mut s = Self {
            announce,
            config,
            blocks: BTreeMap::new(),
            stored_bytes: 0,
            state: ReceiveState::AwaitingBlocks,
            idle_ticks: 0,
        };
        if s.announce.num_blocks == 0 {
            s.check_complete();
        }
        s
    }

    pub fn announce(&self) -> &Announce {
        &self.announce
    }

    pub fn state(&self) -> ReceiveState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == ReceiveState::Complete
    }

    pub fn received_count(&self) -> u64 {
        self.blocks.len() as u64
    }

    pub fn stored_bytes(&self) -> u64 {
        self.stored_bytes
    }

    /// Verify and store one block.
    pub fn on_data_block(&mut self, block: &DataBlock) -> Result<BlockOutcome, ReceiveError> {
        if block.transfer_id != self.announce.transfer_id
            || self.state != ReceiveState::AwaitingBlocks
        {
            return Ok(BlockOutcome::Ignored);
        }
        let num_blocks = self.announce.num_blocks;
        if block.block_index >= num_blocks {
            return Err(ReceiveError::OutOfRangeBlock {
                index: block.block_index,
                num_blocks,
            });
        }
        if !integrity::verify_block(&block.payload, &block.block_hash) {
            return Err(ReceiveError::HashMismatch {
                index: block.block_index,
            });
        }
        if self.blocks.contains_key(&block.block_index) {
            return Ok(BlockOutcome::Duplicate);
        }
        let len = block.payload.len() as u64;
        if len == 0 || self.stored_bytes + len > self.announce.total_size {
            return Err(ReceiveError::OversizedBlock {
                index: block.block_index,
                len: block.payload.len(),
            });
        }
        self.blocks.insert(block.block_index, block.payload.clone());
        self.stored_bytes += len;
        self.idle_ticks = 0;
        if self.blocks.len() as u64 == num_blocks {
            if self.check_complete() {
                return Ok(BlockOutcome::Completed);
            }
            return Err(ReceiveError::ContentHashMismatch);
        }
        Ok(BlockOutcome::Stored)
    }

    /// Re-evaluate completion: every index present, sizes add up, and the
    /// digest of the concatenation equals the announced content hash.
    /// A mismatch with all blocks present fails the session.
    pub fn check_complete(&mut self) -> bool {
        match self.state {
            ReceiveState::Complete => return true,
            ReceiveState::Failed(_) => return false,
            ReceiveState::AwaitingBlocks => {}
        }
        if (self.blocks.len() as u64) < self.announce.num_blocks {
            return false;
        }
        if self.stored_bytes == self.announce.total_size
            && self.content_hash() == self.announce.content_hash
        {
            self.state = ReceiveState::Complete;
            true
        } else {
            self.state = ReceiveState::Failed(ReceiveFailure::HashMismatch);
            false
        }
    }

    fn content_hash(&self) -> ContentHash {
        let mut h = ContentHasher::new();
        for payload in self.blocks.values() {
            h.update(payload);
        }
        h.finish()
    }

    /// Evict a stored block; completion reverts until it is received again.
    pub fn remove_block(&mut self, index: u64) -> Option<Vec<u8>> {
        let payload = self.blocks.remove(&index)?;
        self.stored_bytes -= payload.len() as u64;
        if self.state == ReceiveState::Complete {
            self.state = ReceiveState::AwaitingBlocks;
        }
        Some(payload)
    }

    /// Ascending indices not yet present.
    pub fn missing(&self) -> Vec<u64> {
        self.missing_up_to(usize::MAX)
    }

    /// First `limit` missing indices, ascending.
    pub fn missing_up_to(&self, limit: usize) -> Vec<u64> {
        let mut out = Vec::new();
        let mut next = 0u64;
        for &present in self.blocks.keys() {
            while next < present && out.len() < limit {
                out.push(next);
                next += 1;
            }
            if out.len() >= limit {
                return out;
            }
            next = present + 1;
        }
        while next < self.announce.num_blocks && out.len() < limit {
            out.push(next);
            next += 1;
        }
        out
    }

    /// Report for the sender: missing indices, or empty once complete.
    pub fn missing_report(&self) -> MissingReport {
        let missing = match self.state {
            ReceiveState::Complete => Vec::new(),
            _ => self.missing_up_to(MAX_REPORT_INDICES),
        };
        MissingReport {
            transfer_id: self.announce.transfer_id,
            missing,
        }
    }

    /// Advance one tick. Returns a report when the session has been idle for
    /// the report interval; fails the session past the stall timeout.
    pub fn tick(&mut self) -> Option<MissingReport> {
        if self.state != ReceiveState::AwaitingBlocks {
            return None;
        }
        self.idle_ticks += 1;
        if self.idle_ticks >= self.config.stall_timeout_ticks {
            self.state = ReceiveState::Failed(ReceiveFailure::Stalled);
            return None;
        }
        if self.idle_ticks >= self.config.report_interval_ticks {
            return Some(self.missing_report());
        }
        None
    }

    pub fn cancel(&mut self) {
        if self.state == ReceiveState::AwaitingBlocks {
            self.state = ReceiveState::Failed(ReceiveFailure::Cancelled);
        }
    }

    /// Reassembled file. None unless complete.
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        if self.state != ReceiveState::Complete {
            return None;
        }
        let mut out = Vec::with_capacity(self.stored_bytes as usize);
        for payload in self.blocks.into_values() {
            out.extend_from_slice(&payload);
        }
        Some(out)
    }
}
