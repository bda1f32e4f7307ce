//! Sender session: announce a file, emit its blocks, redeliver what receivers
//! report missing, finish when every receiver reports completion.
//!
//! Host-driven. The host calls [`SenderSession::tick`] at a fixed interval,
//! feeds incoming datagrams to [`SenderSession::on_datagram`], and sends every
//! [`Transmit`] returned by [`SenderSession::poll_transmit`] to the broadcast
//! address.

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::net::SocketAddr;

use crate::block::{BlockLayout, BlockSource};
use crate::identity::{ContentHash, TransferId};
use crate::integrity::{self, ContentHasher};
use crate::protocol::{Announce, DataBlock, Packet, DEFAULT_BLOCK_SIZE, PROTOCOL_VERSION};
use crate::wire::{self, DecodeError, EncodeError};

#[derive(Debug, Clone, Copy)]
pub struct SenderConfig {
    pub block_size: u32,
    /// Announce ticks without an accept before giving up.
    pub max_announce_ticks: u64,
    /// Start emitting blocks after this many announces even without an accept.
    pub start_after_announces: Option<u64>,
    /// Ticks to wait for a report after the last block went out.
    pub report_timeout_ticks: u64,
    /// Consecutive redelivery rounds without receiver progress before giving up.
    pub max_redelivery_rounds: u32,
    /// Retries for a single datagram the socket refused.
    pub max_send_retries: u32,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            max_announce_ticks: 60,
            start_after_announces: None,
            report_timeout_ticks: 3,
            max_redelivery_rounds: 16,
            max_send_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Prepared,
    Announcing,
    Transferring,
    Redelivering,
    Done,
}

/// Why a send session ended without success.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("no receiver accepted after {0} announce ticks")]
    AcceptTimeout(u64),
    #[error("retry budget exhausted after {rounds} redelivery rounds without progress")]
    RetryBudgetExhausted { rounds: u32 },
    #[error("datagram send failed {0} times")]
    SendRetriesExhausted(u32),
    #[error("block source: {0}")]
    Io(io::ErrorKind),
    #[error("session already started")]
    AlreadyStarted,
    #[error("session not started")]
    NotStarted,
    #[error("encode: {0}")]
    Encode(#[from] EncodeError),
    #[error("cancelled")]
    Cancelled,
}

impl From<io::Error> for SessionError {
    fn from(e: io::Error) -> Self {
        SessionError::Io(e.kind())
    }
}

/// What a datagram carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitKind {
    Announce,
    Block { index: u64, redelivery: bool },
}

/// A datagram to broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmit {
    pub kind: TransmitKind,
    pub payload: Vec<u8>,
}

/// Counters for progress display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub announces_sent: u64,
    pub blocks_sent: u64,
    pub blocks_redelivered: u64,
    pub rounds: u32,
}

pub struct SenderSession<S> {
    config: SenderConfig,
    layout: BlockLayout,
    filename: Vec<u8>,
    source: S,
    state: SenderState,
    announce: Option<Announce>,
    announce_bytes: Vec<u8>,
    announce_due: bool,
    announce_ticks: u64,
    /// Next index of the in-order sweep.
    next_block: u64,
    redeliver: BTreeSet<u64>,
    /// Latest missing list per receiver.
    last_reported: HashMap<SocketAddr, Vec<u64>>,
    /// Some receiver filled a gap since the current round began.
    progressed: bool,
    stalled_rounds: u32,
    /// Datagram the socket refused, to be tried again.
    retry: Option<TransmitKind>,
    send_failures: u32,
    idle_ticks: u64,
    /// Receivers seen via accept or report, and whether each is complete.
    receivers: HashMap<SocketAddr, bool>,
    outcome: Option<Result<(), SessionError>>,
    stats: SenderStats,
}

impl<S: BlockSource> SenderSession<S> {
    pub fn new(filename: impl Into<Vec<u8>>, source: S, total_size: u64, config: SenderConfig) -> Self {
        Self {
            layout: BlockLayout::new(total_size, config.block_size),
            config,
            filename: filename.into(),
            source,
            state: SenderState::Prepared,
            announce: None,
            announce_bytes: Vec::new(),
            announce_due: false,
            announce_ticks: 0,
            next_block: 0,
            redeliver: BTreeSet::new(),
            last_reported: HashMap::new(),
            progressed: false,
            stalled_rounds: 0,
            retry: None,
            send_failures: 0,
            idle_ticks: 0,
            receivers: HashMap::new(),
            outcome: None,
            stats: SenderStats::default(),
        }
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == SenderState::Done
    }

    /// None while running.
    pub fn outcome(&self) -> Option<&Result<(), SessionError>> {
        self.outcome.as_ref()
    }

    pub fn announce(&self) -> Option<&Announce> {
        self.announce.as_ref()
    }

    pub fn transfer_id(&self) -> Option<TransferId> {
        self.announce.as_ref().map(|a| a.transfer_id)
    }

    pub fn layout(&self) -> BlockLayout {
        self.layout
    }

    pub fn stats(&self) -> SenderStats {
        self.stats
    }

    /// Receivers that have accepted or reported so far.
    pub fn receivers(&self) -> usize {
        self.receivers.len()
    }

    /// Prepared -> Announcing: pick the transfer ID, digest the whole source,
    /// build the announce.
    pub fn start(&mut self) -> Result<&Announce, SessionError> {
        if self.state != SenderState::Prepared {
            return Err(SessionError::AlreadyStarted);
        }
        let content_hash = match self.digest_source() {
            Ok(h) => h,
            Err(e) => return Err(self.fail(e)),
        };
        let announce = Announce {
            version: PROTOCOL_VERSION,
            filename: self.filename.clone(),
            content_hash,
            transfer_id: TransferId::generate(),
            total_size: self.layout.total_size(),
            num_blocks: self.layout.num_blocks(),
        };
        self.announce_bytes = match wire::encode_announce(&announce) {
            Ok(b) => b,
            Err(e) => return Err(self.fail(e.into())),
        };
        tracing::debug!(
            transfer_id = %announce.transfer_id,
            content_hash = %announce.content_hash,
            blocks = announce.num_blocks,
            "announce prepared"
        );
        self.state = SenderState::Announcing;
        self.announce_due = true;
        Ok(self.announce.insert(announce))
    }

    fn digest_source(&mut self) -> Result<ContentHash, SessionError> {
        let mut hasher = ContentHasher::new();
        let mut buf = vec![0u8; self.layout.block_size() as usize];
        for index in 0..self.layout.num_blocks() {
            let Some((offset, len)) = self.layout.span(index) else {
                break;
            };
            self.source.read_at(offset, &mut buf[..len])?;
            hasher.update(&buf[..len]);
        }
        Ok(hasher.finish())
    }

    /// Something left to send right now.
    pub fn has_pending(&self) -> bool {
        match self.state {
            SenderState::Announcing => self.announce_due,
            SenderState::Transferring => {
                self.retry.is_some() || self.next_block < self.layout.num_blocks() || !self.redeliver.is_empty()
            }
            SenderState::Redelivering => self.retry.is_some() || !self.redeliver.is_empty(),
            SenderState::Prepared | SenderState::Done => false,
        }
    }

    /// Next datagram to broadcast, if any. A source read failure ends the session.
    pub fn poll_transmit(&mut self) -> Result<Option<Transmit>, SessionError> {
        let kind = match self.retry.take() {
            Some(kind) => kind,
            None => {
                self.send_failures = 0;
                match self.next_kind() {
                    Some(kind) => kind,
                    None => return Ok(None),
                }
            }
        };
        let payload = match kind {
            TransmitKind::Announce => {
                self.stats.announces_sent += 1;
                self.announce_bytes.clone()
            }
            TransmitKind::Block { index, redelivery } => {
                let bytes = match self.encode_block(index) {
                    Ok(b) => b,
                    Err(e) => return Err(self.fail(e)),
                };
                self.stats.blocks_sent += 1;
                if redelivery {
                    self.stats.blocks_redelivered += 1;
                }
                bytes
            }
        };
        Ok(Some(Transmit { kind, payload }))
    }

    fn next_kind(&mut self) -> Option<TransmitKind> {
        match self.state {
            SenderState::Announcing if self.announce_due => {
                self.announce_due = false;
                Some(TransmitKind::Announce)
            }
            SenderState::Transferring => {
                if self.next_block < self.layout.num_blocks() {
                    let index = self.next_block;
                    self.next_block += 1;
                    return Some(TransmitKind::Block {
                        index,
                        redelivery: false,
                    });
                }
                // Sweep finished; reports that arrived meanwhile start a round.
                if !self.redeliver.is_empty() && self.begin_round() {
                    return self.next_kind();
                }
                None
            }
            SenderState::Redelivering => self.redeliver.pop_first().map(|index| TransmitKind::Block {
                index,
                redelivery: true,
            }),
            _ => None,
        }
    }

    fn encode_block(&mut self, index: u64) -> Result<Vec<u8>, SessionError> {
        let (offset, len) = self
            .layout
            .span(index)
            .ok_or(SessionError::Io(io::ErrorKind::InvalidInput))?;
        let mut payload = vec![0u8; len];
        self.source.read_at(offset, &mut payload)?;
        let transfer_id = self.transfer_id().ok_or(SessionError::NotStarted)?;
        let block = DataBlock {
            transfer_id,
            block_index: index,
            block_hash: integrity::hash_block(&payload),
            payload,
        };
        Ok(wire::encode_data_block(&block)?)
    }

    /// The socket refused `transmit`. It is handed out again by the next
    /// `poll_transmit` until the per-datagram retry budget runs out.
    pub fn on_send_error(&mut self, transmit: &Transmit) {
        if self.is_done() {
            return;
        }
        self.send_failures += 1;
        if self.send_failures > self.config.max_send_retries {
            self.fail(SessionError::SendRetriesExhausted(self.send_failures));
            return;
        }
        self.retry = Some(transmit.kind);
    }

    /// Process one incoming datagram. Packets for other transfers are ignored;
    /// undecodable ones are returned as errors for the host to log.
    pub fn on_datagram(&mut self, from: SocketAddr, bytes: &[u8]) -> Result<(), DecodeError> {
        let packet = wire::decode_packet(bytes)?;
        let transfer_id = packet.transfer_id();
        if Some(transfer_id) != self.transfer_id() || self.is_done() {
            return Ok(());
        }
        match packet {
            Packet::Accept(_) => {
                self.receivers.entry(from).or_insert(false);
                if self.state == SenderState::Announcing {
                    tracing::info!(%transfer_id, %from, "accepted");
                    self.begin_transfer();
                }
            }
            Packet::MissingReport(report) => {
                if self.state == SenderState::Announcing {
                    self.begin_transfer();
                }
                if self.filled_gap(from, &report.missing) {
                    self.progressed = true;
                }
                self.receivers.insert(from, report.is_complete());
                self.last_reported.insert(from, report.missing.clone());
                if report.is_complete() {
                    tracing::debug!(%transfer_id, %from, "receiver complete");
                    if self.receivers.values().all(|done| *done) {
                        self.finish(Ok(()));
                    }
                    return Ok(());
                }
                self.on_missing(&report.missing);
            }
            // Our own or a foreign sender's broadcast.
            Packet::Announce(_) | Packet::DataBlock(_) => {}
        }
        Ok(())
    }

    fn on_missing(&mut self, missing: &[u64]) {
        let n = self.layout.num_blocks();
        let was_waiting = self.awaiting_report();
        let swept = if self.state == SenderState::Transferring {
            self.next_block
        } else {
            n
        };
        for &index in missing.iter().filter(|&&i| i < n) {
            // Blocks not yet swept go out anyway.
            if index < swept {
                self.redeliver.insert(index);
            }
        }
        self.idle_ticks = 0;
        if was_waiting && !self.redeliver.is_empty() {
            self.begin_round();
        }
    }

    /// A receiver's first report, or one that no longer lists an index its
    /// previous report did. Reports carry the lowest missing indices and a
    /// receiver's missing set only shrinks.
    fn filled_gap(&self, from: SocketAddr, missing: &[u64]) -> bool {
        match self.last_reported.get(&from) {
            None => true,
            Some(prev) => prev.iter().any(|i| missing.binary_search(i).is_err()),
        }
    }

    fn begin_transfer(&mut self) {
        self.state = SenderState::Transferring;
        self.announce_due = false;
        self.idle_ticks = 0;
    }

    /// Start a redelivery round. Only rounds that follow no progress count
    /// against the budget. Returns false when the budget is spent.
    fn begin_round(&mut self) -> bool {
        self.stats.rounds += 1;
        if std::mem::take(&mut self.progressed) {
            self.stalled_rounds = 0;
        } else {
            self.stalled_rounds += 1;
        }
        if self.stalled_rounds > self.config.max_redelivery_rounds {
            self.fail(SessionError::RetryBudgetExhausted {
                rounds: self.config.max_redelivery_rounds,
            });
            return false;
        }
        self.state = SenderState::Redelivering;
        self.idle_ticks = 0;
        true
    }

    /// All blocks are out and nothing is queued: waiting for receivers.
    fn awaiting_report(&self) -> bool {
        let idle = self.retry.is_none() && self.redeliver.is_empty();
        match self.state {
            SenderState::Transferring => idle && self.next_block >= self.layout.num_blocks(),
            SenderState::Redelivering => idle,
            _ => false,
        }
    }

    /// Periodic timer: re-announce, bound the acceptance wait, bound the
    /// report wait.
    pub fn tick(&mut self) {
        match self.state {
            SenderState::Announcing => {
                self.announce_ticks += 1;
                if let Some(n) = self.config.start_after_announces {
                    if self.announce_ticks >= n {
                        tracing::info!("starting transfer without explicit accept");
                        self.begin_transfer();
                        return;
                    }
                }
                if self.announce_ticks >= self.config.max_announce_ticks {
                    self.fail(SessionError::AcceptTimeout(self.announce_ticks));
                    return;
                }
                self.announce_due = true;
            }
            SenderState::Transferring | SenderState::Redelivering => {
                if !self.awaiting_report() {
                    self.idle_ticks = 0;
                    return;
                }
                self.idle_ticks += 1;
                if self.idle_ticks < self.config.report_timeout_ticks {
                    return;
                }
                self.on_report_timeout();
            }
            SenderState::Prepared | SenderState::Done => {}
        }
    }

    /// No report in time: resend what incomplete receivers last reported
    /// missing, or everything if none of them has reported yet.
    fn on_report_timeout(&mut self) {
        tracing::debug!(
            round = self.stats.rounds + 1,
            stalled = self.stalled_rounds,
            "report timeout"
        );
        let n = self.layout.num_blocks();
        let known: BTreeSet<u64> = self
            .last_reported
            .iter()
            .filter(|(addr, _)| self.receivers.get(*addr) == Some(&false))
            .flat_map(|(_, missing)| missing.iter().copied())
            .filter(|&i| i < n)
            .collect();
        if known.is_empty() {
            if self.begin_round() {
                self.state = SenderState::Transferring;
                self.next_block = 0;
            }
        } else {
            self.redeliver = known;
            self.begin_round();
        }
    }

    /// Stop immediately.
    pub fn cancel(&mut self) {
        if !self.is_done() {
            self.fail(SessionError::Cancelled);
        }
    }

    fn fail(&mut self, e: SessionError) -> SessionError {
        if self.outcome.is_none() {
            tracing::warn!(transfer_id = ?self.transfer_id(), error = %e, "send session failed");
            self.finish(Err(e.clone()));
        }
        e
    }

    fn finish(&mut self, outcome: Result<(), SessionError>) {
        self.state = SenderState::Done;
        self.redeliver.clear();
        self.retry = None;
        self.outcome = Some(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Accept, MissingReport, TAG_ANNOUNCE};
    use std::io::Cursor;

    fn peer() -> SocketAddr {
        "10.0.0.2:23543".parse().unwrap()
    }

    fn session(len: usize, config: SenderConfig) -> SenderSession<Cursor<Vec<u8>>> {
        let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
        SenderSession::new("report.txt", Cursor::new(data), len as u64, config)
    }

    fn small() -> SenderConfig {
        SenderConfig {
            block_size: 10,
            max_announce_ticks: 3,
            report_timeout_ticks: 2,
            max_redelivery_rounds: 2,
            ..SenderConfig::default()
        }
    }

    fn accept(s: &mut SenderSession<Cursor<Vec<u8>>>) {
        let bytes = wire::encode_accept(&Accept {
            transfer_id: s.transfer_id().unwrap(),
        });
        s.on_datagram(peer(), &bytes).unwrap();
    }

    fn report(s: &mut SenderSession<Cursor<Vec<u8>>>, missing: Vec<u64>) {
        let bytes = wire::encode_missing_report(&MissingReport {
            transfer_id: s.transfer_id().unwrap(),
            missing,
        })
        .unwrap();
        s.on_datagram(peer(), &bytes).unwrap();
    }

    fn drain(s: &mut SenderSession<Cursor<Vec<u8>>>) -> Vec<TransmitKind> {
        let mut out = Vec::new();
        while let Some(t) = s.poll_transmit().unwrap() {
            out.push(t.kind);
        }
        out
    }

    fn indices(kinds: &[TransmitKind]) -> Vec<u64> {
        kinds
            .iter()
            .filter_map(|k| match k {
                TransmitKind::Block { index, .. } => Some(*index),
                TransmitKind::Announce => None,
            })
            .collect()
    }

    #[test]
    fn start_builds_consistent_announce() {
        let mut s = session(25, small());
        let a = s.start().unwrap().clone();
        assert_eq!(a.num_blocks, 3);
        assert_eq!(a.total_size, 25);
        assert_eq!(a.filename, b"report.txt");
        let data: Vec<u8> = (0..25u8).collect();
        assert_eq!(a.content_hash, ContentHash::of(&data));
        assert_eq!(s.state(), SenderState::Announcing);
    }

    #[test]
    fn announces_once_per_tick_until_accepted() {
        let mut s = session(25, small());
        s.start().unwrap();
        let first = s.poll_transmit().unwrap().unwrap();
        assert_eq!(first.kind, TransmitKind::Announce);
        assert_eq!(first.payload[0], TAG_ANNOUNCE);
        assert!(s.poll_transmit().unwrap().is_none());
        s.tick();
        assert_eq!(drain(&mut s), vec![TransmitKind::Announce]);

        accept(&mut s);
        assert_eq!(s.state(), SenderState::Transferring);
        assert_eq!(indices(&drain(&mut s)), vec![0, 1, 2]);
    }

    #[test]
    fn accept_timeout_fails_closed() {
        let mut s = session(25, small());
        s.start().unwrap();
        for _ in 0..3 {
            drain(&mut s);
            s.tick();
        }
        assert!(s.is_done());
        assert_eq!(s.outcome(), Some(&Err(SessionError::AcceptTimeout(3))));
    }

    #[test]
    fn start_after_announces_policy() {
        let mut s = session(25, SenderConfig {
            start_after_announces: Some(2),
            ..small()
        });
        s.start().unwrap();
        drain(&mut s);
        s.tick();
        drain(&mut s);
        s.tick();
        assert_eq!(s.state(), SenderState::Transferring);
    }

    #[test]
    fn resent_announce_does_not_count_toward_start_after() {
        let mut s = session(25, SenderConfig {
            start_after_announces: Some(2),
            ..small()
        });
        s.start().unwrap();
        let first = s.poll_transmit().unwrap().unwrap();
        s.on_send_error(&first);
        let again = s.poll_transmit().unwrap().unwrap();
        assert_eq!(again.kind, TransmitKind::Announce);
        assert_eq!(s.stats().announces_sent, 2);
        s.tick();
        assert_eq!(s.state(), SenderState::Announcing);
        drain(&mut s);
        s.tick();
        assert_eq!(s.state(), SenderState::Transferring);
    }

    #[test]
    fn redelivers_exactly_reported_blocks() {
        let mut s = session(50, small());
        s.start().unwrap();
        drain(&mut s);
        accept(&mut s);
        assert_eq!(indices(&drain(&mut s)), vec![0, 1, 2, 3, 4]);
        report(&mut s, vec![1, 3]);
        assert_eq!(s.state(), SenderState::Redelivering);
        let kinds = drain(&mut s);
        assert_eq!(indices(&kinds), vec![1, 3]);
        assert!(kinds
            .iter()
            .all(|k| matches!(k, TransmitKind::Block { redelivery: true, .. })));
        report(&mut s, vec![]);
        assert_eq!(s.outcome(), Some(&Ok(())));
        assert_eq!(s.stats().blocks_redelivered, 2);
    }

    #[test]
    fn report_during_sweep_only_queues_sent_blocks() {
        let mut s = session(50, small());
        s.start().unwrap();
        drain(&mut s);
        accept(&mut s);
        s.poll_transmit().unwrap();
        s.poll_transmit().unwrap();
        // Blocks 0 and 1 are out; 4 has not been swept yet.
        report(&mut s, vec![0, 4]);
        assert_eq!(s.state(), SenderState::Transferring);
        assert_eq!(indices(&drain(&mut s)), vec![2, 3, 4, 0]);
    }

    #[test]
    fn report_timeout_resends_everything_then_budget_runs_out() {
        let mut s = session(20, small());
        s.start().unwrap();
        drain(&mut s);
        accept(&mut s);
        assert_eq!(indices(&drain(&mut s)), vec![0, 1]);
        s.tick();
        s.tick();
        assert_eq!(indices(&drain(&mut s)), vec![0, 1]);
        // First report is progress and resets the stall count.
        report(&mut s, vec![1]);
        assert_eq!(indices(&drain(&mut s)), vec![1]);
        for _ in 0..2 {
            s.tick();
            s.tick();
            assert_eq!(indices(&drain(&mut s)), vec![1]);
        }
        s.tick();
        s.tick();
        assert!(s.is_done());
        assert_eq!(
            s.outcome(),
            Some(&Err(SessionError::RetryBudgetExhausted { rounds: 2 }))
        );
    }

    #[test]
    fn rounds_that_make_progress_do_not_spend_budget() {
        let mut s = session(50, small());
        s.start().unwrap();
        drain(&mut s);
        accept(&mut s);
        drain(&mut s);
        for first in 0..5u64 {
            report(&mut s, (first..5).collect());
            assert_eq!(indices(&drain(&mut s)), (first..5).collect::<Vec<_>>());
        }
        report(&mut s, vec![]);
        assert_eq!(s.outcome(), Some(&Ok(())));
        assert_eq!(s.stats().rounds, 5);
    }

    #[test]
    fn repeated_identical_reports_spend_budget() {
        let mut s = session(50, small());
        s.start().unwrap();
        drain(&mut s);
        accept(&mut s);
        drain(&mut s);
        for _ in 0..3 {
            report(&mut s, vec![2]);
            assert_eq!(indices(&drain(&mut s)), vec![2]);
        }
        report(&mut s, vec![2]);
        assert_eq!(
            s.outcome(),
            Some(&Err(SessionError::RetryBudgetExhausted { rounds: 2 }))
        );
    }

    #[test]
    fn send_errors_retry_same_datagram_then_fail() {
        let mut s = session(20, SenderConfig {
            max_send_retries: 2,
            ..small()
        });
        s.start().unwrap();
        drain(&mut s);
        accept(&mut s);
        let t = s.poll_transmit().unwrap().unwrap();
        s.on_send_error(&t);
        let again = s.poll_transmit().unwrap().unwrap();
        assert_eq!(again, t);
        s.on_send_error(&again);
        let third = s.poll_transmit().unwrap().unwrap();
        s.on_send_error(&third);
        assert_eq!(
            s.outcome(),
            Some(&Err(SessionError::SendRetriesExhausted(3)))
        );
    }

    #[test]
    fn waits_for_every_receiver() {
        let other: SocketAddr = "10.0.0.3:23543".parse().unwrap();
        let mut s = session(20, small());
        s.start().unwrap();
        drain(&mut s);
        accept(&mut s);
        let accept_bytes = wire::encode_accept(&Accept {
            transfer_id: s.transfer_id().unwrap(),
        });
        s.on_datagram(other, &accept_bytes).unwrap();
        drain(&mut s);
        report(&mut s, vec![]);
        assert!(!s.is_done());
        let done = wire::encode_missing_report(&MissingReport {
            transfer_id: s.transfer_id().unwrap(),
            missing: vec![],
        })
        .unwrap();
        s.on_datagram(other, &done).unwrap();
        assert_eq!(s.outcome(), Some(&Ok(())));
    }

    #[test]
    fn foreign_transfer_packets_are_ignored() {
        let mut s = session(20, small());
        s.start().unwrap();
        let bytes = wire::encode_accept(&Accept {
            transfer_id: TransferId::from_u64(s.transfer_id().unwrap().as_u64() ^ 1),
        });
        s.on_datagram(peer(), &bytes).unwrap();
        assert_eq!(s.state(), SenderState::Announcing);
        assert!(s.on_datagram(peer(), &[0x42]).is_err());
    }

    #[test]
    fn source_read_failure_is_fatal() {
        // Claims more bytes than the source holds.
        let mut s = SenderSession::new("x", Cursor::new(vec![0u8; 5]), 50, small());
        assert_eq!(
            s.start().unwrap_err(),
            SessionError::Io(io::ErrorKind::UnexpectedEof)
        );
        assert!(s.is_done());
    }

    #[test]
    fn cancel_stops_everything() {
        let mut s = session(20, small());
        s.start().unwrap();
        s.cancel();
        assert!(s.poll_transmit().unwrap().is_none());
        assert_eq!(s.outcome(), Some(&Err(SessionError::Cancelled)));
    }

    #[test]
    fn empty_file_completes_on_report() {
        let mut s = session(0, small());
        let a = s.start().unwrap();
        assert_eq!(a.num_blocks, 0);
        drain(&mut s);
        accept(&mut s);
        assert!(drain(&mut s).is_empty());
        report(&mut s, vec![]);
        assert_eq!(s.outcome(), Some(&Ok(())));
    }
}
