//! Receiver registry: deduplicate announces by transfer ID, hold offers while
//! the acceptance collaborator decides, route data blocks to sessions.
//!
//! All state sits behind one internal lock. Callers get decisions and
//! datagrams to send, never the map itself.

use std::collections::HashMap;
use std::net::SocketAddr;

use parking_lot::Mutex;

use crate::identity::TransferId;
use crate::protocol::{Accept, Announce, DataBlock, MissingReport};
use crate::receive::{BlockOutcome, ReceiveConfig, ReceiveError, ReceiveFailure, ReceiveSession, ReceiveState};
use crate::wire;

/// Default largest file a receiver will consider (4 GiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 4 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    pub receive: ReceiveConfig,
    /// Ticks an offer may wait for a decision before it is dropped.
    pub decision_timeout_ticks: u64,
    /// Ticks a finished or rejected ID is remembered to absorb duplicates.
    pub retain_finished_ticks: u64,
    pub max_file_size: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            receive: ReceiveConfig::default(),
            decision_timeout_ticks: 120,
            retain_finished_ticks: 30,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// An announce waiting for accept/reject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    pub announce: Announce,
    pub from: SocketAddr,
}

/// A datagram the host should send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub to: SocketAddr,
    pub bytes: Vec<u8>,
}

/// Result of processing an announce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// First sighting. Hand the offer to the acceptance collaborator.
    NewOffer(Offer),
    /// Already known; nothing to prompt. May carry an accept or completion
    /// datagram to repeat for the sender.
    DuplicateIgnored { resend: Option<Reply> },
}

/// Terminal events for the host (write file, log failure).
#[derive(Debug)]
pub enum RegistryEvent {
    Completed {
        announce: Announce,
        from: SocketAddr,
        data: Vec<u8>,
    },
    Failed {
        announce: Announce,
        reason: ReceiveFailure,
    },
    OfferExpired {
        transfer_id: TransferId,
    },
}

/// Datagrams and events produced by one registry call.
#[derive(Debug, Default)]
pub struct Output {
    pub replies: Vec<Reply>,
    pub events: Vec<RegistryEvent>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("announce {0} has inconsistent size/block count")]
    InconsistentAnnounce(TransferId),
    #[error("announce {transfer_id} of {total_size} bytes exceeds limit")]
    TooLarge { transfer_id: TransferId, total_size: u64 },
    #[error("transfer {0} not found or not accepted")]
    TransferNotFound(TransferId),
    #[error("transfer {transfer_id}: {source}")]
    Block {
        transfer_id: TransferId,
        #[source]
        source: ReceiveError,
    },
}

enum Entry {
    Pending {
        offer: Offer,
        age: u64,
    },
    Active {
        session: ReceiveSession,
        from: SocketAddr,
    },
    Finished {
        from: SocketAddr,
        transfer_id: TransferId,
        success: bool,
        age: u64,
        resend_due: bool,
    },
    Rejected {
        age: u64,
    },
}

pub struct ReceiverRegistry {
    config: RegistryConfig,
    entries: Mutex<HashMap<TransferId, Entry>>,
}

impl ReceiverRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new announce or recognise a duplicate.
    pub fn on_announce(
        &self,
        announce: Announce,
        from: SocketAddr,
    ) -> Result<Decision, RegistryError> {
        let id = announce.transfer_id;
        if !announce.is_consistent() {
            return Err(RegistryError::InconsistentAnnounce(id));
        }
        if announce.total_size > self.config.max_file_size {
            return Err(RegistryError::TooLarge {
                transfer_id: id,
                total_size: announce.total_size,
            });
        }
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(&id) {
            let resend = match entry {
                // The sender keeps announcing: our accept was probably lost.
                Entry::Active { from: accepted_from, .. } if *accepted_from == from => {
                    Some(accept_reply(id, from))
                }
                Entry::Finished {
                    success: true,
                    from: done_from,
                    ..
                } if *done_from == from => complete_reply(id, from),
                _ => None,
            };
            return Ok(Decision::DuplicateIgnored { resend });
        }
        let offer = Offer { announce, from };
        entries.insert(
            id,
            Entry::Pending {
                offer: offer.clone(),
                age: 0,
            },
        );
        Ok(Decision::NewOffer(offer))
    }

    /// Apply the acceptance collaborator's decision for a pending offer.
    pub fn decide(&self, transfer_id: TransferId, accept: bool) -> Result<Output, RegistryError> {
        let mut entries = self.entries.lock();
        let offer = match entries.remove(&transfer_id) {
            Some(Entry::Pending { offer, .. }) => offer,
            Some(other) => {
                entries.insert(transfer_id, other);
                return Err(RegistryError::TransferNotFound(transfer_id));
            }
            None => return Err(RegistryError::TransferNotFound(transfer_id)),
        };
        let mut out = Output::default();
        if !accept {
            entries.insert(transfer_id, Entry::Rejected { age: 0 });
            return Ok(out);
        }
        out.replies.push(accept_reply(transfer_id, offer.from));
        let session = ReceiveSession::new(offer.announce, self.config.receive);
        let entry = Entry::Active {
            session,
            from: offer.from,
        };
        entries.insert(transfer_id, settle(transfer_id, entry, &mut out));
        Ok(out)
    }

    /// Route a data block to its session.
    pub fn on_data_block(&self, block: &DataBlock) -> Result<(BlockOutcome, Output), RegistryError> {
        let id = block.transfer_id;
        let mut entries = self.entries.lock();
        let mut out = Output::default();
        let entry = match entries.remove(&id) {
            Some(e) => e,
            None => return Err(RegistryError::TransferNotFound(id)),
        };
        let (result, entry) = match entry {
            Entry::Active { mut session, from } => {
                let result = session.on_data_block(block);
                (result, settle(id, Entry::Active { session, from }, &mut out))
            }
            Entry::Finished {
                from,
                transfer_id,
                success,
                age,
                resend_due,
            } => {
                // The sender is still redelivering: repeat completion once per tick.
                if success && resend_due {
                    out.replies.extend(complete_reply(transfer_id, from));
                }
                let entry = Entry::Finished {
                    from,
                    transfer_id,
                    success,
                    age,
                    resend_due: false,
                };
                (Ok(BlockOutcome::Ignored), entry)
            }
            other => {
                entries.insert(id, other);
                return Err(RegistryError::TransferNotFound(id));
            }
        };
        entries.insert(id, entry);
        match result {
            Ok(outcome) => Ok((outcome, out)),
            Err(source) => {
                // Terminal events must still reach the host.
                if !out.events.is_empty() {
                    tracing::debug!(transfer_id = %id, error = %source, "block rejected at completion");
                    return Ok((BlockOutcome::Ignored, out));
                }
                Err(RegistryError::Block {
                    transfer_id: id,
                    source,
                })
            }
        }
    }

    /// Advance all entries by one tick: missing reports, stalls, expiry.
    pub fn tick(&self) -> Output {
        let mut entries = self.entries.lock();
        let mut out = Output::default();
        let ids: Vec<TransferId> = entries.keys().copied().collect();
        for id in ids {
            let Some(entry) = entries.remove(&id) else {
                continue;
            };
            let next = match entry {
                Entry::Pending { offer, age } => {
                    let age = age + 1;
                    if age >= self.config.decision_timeout_ticks {
                        out.events.push(RegistryEvent::OfferExpired { transfer_id: id });
                        None
                    } else {
                        Some(Entry::Pending { offer, age })
                    }
                }
                Entry::Active { mut session, from } => {
                    if let Some(report) = session.tick() {
                        out.replies.extend(report_reply(&report, from));
                    }
                    Some(settle(id, Entry::Active { session, from }, &mut out))
                }
                Entry::Finished {
                    from,
                    transfer_id,
                    success,
                    age,
                    ..
                } => {
                    let age = age + 1;
                    (age < self.config.retain_finished_ticks).then_some(Entry::Finished {
                        from,
                        transfer_id,
                        success,
                        age,
                        resend_due: true,
                    })
                }
                Entry::Rejected { age } => {
                    let age = age + 1;
                    (age < self.config.retain_finished_ticks).then_some(Entry::Rejected { age })
                }
            };
            if let Some(e) = next {
                entries.insert(id, e);
            }
        }
        out
    }

    /// Stop one receive session or drop a pending offer.
    pub fn cancel(&self, transfer_id: TransferId) -> Result<Output, RegistryError> {
        let mut entries = self.entries.lock();
        let mut out = Output::default();
        match entries.remove(&transfer_id) {
            Some(Entry::Active { mut session, from }) => {
                session.cancel();
                let entry = settle(transfer_id, Entry::Active { session, from }, &mut out);
                entries.insert(transfer_id, entry);
                Ok(out)
            }
            Some(Entry::Pending { .. }) => {
                entries.insert(transfer_id, Entry::Rejected { age: 0 });
                Ok(out)
            }
            Some(other) => {
                entries.insert(transfer_id, other);
                Err(RegistryError::TransferNotFound(transfer_id))
            }
            None => Err(RegistryError::TransferNotFound(transfer_id)),
        }
    }

    /// Number of sessions currently receiving blocks.
    pub fn active_count(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|e| matches!(e, Entry::Active { .. }))
            .count()
    }

    /// Missing indices of an active session, for diagnostics.
    pub fn missing(&self, transfer_id: TransferId) -> Option<Vec<u64>> {
        match self.entries.lock().get(&transfer_id) {
            Some(Entry::Active { session, .. }) => Some(session.missing()),
            _ => None,
        }
    }

    pub fn is_known(&self, transfer_id: TransferId) -> bool {
        self.entries.lock().contains_key(&transfer_id)
    }
}

/// Turn a finished session into a `Finished` entry and emit its event.
fn settle(id: TransferId, entry: Entry, out: &mut Output) -> Entry {
    let Entry::Active { session, from } = entry else {
        return entry;
    };
    match session.state() {
        ReceiveState::AwaitingBlocks => Entry::Active { session, from },
        ReceiveState::Failed(reason) => {
            out.events.push(RegistryEvent::Failed {
                announce: session.announce().clone(),
                reason,
            });
            Entry::Finished {
                from,
                transfer_id: id,
                success: false,
                age: 0,
                resend_due: false,
            }
        }
        ReceiveState::Complete => {
            out.replies.extend(complete_reply(id, from));
            let announce = session.announce().clone();
            let data = session.into_bytes().unwrap_or_default();
            out.events.push(RegistryEvent::Completed {
                announce,
                from,
                data,
            });
            Entry::Finished {
                from,
                transfer_id: id,
                success: true,
                age: 0,
                resend_due: false,
            }
        }
    }
}

fn accept_reply(transfer_id: TransferId, to: SocketAddr) -> Reply {
    Reply {
        to,
        bytes: wire::encode_accept(&Accept { transfer_id }),
    }
}

fn complete_reply(transfer_id: TransferId, to: SocketAddr) -> Option<Reply> {
    report_reply(
        &MissingReport {
            transfer_id,
            missing: Vec::new(),
        },
        to,
    )
}

fn report_reply(report: &MissingReport, to: SocketAddr) -> Option<Reply> {
    match wire::encode_missing_report(report) {
        Ok(bytes) => Some(Reply { to, bytes }),
        Err(e) => {
            tracing::warn!(transfer_id = %report.transfer_id, error = %e, "cannot encode missing report");
            None
        }
    }
}
