//! Integration test: drive a sender session and a receiver registry through an
//! in-memory network that drops, duplicates, corrupts and reorders datagrams.

use std::io::Cursor;
use std::net::SocketAddr;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use lshr_core::protocol::{MAX_REPORT_INDICES, TAG_DATA_BLOCK};
use lshr_core::{
    decode_packet, Decision, Packet, ReceiverRegistry, RegistryConfig, RegistryEvent, SenderConfig,
    SenderSession, SessionError,
};

const SENDER: &str = "192.168.0.5:50000";

/// Lossy broadcast medium.
struct Network {
    rng: StdRng,
    loss: f64,
    duplicate: f64,
    corrupt: f64,
}

impl Network {
    fn new(seed: u64, loss: f64, duplicate: f64, corrupt: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            loss,
            duplicate,
            corrupt,
        }
    }

    fn carry(&mut self, batch: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        for mut d in batch {
            if self.rng.gen_bool(self.loss) {
                continue;
            }
            // Flip a payload byte of data blocks so the block hash fails.
            if d.first() == Some(&TAG_DATA_BLOCK) && d.len() > 37 && self.rng.gen_bool(self.corrupt) {
                let i = self.rng.gen_range(37..d.len());
                d[i] ^= 0x5A;
            }
            if self.rng.gen_bool(self.duplicate) {
                out.push(d.clone());
            }
            out.push(d);
        }
        out.shuffle(&mut self.rng);
        out
    }
}

struct Receiver {
    addr: SocketAddr,
    registry: ReceiverRegistry,
    accept: bool,
    offers: usize,
    completed: Option<Vec<u8>>,
}

impl Receiver {
    fn new(addr: &str, accept: bool) -> Self {
        Self {
            addr: addr.parse().unwrap(),
            registry: ReceiverRegistry::new(RegistryConfig::default()),
            accept,
            offers: 0,
            completed: None,
        }
    }

    /// Handle one broadcast datagram; returns datagrams for the sender.
    fn handle(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let from: SocketAddr = SENDER.parse().unwrap();
        let mut replies = Vec::new();
        let output = match decode_packet(bytes) {
            Ok(Packet::Announce(a)) => match self.registry.on_announce(a, from) {
                Ok(Decision::NewOffer(offer)) => {
                    self.offers += 1;
                    self.registry
                        .decide(offer.announce.transfer_id, self.accept)
                        .unwrap()
                }
                Ok(Decision::DuplicateIgnored { resend }) => {
                    replies.extend(resend.map(|r| r.bytes));
                    return replies;
                }
                Err(e) => panic!("announce rejected: {e}"),
            },
            Ok(Packet::DataBlock(b)) => match self.registry.on_data_block(&b) {
                Ok((_, out)) => out,
                Err(_) => return replies,
            },
            _ => return replies,
        };
        self.absorb(output, &mut replies);
        replies
    }

    fn tick(&mut self) -> Vec<Vec<u8>> {
        let mut replies = Vec::new();
        let output = self.registry.tick();
        self.absorb(output, &mut replies);
        replies
    }

    fn absorb(&mut self, output: lshr_core::Output, replies: &mut Vec<Vec<u8>>) {
        for r in output.replies {
            assert_eq!(r.to, SENDER.parse::<SocketAddr>().unwrap());
            replies.push(r.bytes);
        }
        for e in output.events {
            if let RegistryEvent::Completed { data, .. } = e {
                self.completed = Some(data);
            }
        }
    }
}

fn file(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Run until the sender finishes. Returns the sender outcome.
fn run(
    data: &[u8],
    config: SenderConfig,
    receivers: &mut [Receiver],
    net: &mut Network,
) -> Result<(), SessionError> {
    let mut sender = SenderSession::new("payload.bin", Cursor::new(data.to_vec()), data.len() as u64, config);
    sender.start().unwrap();
    for _ in 0..2000 {
        let mut outgoing = Vec::new();
        while let Some(t) = sender.poll_transmit().unwrap() {
            outgoing.push(t.payload);
        }
        let mut back: Vec<(SocketAddr, Vec<u8>)> = Vec::new();
        for rx in receivers.iter_mut() {
            for d in net.carry(outgoing.clone()) {
                for r in rx.handle(&d) {
                    back.push((rx.addr, r));
                }
            }
            for r in rx.tick() {
                back.push((rx.addr, r));
            }
        }
        for (from, bytes) in back {
            for d in net.carry(vec![bytes]) {
                sender.on_datagram(from, &d).unwrap();
            }
        }
        if sender.is_done() {
            break;
        }
        sender.tick();
    }
    sender.outcome().cloned().expect("sender did not finish")
}

fn lossy_config() -> SenderConfig {
    SenderConfig {
        block_size: 64,
        max_redelivery_rounds: 64,
        ..SenderConfig::default()
    }
}

#[test]
fn transfer_over_clean_network() {
    let data = file(10_000);
    let mut rx = [Receiver::new("192.168.0.9:23543", true)];
    let mut net = Network::new(1, 0.0, 0.0, 0.0);
    assert_eq!(run(&data, lossy_config(), &mut rx, &mut net), Ok(()));
    assert_eq!(rx[0].completed.as_deref(), Some(data.as_slice()));
    assert_eq!(rx[0].offers, 1);
}

#[test]
fn transfer_survives_loss_duplication_and_reordering() {
    let data = file(20_000);
    let mut rx = [Receiver::new("192.168.0.9:23543", true)];
    let mut net = Network::new(7, 0.2, 0.1, 0.0);
    assert_eq!(run(&data, lossy_config(), &mut rx, &mut net), Ok(()));
    assert_eq!(rx[0].completed.as_deref(), Some(data.as_slice()));
    // Repeated announces never re-prompt.
    assert_eq!(rx[0].offers, 1);
}

#[test]
fn corrupted_blocks_are_redelivered() {
    let data = file(8_000);
    let mut rx = [Receiver::new("192.168.0.9:23543", true)];
    let mut net = Network::new(11, 0.0, 0.0, 0.3);
    assert_eq!(run(&data, lossy_config(), &mut rx, &mut net), Ok(()));
    assert_eq!(rx[0].completed.as_deref(), Some(data.as_slice()));
}

#[test]
fn large_file_outlasts_report_size_times_budget() {
    // ~20k lost blocks, more than max_redelivery_rounds full reports can name.
    let blocks = 200_000;
    let data = file(blocks * 16);
    let mut rx = [Receiver::new("192.168.0.9:23543", true)];
    let mut net = Network::new(21, 0.1, 0.0, 0.0);
    let config = SenderConfig {
        block_size: 16,
        ..SenderConfig::default()
    };
    assert!(blocks / 10 > config.max_redelivery_rounds as usize * MAX_REPORT_INDICES);
    assert_eq!(run(&data, config, &mut rx, &mut net), Ok(()));
    assert_eq!(rx[0].completed.as_deref(), Some(data.as_slice()));
}

#[test]
fn two_receivers_both_complete() {
    let data = file(5_000);
    let mut rx = [
        Receiver::new("192.168.0.9:23543", true),
        Receiver::new("192.168.0.10:23543", true),
    ];
    let mut net = Network::new(3, 0.1, 0.0, 0.0);
    assert_eq!(run(&data, lossy_config(), &mut rx, &mut net), Ok(()));
    for r in &rx {
        assert_eq!(r.completed.as_deref(), Some(data.as_slice()));
    }
}

#[test]
fn rejected_offer_times_out_sender() {
    let data = file(1_000);
    let mut rx = [Receiver::new("192.168.0.9:23543", false)];
    let mut net = Network::new(5, 0.0, 0.0, 0.0);
    let config = SenderConfig {
        max_announce_ticks: 5,
        ..lossy_config()
    };
    assert_eq!(
        run(&data, config, &mut rx, &mut net),
        Err(SessionError::AcceptTimeout(5))
    );
    assert!(rx[0].completed.is_none());
    assert_eq!(rx[0].offers, 1);
}

#[test]
fn total_loss_exhausts_retry_budget() {
    let data = file(1_000);
    let mut rx = [Receiver::new("192.168.0.9:23543", true)];
    let mut net = Network::new(9, 0.0, 0.0, 0.0);
    let config = SenderConfig {
        start_after_announces: Some(1),
        max_redelivery_rounds: 2,
        ..lossy_config()
    };
    // Receiver never hears anything: the medium drops everything.
    net.loss = 1.0;
    assert_eq!(
        run(&data, config, &mut rx, &mut net),
        Err(SessionError::RetryBudgetExhausted { rounds: 2 })
    );
}
