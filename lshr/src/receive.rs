//! Receiver driver: listen for announces, ask the acceptor, collect blocks,
//! write finished files.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use lshr_core::protocol::MAX_DATAGRAM;
use lshr_core::{
    decode_packet, Decision, Offer, Output, Packet, ReceiverRegistry, RegistryError, RegistryEvent,
    TransferId,
};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::net;
use crate::output;
use crate::prompt::{self, human_size, Acceptor};

const OFFER_QUEUE: usize = 16;

pub async fn run(cfg: &Config, acceptor: Arc<dyn Acceptor>) -> anyhow::Result<()> {
    let socket = net::bind_broadcast(cfg.port)
        .with_context(|| format!("cannot listen on UDP port {}", cfg.port))?;
    let registry = ReceiverRegistry::new(cfg.registry_config());
    info!(port = cfg.port, dir = %cfg.output_dir.display(), "waiting for offers");

    let (offer_tx, offer_rx) = mpsc::channel::<Offer>(OFFER_QUEUE);
    let (decision_tx, mut decision_rx) = mpsc::channel::<(TransferId, bool)>(OFFER_QUEUE);
    let prompter = tokio::spawn(prompt::run(acceptor, offer_rx, decision_tx));

    let mut ticker = tokio::time::interval(cfg.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let shutdown = crate::shutdown_signal();
    tokio::pin!(shutdown);
    // File writes run off the loop so a large save never stalls other transfers.
    let mut writes = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let active = registry.active_count();
                if active > 0 {
                    warn!(active, "shutting down with transfers in progress");
                } else {
                    info!("shutting down");
                }
                break;
            }
            _ = ticker.tick() => {
                let out = registry.tick();
                handle_output(&socket, cfg, &mut writes, out).await;
            }
            Some((id, accept)) = decision_rx.recv() => match registry.decide(id, accept) {
                Ok(out) => {
                    if accept {
                        info!(transfer = %id, "offer accepted");
                    } else {
                        info!(transfer = %id, "offer rejected");
                    }
                    handle_output(&socket, cfg, &mut writes, out).await;
                }
                Err(e) => debug!(transfer = %id, error = %e, "decision arrived too late"),
            },
            r = socket.recv_from(&mut buf) => match r {
                Ok((n, from)) => {
                    let out = on_datagram(&registry, &offer_tx, from, &buf[..n]);
                    handle_output(&socket, cfg, &mut writes, out).await;
                }
                Err(e) => warn!(error = %e, "recv failed"),
            },
            Some(done) = writes.join_next(), if !writes.is_empty() => {
                if let Err(e) = done {
                    warn!(error = %e, "file write task failed");
                }
            }
        }
    }
    drop(offer_tx);
    prompter.abort();
    if !writes.is_empty() {
        info!(pending = writes.len(), "finishing file writes");
        while writes.join_next().await.is_some() {}
    }
    Ok(())
}

/// Decode and route one datagram. Bad packets are logged and dropped.
fn on_datagram(
    registry: &ReceiverRegistry,
    offers: &mpsc::Sender<Offer>,
    from: SocketAddr,
    bytes: &[u8],
) -> Output {
    let packet = match decode_packet(bytes) {
        Ok(p) => p,
        Err(e) => {
            debug!(%from, len = bytes.len(), error = %e, "discarding datagram");
            return Output::default();
        }
    };
    match packet {
        Packet::Announce(announce) => {
            let id = announce.transfer_id;
            match registry.on_announce(announce, from) {
                Ok(Decision::NewOffer(offer)) => {
                    info!(
                        transfer = %id,
                        %from,
                        file = %offer.announce.display_name(),
                        size = %human_size(offer.announce.total_size),
                        "new offer"
                    );
                    if offers.try_send(offer).is_err() {
                        warn!(transfer = %id, "too many offers waiting, rejecting");
                        return registry.cancel(id).unwrap_or_default();
                    }
                    Output::default()
                }
                Ok(Decision::DuplicateIgnored { resend }) => {
                    trace!(transfer = %id, "duplicate announce");
                    Output {
                        replies: resend.into_iter().collect(),
                        events: Vec::new(),
                    }
                }
                Err(e) => {
                    warn!(%from, error = %e, "ignoring announce");
                    Output::default()
                }
            }
        }
        Packet::DataBlock(block) => match registry.on_data_block(&block) {
            Ok((outcome, out)) => {
                trace!(transfer = %block.transfer_id, index = block.block_index, ?outcome, "block");
                out
            }
            Err(RegistryError::TransferNotFound(_)) => Output::default(),
            Err(e) => {
                debug!(%from, error = %e, "discarding block");
                Output::default()
            }
        },
        // Replies from other receivers; nothing for us.
        Packet::Accept(_) | Packet::MissingReport(_) => Output::default(),
    }
}

async fn handle_output(socket: &UdpSocket, cfg: &Config, writes: &mut JoinSet<()>, out: Output) {
    for reply in out.replies {
        if let Err(e) = socket.send_to(&reply.bytes, reply.to).await {
            warn!(to = %reply.to, error = %e, "reply send failed");
        }
    }
    for event in out.events {
        match event {
            RegistryEvent::Completed { announce, from, data } => {
                let dir = cfg.output_dir.clone();
                writes.spawn(async move {
                    match output::save(&dir, &announce, &data).await {
                        Ok(path) => info!(
                            transfer = %announce.transfer_id,
                            %from,
                            path = %path.display(),
                            size = %human_size(announce.total_size),
                            md5 = %announce.content_hash,
                            "received"
                        ),
                        Err(e) => warn!(
                            transfer = %announce.transfer_id,
                            file = %announce.display_name(),
                            error = %e,
                            "cannot write received file"
                        ),
                    }
                });
            }
            RegistryEvent::Failed { announce, reason } => warn!(
                transfer = %announce.transfer_id,
                file = %announce.display_name(),
                %reason,
                "transfer failed"
            ),
            RegistryEvent::OfferExpired { transfer_id } => {
                info!(transfer = %transfer_id, "offer expired without a decision")
            }
        }
    }
}
