//! Sender driver: broadcast one file and serve redelivery requests.

use std::fs::File;
use std::net::SocketAddr;
use std::path::Path;

use anyhow::{anyhow, Context};
use lshr_core::protocol::MAX_DATAGRAM;
use lshr_core::{SenderSession, SenderState, TransmitKind};
use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::net;
use crate::prompt::human_size;

type Session = SenderSession<File>;

pub async fn run(path: &Path, cfg: &Config) -> anyhow::Result<()> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let meta = file.metadata().with_context(|| format!("cannot stat {}", path.display()))?;
    if !meta.is_file() {
        return Err(anyhow!("{} is not a regular file", path.display()));
    }
    let filename = path
        .file_name()
        .ok_or_else(|| anyhow!("{} has no file name", path.display()))?
        .to_string_lossy()
        .into_owned();

    let mut session = SenderSession::new(filename.clone(), file, meta.len(), cfg.sender_config());
    // Hashing reads the whole file.
    let (mut session, started) = tokio::task::spawn_blocking(move || {
        let started = session.start().map(|a| a.clone());
        (session, started)
    })
    .await?;
    let announce = started.context("cannot prepare transfer")?;
    info!(
        file = %filename,
        size = %human_size(announce.total_size),
        blocks = announce.num_blocks,
        block_size = session.layout().block_size(),
        transfer = %announce.transfer_id,
        md5 = %announce.content_hash,
        "announcing"
    );

    let socket = net::bind_broadcast(0).context("cannot bind sender socket")?;
    let dest = net::broadcast_addr(cfg.port);
    drive(&socket, dest, &mut session, cfg).await;

    let stats = session.stats();
    match session.outcome() {
        Some(Ok(())) => {
            info!(
                receivers = session.receivers(),
                blocks = stats.blocks_sent,
                redelivered = stats.blocks_redelivered,
                rounds = stats.rounds,
                "transfer complete"
            );
            Ok(())
        }
        Some(Err(e)) => Err(anyhow!("transfer {} failed: {e}", announce.transfer_id)),
        None => Err(anyhow!("transfer {} stopped early", announce.transfer_id)),
    }
}

async fn drive(socket: &UdpSocket, dest: SocketAddr, session: &mut Session, cfg: &Config) {
    let mut ticker = tokio::time::interval(cfg.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately; the first announce is already pending.
    ticker.tick().await;
    let mut pace = tokio::time::interval(cfg.block_pacing());
    pace.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let shutdown = crate::shutdown_signal();
    tokio::pin!(shutdown);
    let mut last_state = session.state();

    while !session.is_done() {
        tokio::select! {
            _ = &mut shutdown => {
                info!("interrupted, cancelling transfer");
                session.cancel();
            }
            _ = ticker.tick() => session.tick(),
            r = socket.recv_from(&mut buf) => match r {
                Ok((n, from)) => {
                    if let Err(e) = session.on_datagram(from, &buf[..n]) {
                        debug!(%from, error = %e, "discarding datagram");
                    }
                }
                Err(e) => warn!(error = %e, "recv failed"),
            },
            _ = pace.tick(), if session.has_pending() => send_next(socket, dest, session).await,
        }
        let state = session.state();
        if state != last_state {
            debug!(from = ?last_state, to = ?state, "sender state");
            if state == SenderState::Redelivering {
                info!(round = session.stats().rounds, "redelivering missing blocks");
            }
            last_state = state;
        }
    }
}

async fn send_next(socket: &UdpSocket, dest: SocketAddr, session: &mut Session) {
    let transmit = match session.poll_transmit() {
        Ok(Some(t)) => t,
        Ok(None) => return,
        Err(e) => {
            warn!(error = %e, "cannot produce datagram");
            return;
        }
    };
    if let Err(e) = socket.send_to(&transmit.payload, dest).await {
        match transmit.kind {
            TransmitKind::Announce => warn!(error = %e, "announce send failed"),
            TransmitKind::Block { index, .. } => warn!(index, error = %e, "block send failed"),
        }
        session.on_send_error(&transmit);
    }
}
