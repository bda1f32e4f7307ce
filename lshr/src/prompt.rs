//! Accept/reject decisions for incoming offers.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use lshr_core::{Offer, TransferId};
use tokio::sync::mpsc;

/// Decides whether an offered file should be received. Called off the
/// async runtime, so implementations may block.
pub trait Acceptor: Send + Sync + 'static {
    fn decide(&self, offer: &Offer) -> bool;
}

/// Accepts everything (`--yes`).
pub struct AutoAccept;

impl Acceptor for AutoAccept {
    fn decide(&self, _offer: &Offer) -> bool {
        true
    }
}

/// Asks on the terminal. Anything but `y`/`yes` rejects.
pub struct ConsolePrompt;

impl Acceptor for ConsolePrompt {
    fn decide(&self, offer: &Offer) -> bool {
        let a = &offer.announce;
        let mut out = io::stdout().lock();
        let _ = write!(
            out,
            "{} offers \"{}\" ({}). Accept? [y/N] ",
            offer.from.ip(),
            a.display_name(),
            human_size(a.total_size)
        );
        let _ = out.flush();
        drop(out);
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => false,
            Ok(_) => is_yes(&line),
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// `1536` -> `1.5 KiB`.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Serve offers one at a time and send back `(id, accepted)`.
/// Returns when either channel closes.
pub async fn run(
    acceptor: Arc<dyn Acceptor>,
    mut offers: mpsc::Receiver<Offer>,
    decisions: mpsc::Sender<(TransferId, bool)>,
) {
    while let Some(offer) = offers.recv().await {
        let id = offer.announce.transfer_id;
        let acceptor = acceptor.clone();
        let accept = match tokio::task::spawn_blocking(move || acceptor.decide(&offer)).await {
            Ok(accept) => accept,
            Err(e) => {
                tracing::warn!(transfer = %id, error = %e, "prompt failed, rejecting");
                false
            }
        };
        if decisions.send((id, accept)).await.is_err() {
            break;
        }
    }
}
