//! Command line: `lshr [FILE]` sends, bare `lshr` receives.

use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;

#[derive(Debug, Parser)]
#[command(name = "lshr", version, about = "Share files on the local network over UDP broadcast")]
pub struct Cli {
    /// File to broadcast. Without it, wait for offers from other hosts.
    pub file: Option<PathBuf>,

    /// UDP port for announces and blocks.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Bytes per data block when sending.
    #[arg(long)]
    pub block_size: Option<u32>,

    /// Directory for received files.
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Accept every offer without asking.
    #[arg(short, long)]
    pub yes: bool,

    /// Start sending blocks after this many announces even without an accept.
    #[arg(long, value_name = "N")]
    pub start_after: Option<u64>,

    /// Debug logging (RUST_LOG wins when set).
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Flags win over file and environment.
    pub fn apply(&self, cfg: &mut Config) {
        if let Some(p) = self.port {
            cfg.port = p;
        }
        if let Some(b) = self.block_size {
            cfg.block_size = b;
        }
        if let Some(d) = &self.output_dir {
            cfg.output_dir = d.clone();
        }
        if self.start_after.is_some() {
            cfg.start_after_announces = self.start_after;
        }
    }
}
