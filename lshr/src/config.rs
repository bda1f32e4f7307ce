//! Load config from file and environment; CLI flags are applied on top in main.

use std::path::PathBuf;
use std::time::Duration;

use lshr_core::protocol::{DEFAULT_BLOCK_SIZE, DEFAULT_PORT};
use lshr_core::registry::DEFAULT_MAX_FILE_SIZE;
use lshr_core::{ReceiveConfig, RegistryConfig, SenderConfig};
use serde::Deserialize;

/// Daemon configuration. File: ~/.config/lshr/config.toml or /etc/lshr/config.toml.
/// Env overrides: LSHR_PORT, LSHR_BLOCK_SIZE, LSHR_OUTPUT_DIR.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Broadcast UDP port (default 23543).
    pub port: u16,
    /// Bytes per data block.
    pub block_size: u32,
    /// Announce / timeout tick.
    pub tick_interval_ms: u64,
    /// Gap between consecutive datagrams while sending blocks.
    pub block_pacing_us: u64,
    pub max_announce_ticks: u64,
    pub start_after_announces: Option<u64>,
    pub report_timeout_ticks: u64,
    pub max_redelivery_rounds: u32,
    pub max_send_retries: u32,
    pub report_interval_ticks: u64,
    pub stall_timeout_ticks: u64,
    pub decision_timeout_ticks: u64,
    pub retain_finished_ticks: u64,
    pub max_file_size: u64,
    /// Where received files are written.
    pub output_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let sender = SenderConfig::default();
        let registry = RegistryConfig::default();
        Self {
            port: DEFAULT_PORT,
            block_size: DEFAULT_BLOCK_SIZE,
            tick_interval_ms: 1000,
            block_pacing_us: 200,
            max_announce_ticks: sender.max_announce_ticks,
            start_after_announces: sender.start_after_announces,
            report_timeout_ticks: sender.report_timeout_ticks,
            max_redelivery_rounds: sender.max_redelivery_rounds,
            max_send_retries: sender.max_send_retries,
            report_interval_ticks: registry.receive.report_interval_ticks,
            stall_timeout_ticks: registry.receive.stall_timeout_ticks,
            decision_timeout_ticks: registry.decision_timeout_ticks,
            retain_finished_ticks: registry.retain_finished_ticks,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            output_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn block_pacing(&self) -> Duration {
        Duration::from_micros(self.block_pacing_us.max(1))
    }

    pub fn sender_config(&self) -> SenderConfig {
        SenderConfig {
            block_size: self.block_size,
            max_announce_ticks: self.max_announce_ticks,
            start_after_announces: self.start_after_announces,
            report_timeout_ticks: self.report_timeout_ticks,
            max_redelivery_rounds: self.max_redelivery_rounds,
            max_send_retries: self.max_send_retries,
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            receive: ReceiveConfig {
                report_interval_ticks: self.report_interval_ticks,
                stall_timeout_ticks: self.stall_timeout_ticks,
            },
            decision_timeout_ticks: self.decision_timeout_ticks,
            retain_finished_ticks: self.retain_finished_ticks,
            max_file_size: self.max_file_size,
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |k| std::env::var(k).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(p) = var("LSHR_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.port = p;
    }
    if let Some(b) = var("LSHR_BLOCK_SIZE").and_then(|s| s.parse::<u32>().ok()) {
        c.block_size = b;
    }
    if let Some(d) = var("LSHR_OUTPUT_DIR") {
        c.output_dir = PathBuf::from(d);
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/lshr/config.toml"));
    }
    out.push(PathBuf::from("/etc/lshr/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p) {
                Ok(s) => match toml::from_str::<Config>(&s) {
                    Ok(c) => return Some(c),
                    Err(e) => tracing::warn!(path = %p.display(), error = %e, "ignoring invalid config"),
                },
                Err(e) => tracing::warn!(path = %p.display(), error = %e, "cannot read config"),
            }
            break;
        }
    }
    None
}
