// lshr: offer a file to every host on the LAN, or wait for offers.

mod cli;
mod config;
mod logging;
mod net;
mod output;
mod prompt;
mod receive;
mod send;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use crate::cli::Cli;
use crate::prompt::{Acceptor, AutoAccept, ConsolePrompt};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut cfg = config::load();
    cli.apply(&mut cfg);

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async {
        match &cli.file {
            Some(path) => send::run(path, &cfg).await,
            None => {
                let acceptor: Arc<dyn Acceptor> = if cli.yes {
                    Arc::new(AutoAccept)
                } else {
                    Arc::new(ConsolePrompt)
                };
                receive::run(&cfg, acceptor).await
            }
        }
    });
    // A prompt may still be blocked on stdin.
    rt.shutdown_timeout(Duration::from_millis(200));
    if let Err(e) = &result {
        tracing::error!("{e:#}");
    }
    result
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
