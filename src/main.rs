mod allowlist;
mod config;
mod decision;
mod dispatch;
mod engine;
mod gpio;
mod line;
mod signals;

use crate::dispatch::Dispatcher;
use crate::engine::EngineOutcome;
use crate::gpio::GpioCommLine;
use crate::line::{CommLine, EdgeCounter};
use crate::signals::{MarkerWriter, StopSignal};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

/// Liveness/shutdown signaling daemon for an external power-management
/// controller sharing one GPIO line with the host: prove the host is alive
/// with a heartbeat pulse once per interval window, count the rising edges
/// the controller answers with, and halt or reboot the system when it asks.
#[derive(Parser, Debug)]
#[command(name = "heartline", version, about)]
pub struct Cli {
    /// Verbosity: 0 = silent, 1 = basic, 2 = debug (never affects timing)
    #[arg(short = 'd', long = "debug", value_name = "LEVEL", default_value_t = 0)]
    debug: u8,

    /// Communication pin, BCM numbering (overrides config)
    #[arg(short, long)]
    pin: Option<u32>,

    /// Config file path
    #[arg(short, long, default_value = "heartline.toml")]
    config: PathBuf,

    /// GPIO character device (overrides config)
    #[arg(long)]
    chip: Option<PathBuf>,

    /// Walk the full protocol but skip the kill script and the OS command
    #[arg(long)]
    dry_run: bool,
}

fn init_logging(level: u8) {
    let default_filter = match level {
        0 => "error",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "heartline starting");
    tracing::debug!(?cli, "parsed CLI arguments");

    let mut config = match config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("heartline: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(pin) = cli.pin {
        config.line.pin = pin;
    }
    if let Some(chip) = cli.chip {
        config.line.chip = chip;
    }

    // A miswired pin is rejected before anything else happens, hardware or
    // filesystem.
    if let Err(rejected) = allowlist::validate(config.line.pin, &config.line.allowed_pins) {
        eprintln!("heartline: {}", rejected);
        eprintln!("heartline: terminating");
        std::process::exit(0);
    }

    // Markers from an earlier run are purged once, before initialization.
    // At runtime they are only ever written.
    let markers = Arc::new(MarkerWriter::new(
        &config.markers.dir,
        config.markers.prefix.clone(),
    ));
    match markers.purge() {
        Ok(removed) if removed > 0 => {
            tracing::debug!(removed, "purged stale kill markers");
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(error = %e, "could not purge stale kill markers");
        }
    }

    let stop = Arc::new(StopSignal::new());
    if let Err(e) = signals::install(Arc::clone(&stop), Arc::clone(&markers)) {
        eprintln!("heartline: failed to install signal handlers: {}", e);
        std::process::exit(1);
    }

    let edges = Arc::new(EdgeCounter::new());
    let mut line = GpioCommLine::new(&config.line.chip, config.line.pin, Arc::clone(&edges));
    tracing::info!(
        chip = %config.line.chip.display(),
        pin = config.line.pin,
        "entering heartbeat loop"
    );

    let outcome = match engine::run(&mut line, &edges, &stop).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %e, "heartbeat loop failed");
            line.release().await;
            std::process::exit(1);
        }
    };

    match outcome {
        EngineOutcome::Stopped => {
            line.release().await;
            tracing::info!("stopped by operator signal");
        }
        EngineOutcome::ShutdownRequested { command, edges } => {
            let dispatcher = Dispatcher::new(&config.shutdown, cli.dry_run);
            if let Err(e) = dispatcher.dispatch(command, edges, &mut line).await {
                tracing::error!(error = %e, "shutdown sequence failed");
                line.release().await;
                std::process::exit(1);
            }
            // On a real run the OS is taking the system down now; there is
            // nothing left to do but return.
        }
    }
}
