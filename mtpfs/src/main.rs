use std::process::ExitCode;

use clap::Parser;
use libmtp::usb::UsbBus;
use mtpfs::args::Args;
use mtpfs::config::Config;
use mtpfs::mount::FuseStack;
use mtpfs::{lifecycle, logging};
use tokio::signal::unix::{SignalKind, signal};
use tracing::warn;

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!("cannot watch SIGTERM: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = term.recv() => {},
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

#[tokio::main]
async fn main() -> ExitCode {
    // help and version exit 0, usage errors exit 2
    let args = Args::try_parse().unwrap_or_else(|e| e.exit());

    let config = match Config::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("mtpfs: {e}");
            return exit_code(e.exit_code());
        }
    };

    if let Err(e) = logging::init(&config) {
        eprintln!("mtpfs: {e:#}");
        return ExitCode::FAILURE;
    }

    let bus = UsbBus::new();
    match lifecycle::run(&config, &bus, &FuseStack, shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => exit_code(e.exit_code()),
    }
}
