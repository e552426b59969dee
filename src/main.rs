//! mictoggle: toggle a virtual microphone's mute state from a headset button
//!
//! Usage: `mictoggle [device name]`
//!
//! The device name can be found through `pactl list sources`.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mictoggle::app;
use mictoggle::config::{Config, ToggleArgs};
use mictoggle::detect::Detector;
use mictoggle::lifecycle::{ShutdownSignal, Termination};
use mictoggle::notify::{DesktopNotifier, Notifier, Silent};
use mictoggle::server::PulseServer;
use mictoggle::session::DeviceSession;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let config = match Config::from_toggle_args(ToggleArgs::parse()) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    info!(device = %config.device_name, "using device");

    match run(config).await {
        Ok(termination) => {
            info!(signal = %termination, "mictoggle stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<Termination> {
    let mut shutdown = ShutdownSignal::install().context("failed to register signal handlers")?;

    let (server, events) = PulseServer::new().context("failed to start server thread")?;
    let notifier: Box<dyn Notifier> = if config.notifications {
        Box::new(DesktopNotifier::new())
    } else {
        Box::new(Silent)
    };
    let session = DeviceSession::new(server, &config, notifier);
    let detector = Detector::new(config.block_size, config.threshold_percent, config.required_blocks);

    info!("ready, entering main loop");
    let (server, outcome) = app::run(session, events, detector, shutdown.wait()).await;

    // Context is gone; the runtime goes last when main returns
    drop(server);
    Ok(outcome?)
}
