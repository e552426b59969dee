//! mictoggle-capture: print raw levels and button edges from a capture source
//!
//! Usage: `mictoggle-capture [device] [sample rate] [buffer frames] [threshold %] [required frames]`
//!
//! Used to pick a threshold and pulse width for a particular headset.

use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use mictoggle::config::{CaptureArgs, CaptureConfig};
use mictoggle::detect::{BlockAverage, PeakClassifier, SampleBlockAverager};
use mictoggle::events::Edge;
use mictoggle::lifecycle::{ShutdownSignal, Termination};
use mictoggle::server::{DeviceServer, PulseServer, RecordStream, ServerEvent};

/// One line of output
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Report {
    Level { reading: u64, average: BlockAverage },
    Edge { reading: u64, edge: Edge },
}

struct Printer {
    json: bool,
    readings: u64,
    presses: u64,
}

impl Printer {
    fn level(&mut self, average: BlockAverage) {
        self.readings += 1;
        if self.json {
            self.emit(&Report::Level { reading: self.readings, average });
        } else {
            println!("{average}");
        }
    }

    fn edge(&mut self, edge: Edge) {
        if self.json {
            self.emit(&Report::Edge { reading: self.readings, edge });
            return;
        }
        match edge {
            Edge::PressDetected => {
                self.presses += 1;
                println!("Button pressed {}", self.presses);
            }
            Edge::ReleaseDetected => println!("Button released"),
        }
    }

    fn emit(&self, report: &Report) {
        match serde_json::to_string(report) {
            Ok(line) => println!("{line}"),
            Err(e) => error!(?e, "failed to encode report"),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let config = CaptureConfig::from_args(CaptureArgs::parse());
    info!(
        device = %config.device_name,
        rate = config.spec.rate,
        block_size = config.block_size,
        threshold_percent = config.threshold_percent,
        required = config.required_blocks,
        "starting capture"
    );

    match run(config).await {
        Ok(termination) => {
            info!(signal = %termination, "cleanup ok");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: CaptureConfig) -> Result<Termination> {
    let mut shutdown = ShutdownSignal::install().context("failed to register signal handlers")?;
    let (mut server, mut events) = PulseServer::new().context("failed to start server thread")?;
    server.connect();

    let stream = tokio::select! {
        termination = shutdown.wait() => {
            server.disconnect();
            return Ok(termination);
        }
        stream = open_stream(&mut server, &mut events, &config) => stream,
    };

    let outcome = match stream {
        Ok(stream) => {
            info!("device opened");
            capture(stream, &config, &mut shutdown).await
        }
        Err(e) => Err(e),
    };

    server.disconnect();
    outcome
}

/// Wait for the context, then request the record stream and wait for it
async fn open_stream(
    server: &mut PulseServer,
    events: &mut tokio::sync::mpsc::Receiver<ServerEvent>,
    config: &CaptureConfig,
) -> Result<RecordStream> {
    loop {
        match events.recv().await {
            Some(ServerEvent::ContextReady) => {
                server
                    .connect_record(&config.device_name, config.spec)
                    .context("open stream")?;
            }
            Some(ServerEvent::ContextFailed(e)) => return Err(e).context("server connection"),
            Some(ServerEvent::StreamReady(stream)) => return Ok(stream),
            Some(ServerEvent::StreamFailed(e)) => return Err(e).context("open stream"),
            Some(other) => debug!(?other, "ignoring server event"),
            None => bail!("server event channel closed"),
        }
    }
}

async fn capture(
    mut stream: RecordStream,
    config: &CaptureConfig,
    shutdown: &mut ShutdownSignal,
) -> Result<Termination> {
    let mut averager = SampleBlockAverager::new(config.block_size);
    let mut classifier = PeakClassifier::new(config.threshold_percent, config.required_blocks);
    let mut printer = Printer {
        json: config.json,
        readings: 0,
        presses: 0,
    };

    loop {
        tokio::select! {
            biased;

            termination = shutdown.wait() => return Ok(termination),

            readable = stream.readable() => {
                readable.context("read failed")?;
                let data = stream.peek();
                let len = data.len();
                averager.push_bytes(data, |average| {
                    printer.level(average);
                    if let Some(edge) = classifier.push(average) {
                        printer.edge(edge);
                    }
                });
                stream.drop_fragment(len);
            }
        }
    }
}
