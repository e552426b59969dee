//! Termination signals delivered as event loop events

use std::io;

use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::debug;

/// Which signal asked us to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Interrupt,
    Terminate,
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::Interrupt => write!(f, "SIGINT"),
            Termination::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Handles shutdown signals (SIGTERM, SIGINT)
///
/// Handlers are registered on construction, so a signal arriving before
/// the loop first polls [`wait`](Self::wait) is not lost.
pub struct ShutdownSignal {
    sigterm: Signal,
    sigint: Signal,
}

impl ShutdownSignal {
    /// Register the signal handlers
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
        })
    }

    /// Wait for a shutdown signal
    pub async fn wait(&mut self) -> Termination {
        tokio::select! {
            _ = self.sigterm.recv() => {
                debug!("received SIGTERM");
                Termination::Terminate
            }
            _ = self.sigint.recv() => {
                debug!("received SIGINT");
                Termination::Interrupt
            }
        }
    }
}
