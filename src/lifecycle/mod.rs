//! Process lifecycle: termination signals

mod shutdown;

pub use shutdown::{ShutdownSignal, Termination};
