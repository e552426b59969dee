//! Edge events produced by the peak classifier
//!
//! A headset button shows up as wide amplitude pulses on the capture
//! channel. Every activation yields one press edge followed by one
//! release edge.

use serde::{Deserialize, Serialize};

/// Events emitted at the trailing boundary of a wide pulse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Edge {
    /// First wide pulse of an activation (informational)
    PressDetected,

    /// Second wide pulse of an activation; drives the mute toggle
    ReleaseDetected,
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::PressDetected => write!(f, "PRESS_DETECTED"),
            Edge::ReleaseDetected => write!(f, "RELEASE_DETECTED"),
        }
    }
}
