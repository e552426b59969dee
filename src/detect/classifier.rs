//! Wide-pulse classifier
//!
//! A quick button press shows up as a wide positive pulse, a wide negative
//! pulse and a second wide positive pulse, sometimes with a brief positive
//! spike in between. Holding the button inserts a flat stretch between the
//! two halves. Counting only the wide positive pulses is therefore enough:
//! every first one is the press, every second one the release.

use tracing::trace;

use super::averager::BlockAverage;
use crate::events::Edge;

/// Largest representable signed 16-bit magnitude
pub const MAX_AMPLITUDE: i32 = i16::MAX as i32;

/// Amplitude a block average must reach to count towards a pulse
pub fn threshold_for(percent: u8) -> BlockAverage {
    MAX_AMPLITUDE * i32::from(percent) / 100
}

/// Whether a press has been seen and the matching release is pending
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PeakPhase {
    #[default]
    Idle,
    SeenFirstEdge,
}

/// Turns block averages into press/release edges, ignoring narrow spikes
#[derive(Debug, Clone)]
pub struct PeakClassifier {
    threshold: BlockAverage,
    required_blocks: u32,
    run_length: u32,
    phase: PeakPhase,
}

impl PeakClassifier {
    /// Create a classifier for the given sensitivity and minimum pulse width
    pub fn new(threshold_percent: u8, required_blocks: u32) -> Self {
        Self {
            threshold: threshold_for(threshold_percent),
            required_blocks,
            run_length: 0,
            phase: PeakPhase::Idle,
        }
    }

    pub fn threshold(&self) -> BlockAverage {
        self.threshold
    }

    pub fn run_length(&self) -> u32 {
        self.run_length
    }

    pub fn phase(&self) -> PeakPhase {
        self.phase
    }

    /// Process one block average, returning an edge if a wide pulse just ended
    pub fn push(&mut self, average: BlockAverage) -> Option<Edge> {
        if average >= self.threshold {
            self.run_length += 1;
            return None;
        }

        let wide = self.run_length >= self.required_blocks;
        let run_length = std::mem::take(&mut self.run_length);
        if !wide {
            return None;
        }

        trace!(run_length, phase = ?self.phase, "wide pulse ended");
        let edge = match self.phase {
            PeakPhase::Idle => {
                self.phase = PeakPhase::SeenFirstEdge;
                Edge::PressDetected
            }
            PeakPhase::SeenFirstEdge => {
                self.phase = PeakPhase::Idle;
                Edge::ReleaseDetected
            }
        };
        Some(edge)
    }
}
