//! Button detection on a raw capture stream
//!
//! Samples are reduced to block averages, then classified into
//! press/release edges.

mod averager;
mod classifier;

pub use averager::{BlockAverage, SampleBlockAverager};
pub use classifier::{threshold_for, PeakClassifier, PeakPhase, MAX_AMPLITUDE};

use crate::events::Edge;

/// Averager and classifier for one record stream
#[derive(Debug, Clone)]
pub struct Detector {
    averager: SampleBlockAverager,
    classifier: PeakClassifier,
}

impl Detector {
    pub fn new(block_size: usize, threshold_percent: u8, required_blocks: u32) -> Self {
        Self {
            averager: SampleBlockAverager::new(block_size),
            classifier: PeakClassifier::new(threshold_percent, required_blocks),
        }
    }

    /// Feed raw sample bytes and return the edges they complete, in order
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<Edge> {
        let classifier = &mut self.classifier;
        let mut edges = Vec::new();
        self.averager.push_bytes(bytes, |average| {
            edges.extend(classifier.push(average));
        });
        edges
    }

    pub fn classifier(&self) -> &PeakClassifier {
        &self.classifier
    }
}
