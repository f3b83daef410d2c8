//! Edit stage: trimming a leased clip down to the range worth exporting.

use crate::lease::StageLease;
use clipreel_core::{CaptureRate, FrameId, FrameRecord};
use std::ops::Range;

/// Frames leased to the editor plus the current trim selection.
pub struct EditSession<H> {
    lease: StageLease<H>,
    selection: Range<usize>,
}

impl<H> EditSession<H> {
    /// Start editing with the whole lease selected.
    pub fn new(lease: StageLease<H>) -> Self {
        let selection = 0..lease.len();
        Self { lease, selection }
    }

    pub fn frames(&self) -> &[FrameRecord<H>] {
        self.lease.frames()
    }

    /// Select `start..end`, clamped to the leased frames.
    pub fn trim(&mut self, start: usize, end: usize) {
        let len = self.lease.len();
        let end = end.min(len);
        let start = start.min(end);
        self.selection = start..end;
    }

    pub fn selection_range(&self) -> Range<usize> {
        self.selection.clone()
    }

    pub fn selection(&self) -> &[FrameRecord<H>] {
        &self.lease.frames()[self.selection.clone()]
    }

    pub fn selected_ids(&self) -> Vec<FrameId> {
        self.selection().iter().map(|f| f.id).collect()
    }

    pub fn selection_duration(&self, rate: CaptureRate) -> f64 {
        self.selection.len() as f64 / rate.fps() as f64
    }

    /// End the edit stage, releasing its frames.
    pub fn close(self) {
        self.lease.release();
    }
}
