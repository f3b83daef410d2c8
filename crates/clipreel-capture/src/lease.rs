//! Stage leases: the consumer side of a hand-off.
//!
//! A lease lists the frames a stage acquired and guarantees that the stage
//! tears down exactly once. Releasing (explicitly or by dropping the lease)
//! queues a single `ReleaseStage` command; the controller then drops the
//! stage's tag from every frame in the pool. If the controller is already
//! gone the lease drops the tag on the shared pool itself.

use crate::command::Command;
use crate::pool::{OwnerTag, Reclaim};
use clipreel_core::{CaptureRate, FrameId, FrameRecord};
use crossbeam_channel::Sender;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

/// Frames held by one pipeline stage.
pub struct StageLease<H> {
    stage: OwnerTag,
    frames: Vec<FrameRecord<H>>,
    acquired_at: SystemTime,
    releaser: Sender<Command<H>>,
    pool: Arc<dyn Reclaim<H>>,
    released: bool,
}

impl<H> StageLease<H> {
    pub(crate) fn new(
        stage: OwnerTag,
        frames: Vec<FrameRecord<H>>,
        releaser: Sender<Command<H>>,
        pool: Arc<dyn Reclaim<H>>,
    ) -> Self {
        Self {
            stage,
            frames,
            acquired_at: SystemTime::now(),
            releaser,
            pool,
            released: false,
        }
    }

    pub fn stage(&self) -> OwnerTag {
        self.stage
    }

    /// Acquired frames, oldest first. Ids that were stale at hand-off time
    /// are absent.
    pub fn frames(&self) -> &[FrameRecord<H>] {
        &self.frames
    }

    pub fn ids(&self) -> Vec<FrameId> {
        self.frames.iter().map(|f| f.id).collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn acquired_at(&self) -> SystemTime {
        self.acquired_at
    }

    pub fn duration_seconds(&self, rate: CaptureRate) -> f64 {
        self.frames.len() as f64 / rate.fps() as f64
    }

    /// Tear the stage down now.
    pub fn release(mut self) {
        self.send_release();
    }

    fn send_release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        // Local handles go first; the pool may free the resources right after.
        self.frames.clear();
        if self.releaser.send(Command::ReleaseStage(self.stage)).is_err() {
            let destroyed = self.pool.release_stage(self.stage);
            debug!(stage = %self.stage, destroyed, "controller gone, released stage on the pool");
        }
    }
}

impl<H> Drop for StageLease<H> {
    fn drop(&mut self) {
        self.send_release();
    }
}

impl<H> std::fmt::Debug for StageLease<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageLease")
            .field("stage", &self.stage)
            .field("frames", &self.frames.len())
            .field("released", &self.released)
            .finish()
    }
}
