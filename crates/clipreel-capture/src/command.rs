//! Command queue feeding the capture controller.
//!
//! Frame arrivals, user actions and stage teardown all travel through one
//! channel, so the controller applies them one at a time in arrival order.

use crate::controller::{CaptureState, PipelineStats, StopMode};
use crate::error::{CaptureError, CaptureResult};
use crate::lease::StageLease;
use crate::pool::{OwnerTag, Reclaim};
use crate::source::SourceError;
use clipreel_core::{CaptureConfig, FrameHandle, FrameId, FrameRecord, RawFrame};
use crossbeam_channel::{bounded, SendError, Sender};
use std::sync::Arc;

/// State changes requested by a caller.
#[derive(Debug, Clone)]
pub enum ControlAction {
    Pause,
    Resume,
    Stop(StopMode),
    Reconfigure(CaptureConfig),
}

/// Messages consumed by [`crate::CaptureController`].
pub enum Command<H> {
    FrameProduced(Result<RawFrame<H>, SourceError>),
    Control {
        action: ControlAction,
        reply: Sender<CaptureResult<()>>,
    },
    /// Lease `ids` (or every buffered frame when `None`) to `stage`.
    HandOff {
        stage: OwnerTag,
        ids: Option<Vec<FrameId>>,
        reply: Sender<CaptureResult<StageLease<H>>>,
    },
    Snapshot {
        stage: OwnerTag,
        max_duration_ms: u64,
        reply: Sender<CaptureResult<StageLease<H>>>,
    },
    ReleaseStage(OwnerTag),
    Stats {
        reply: Sender<PipelineStats>,
    },
    Shutdown,
}

/// Notifications emitted by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    StateChanged { from: CaptureState, to: CaptureState },
    ProducerFailed { consecutive: u32, error: SourceError },
    ResourceExhausted { failures: u32 },
    TrackEnded,
    FrameEvicted(FrameId),
    StageReleased { stage: OwnerTag, destroyed: usize },
}

/// Cloneable sender for driving a controller running on another thread.
///
/// The blocking helpers wait for the controller's reply, so they must not be
/// called from the thread that runs the controller.
pub struct ControllerHandle<H> {
    tx: Sender<Command<H>>,
    pool: Arc<dyn Reclaim<H>>,
}

impl<H> Clone for ControllerHandle<H> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            pool: Arc::clone(&self.pool),
        }
    }
}

impl<H> ControllerHandle<H> {
    pub(crate) fn new(tx: Sender<Command<H>>, pool: Arc<dyn Reclaim<H>>) -> Self {
        Self { tx, pool }
    }

    /// Commands waiting for the controller.
    pub fn queued(&self) -> usize {
        self.tx.len()
    }

    fn request<T>(&self, build: impl FnOnce(Sender<T>) -> Command<H>) -> CaptureResult<T> {
        let (reply, rx) = bounded(1);
        self.tx
            .send(build(reply))
            .map_err(|_| CaptureError::ControllerGone)?;
        rx.recv().map_err(|_| CaptureError::ControllerGone)
    }

    fn control(&self, action: ControlAction) -> CaptureResult<()> {
        self.request(|reply| Command::Control { action, reply })?
    }

    pub fn pause(&self) -> CaptureResult<()> {
        self.control(ControlAction::Pause)
    }

    pub fn resume(&self) -> CaptureResult<()> {
        self.control(ControlAction::Resume)
    }

    pub fn stop(&self, mode: StopMode) -> CaptureResult<()> {
        self.control(ControlAction::Stop(mode))
    }

    pub fn reconfigure(&self, config: CaptureConfig) -> CaptureResult<()> {
        self.control(ControlAction::Reconfigure(config))
    }

    /// Lease every buffered frame to the edit stage.
    pub fn hand_off_to_edit(&self) -> CaptureResult<StageLease<H>> {
        self.request(|reply| Command::HandOff {
            stage: OwnerTag::Edit,
            ids: None,
            reply,
        })?
    }

    /// Lease the selected frames to the export stage.
    pub fn hand_off_to_export(&self, ids: Vec<FrameId>) -> CaptureResult<StageLease<H>> {
        self.request(|reply| Command::HandOff {
            stage: OwnerTag::Export,
            ids: Some(ids),
            reply,
        })?
    }

    pub fn snapshot_recent(&self, stage: OwnerTag, max_duration_ms: u64) -> CaptureResult<StageLease<H>> {
        self.request(|reply| Command::Snapshot {
            stage,
            max_duration_ms,
            reply,
        })?
    }

    pub fn stats(&self) -> CaptureResult<PipelineStats> {
        self.request(|reply| Command::Stats { reply })
    }

    /// Ask the controller loop to release everything and exit.
    pub fn shutdown(&self) -> CaptureResult<()> {
        self.tx
            .send(Command::Shutdown)
            .map_err(|_| CaptureError::ControllerGone)
    }
}

impl<H: FrameHandle> ControllerHandle<H> {
    /// Queue a frame as if the producer had delivered it.
    ///
    /// If the controller is gone the frame is released through the pool.
    pub fn frame_produced(&self, frame: Result<RawFrame<H>, SourceError>) -> CaptureResult<()> {
        match self.tx.send(Command::FrameProduced(frame)) {
            Ok(()) => Ok(()),
            Err(SendError(cmd)) => {
                if let Command::FrameProduced(Ok(raw)) = cmd {
                    let timestamp_us = raw.timestamp_us.unwrap_or_default();
                    self.pool
                        .release_unregistered(FrameRecord::new(raw.handle, timestamp_us));
                }
                Err(CaptureError::ControllerGone)
            }
        }
    }
}
