//! Capture pipeline controller.
//!
//! Owns the ownership pool and the frame ring and is the only place where
//! the two are mutated together. Every new frame is registered in the pool
//! under `capture` before it enters the ring; every frame the ring evicts
//! loses its `capture` tag in the same step.
//!
//! State machine:
//!
//! ```text
//! Idle ──start──▶ Capturing ◀──resume── Paused
//!                  │    └──────pause──────▶ │
//!                  └──stop──▶ Stopped ◀─stop┘
//! ```
//!
//! `Stopped` ends a session; starting again begins a fresh one.

use crate::command::{Command, ControlAction, ControllerEvent, ControllerHandle};
use crate::error::{CaptureError, CaptureResult};
use crate::lease::StageLease;
use crate::pool::{shared, OwnerTag, OwnershipPool, PoolStats, SharedPool};
use crate::producer::ProducerWorker;
use crate::ring::{BufferStats, FrameRing};
use crate::source::{FrameSource, SourceError, SourceProvider};
use clipreel_core::{CaptureConfig, FrameHandle, FrameId, FrameRecord, RawFrame};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::MutexGuard;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

/// Events kept for a listener that is not draining [`CaptureController::events`].
pub const EVENT_BACKLOG: usize = 1024;

/// Lifecycle state of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    Idle,
    Capturing,
    Paused,
    Stopped,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Capturing => "capturing",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        })
    }
}

/// What happens to buffered frames when capture stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopMode {
    /// Keep the ring for a later hand-off.
    Preserve,
    /// Release the `capture` tag on every frame and empty the ring.
    Discard,
}

/// Combined diagnostics for the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub state: CaptureState,
    pub buffer: BufferStats,
    pub pool: PoolStats,
}

/// Drives capture and mediates every pool and ring mutation.
pub struct CaptureController<H: FrameHandle> {
    config: CaptureConfig,
    state: CaptureState,
    pool: SharedPool<H>,
    ring: FrameRing<H>,
    commands: Receiver<Command<H>>,
    sender: Sender<Command<H>>,
    events_tx: Sender<ControllerEvent>,
    events_rx: Receiver<ControllerEvent>,
    worker: Option<ProducerWorker>,
    active_stages: BTreeSet<OwnerTag>,
    shut_down: bool,
    consecutive_failures: u32,
    session_start: Instant,
    last_timestamp_us: u64,
}

impl<H: FrameHandle> CaptureController<H> {
    /// Create an idle controller with a fresh pool.
    pub fn new(config: CaptureConfig) -> CaptureResult<Self> {
        Self::with_pool(config, OwnershipPool::new())
    }

    /// Create an idle controller around an existing pool.
    ///
    /// The pool is shared with every lease the controller hands out, so
    /// frames held by edit or export outlive the controller itself.
    pub fn with_pool(config: CaptureConfig, pool: OwnershipPool<H>) -> CaptureResult<Self> {
        config.validate()?;
        let ring = FrameRing::new(config.capacity())?;
        let (sender, commands) = unbounded();
        let (events_tx, events_rx) = bounded(EVENT_BACKLOG);

        info!(rate = %config.rate, seconds = config.buffer_seconds, capacity = ring.capacity(), "capture controller created");

        Ok(Self {
            config,
            state: CaptureState::Idle,
            pool: shared(pool),
            ring,
            commands,
            sender,
            events_tx,
            events_rx,
            worker: None,
            active_stages: BTreeSet::new(),
            shut_down: false,
            consecutive_failures: 0,
            session_start: Instant::now(),
            last_timestamp_us: 0,
        })
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Lock the shared pool. Do not hold the guard across controller calls.
    pub fn pool(&self) -> MutexGuard<'_, OwnershipPool<H>> {
        self.pool.lock()
    }

    pub fn ring(&self) -> &FrameRing<H> {
        &self.ring
    }

    /// Sender side of the command queue, for other threads.
    pub fn handle(&self) -> ControllerHandle<H> {
        ControllerHandle::new(self.sender.clone(), self.pool.clone())
    }

    /// Receiver for controller notifications.
    pub fn events(&self) -> Receiver<ControllerEvent> {
        self.events_rx.clone()
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            state: self.state,
            buffer: self.ring.stats(self.config.rate),
            pool: self.pool.lock().stats(),
        }
    }

    // ── State transitions ─────────────────────────────────────────

    /// Begin a session without a producer thread; frames arrive through
    /// [`ControllerHandle::frame_produced`] or [`Self::on_frame`].
    ///
    /// Queued frames only reach the ring when the owner calls [`Self::pump`]
    /// or [`Self::run`].
    pub fn start(&mut self) -> CaptureResult<()> {
        if self.shut_down {
            return Err(CaptureError::ControllerGone);
        }
        match self.state {
            CaptureState::Idle => {}
            CaptureState::Stopped => {
                // Previous session's preserved frames go away with it
                self.discard_buffer();
            }
            from => return Err(CaptureError::InvalidTransition { from, action: "start" }),
        }
        self.session_start = Instant::now();
        self.last_timestamp_us = 0;
        self.consecutive_failures = 0;
        self.transition(CaptureState::Capturing);
        Ok(())
    }

    /// Begin a session and spawn a producer thread over `source`.
    ///
    /// The producer stops ticking once [`PRODUCER_BACKLOG`] frames sit
    /// unpumped in the command queue.
    ///
    /// [`PRODUCER_BACKLOG`]: crate::producer::PRODUCER_BACKLOG
    pub fn start_source<S>(&mut self, source: S) -> CaptureResult<()>
    where
        S: FrameSource<Handle = H>,
    {
        self.start()?;
        match ProducerWorker::spawn(source, self.config.rate, self.handle()) {
            Ok(worker) => {
                self.worker = Some(worker);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "failed to spawn producer");
                self.transition(CaptureState::Stopped);
                Err(e.into())
            }
        }
    }

    /// Request a source from `provider` and start capturing from it.
    ///
    /// Setting `cancel` to `true` while the request is pending abandons it
    /// with [`CaptureError::Cancelled`]; nothing is registered or buffered
    /// in that case.
    pub async fn start_with<P>(
        &mut self,
        provider: &mut P,
        mut cancel: watch::Receiver<bool>,
    ) -> CaptureResult<()>
    where
        P: SourceProvider,
        P::Source: FrameSource<Handle = H>,
    {
        if !matches!(self.state, CaptureState::Idle | CaptureState::Stopped) {
            return Err(CaptureError::InvalidTransition {
                from: self.state,
                action: "start",
            });
        }

        let cancelled = async {
            if cancel.wait_for(|c| *c).await.is_err() {
                // Sender dropped: cancellation can no longer happen
                std::future::pending::<()>().await;
            }
        };

        let source = tokio::select! {
            source = provider.request() => {
                source.map_err(|e| CaptureError::SourceRequest(e.to_string()))?
            }
            _ = cancelled => {
                info!("capture source request cancelled");
                return Err(CaptureError::Cancelled);
            }
        };
        self.start_source(source)
    }

    pub fn pause(&mut self) -> CaptureResult<()> {
        if self.state != CaptureState::Capturing {
            return Err(CaptureError::InvalidTransition {
                from: self.state,
                action: "pause",
            });
        }
        if let Some(worker) = &self.worker {
            worker.pause();
        }
        self.transition(CaptureState::Paused);
        Ok(())
    }

    pub fn resume(&mut self) -> CaptureResult<()> {
        if self.state != CaptureState::Paused {
            return Err(CaptureError::InvalidTransition {
                from: self.state,
                action: "resume",
            });
        }
        if let Some(worker) = &self.worker {
            worker.resume();
        }
        self.transition(CaptureState::Capturing);
        Ok(())
    }

    pub fn stop(&mut self, mode: StopMode) -> CaptureResult<()> {
        if !matches!(self.state, CaptureState::Capturing | CaptureState::Paused) {
            return Err(CaptureError::InvalidTransition {
                from: self.state,
                action: "stop",
            });
        }
        self.halt_production();
        if mode == StopMode::Discard {
            self.discard_buffer();
        }
        self.transition(CaptureState::Stopped);
        Ok(())
    }

    /// Apply a new rate or duration by replacing the ring.
    ///
    /// Buffered frames lose their `capture` tag before the old ring is
    /// dropped; frames still leased to edit or export stay alive.
    pub fn reconfigure(&mut self, config: CaptureConfig) -> CaptureResult<()> {
        config.validate()?;
        let ring = FrameRing::new(config.capacity())?;
        self.discard_buffer();
        self.ring = ring;
        if let Some(worker) = &self.worker {
            worker.set_rate(config.rate);
        }
        info!(rate = %config.rate, seconds = config.buffer_seconds, capacity = self.ring.capacity(), "capture reconfigured");
        self.config = config;
        Ok(())
    }

    // ── Frame intake ──────────────────────────────────────────────

    /// Handle one result from the frame source.
    pub fn on_frame(&mut self, frame: Result<RawFrame<H>, SourceError>) -> CaptureResult<()> {
        match frame {
            Ok(raw) => self.accept_frame(raw),
            Err(SourceError::Ended) => {
                info!("capture track ended");
                self.emit(ControllerEvent::TrackEnded);
                if matches!(self.state, CaptureState::Capturing | CaptureState::Paused) {
                    self.stop(StopMode::Preserve)?;
                }
                Ok(())
            }
            Err(e) => self.record_failure(e),
        }
    }

    fn accept_frame(&mut self, raw: RawFrame<H>) -> CaptureResult<()> {
        if self.state != CaptureState::Capturing {
            debug!(state = %self.state, "dropping frame produced outside capture");
            self.dispose(raw);
            return Ok(());
        }

        let (width, height) = raw.handle.dimensions();
        if width == 0 || height == 0 {
            self.dispose(raw);
            return self.record_failure(SourceError::Malformed(format!("{width}x{height} frame")));
        }

        let elapsed_us = self.session_start.elapsed().as_micros() as u64;
        let timestamp_us = raw.timestamp_us.unwrap_or(elapsed_us).max(self.last_timestamp_us);
        self.last_timestamp_us = timestamp_us;
        self.consecutive_failures = 0;

        let record = FrameRecord::new(raw.handle, timestamp_us);
        // Registration strictly precedes insertion
        self.pool.lock().register(record.clone(), OwnerTag::Capture);
        if let Some(evicted) = self.ring.insert(record) {
            self.pool.lock().release(evicted.id, OwnerTag::Capture);
            self.emit(ControllerEvent::FrameEvicted(evicted.id));
        }
        Ok(())
    }

    fn record_failure(&mut self, error: SourceError) -> CaptureResult<()> {
        if self.state != CaptureState::Capturing {
            return Ok(());
        }
        self.consecutive_failures += 1;
        let consecutive = self.consecutive_failures;
        warn!(consecutive, error = %error, "frame production failed");
        self.emit(ControllerEvent::ProducerFailed { consecutive, error });

        if consecutive >= self.config.failure_threshold {
            error!(failures = consecutive, "frame source exhausted, stopping capture");
            self.stop(StopMode::Preserve)?;
            self.emit(ControllerEvent::ResourceExhausted { failures: consecutive });
            return Err(CaptureError::ResourceExhausted { failures: consecutive });
        }
        Ok(())
    }

    // ── Hand-off ──────────────────────────────────────────────────

    /// Lease every buffered frame to the edit stage.
    pub fn hand_off_to_edit(&mut self) -> CaptureResult<StageLease<H>> {
        self.pump();
        self.hand_off(OwnerTag::Edit, None)
    }

    /// Lease an edit-selected range to the export stage.
    pub fn hand_off_to_export(&mut self, ids: &[FrameId]) -> CaptureResult<StageLease<H>> {
        self.pump();
        self.hand_off(OwnerTag::Export, Some(ids.to_vec()))
    }

    fn hand_off(&mut self, stage: OwnerTag, ids: Option<Vec<FrameId>>) -> CaptureResult<StageLease<H>> {
        if self.shut_down {
            return Err(CaptureError::ControllerGone);
        }
        if stage == OwnerTag::Capture {
            return Err(CaptureError::InvalidStage(stage));
        }
        if self.active_stages.contains(&stage) {
            return Err(CaptureError::StageActive(stage));
        }

        let ids = ids.unwrap_or_else(|| self.ring.ids());
        let requested = ids.len();
        let frames: Vec<FrameRecord<H>> = {
            let mut pool = self.pool.lock();
            ids.into_iter().filter_map(|id| pool.acquire(id, stage)).collect()
        };

        if frames.len() < requested {
            warn!(%stage, stale = requested - frames.len(), "hand-off skipped frames no longer in the pool");
        }
        info!(%stage, frames = frames.len(), "hand-off");
        self.active_stages.insert(stage);
        Ok(StageLease::new(stage, frames, self.sender.clone(), self.pool.clone()))
    }

    /// Duplicate the most recent frames and lease the copies to `stage`.
    ///
    /// Capture keeps running and the buffered frames are untouched.
    pub fn snapshot_recent(&mut self, stage: OwnerTag, max_duration_ms: u64) -> CaptureResult<StageLease<H>> {
        self.pump();
        self.snapshot(stage, max_duration_ms)
    }

    fn snapshot(&mut self, stage: OwnerTag, max_duration_ms: u64) -> CaptureResult<StageLease<H>> {
        if self.shut_down {
            return Err(CaptureError::ControllerGone);
        }
        if stage == OwnerTag::Capture {
            return Err(CaptureError::InvalidStage(stage));
        }
        if self.active_stages.contains(&stage) {
            return Err(CaptureError::StageActive(stage));
        }

        let clip = match self.ring.extract_recent(self.config.rate, max_duration_ms) {
            Ok(clip) => clip,
            Err(partial) => {
                let mut pool = self.pool.lock();
                for copy in partial.copies {
                    pool.release_unregistered(copy);
                }
                return Err(clipreel_core::ClipError::from(partial.error).into());
            }
        };
        {
            let mut pool = self.pool.lock();
            for frame in &clip.frames {
                pool.register(frame.clone(), stage);
            }
        }
        info!(%stage, frames = clip.frames.len(), duration = clip.duration_seconds, "snapshot taken");
        self.active_stages.insert(stage);
        Ok(StageLease::new(stage, clip.frames, self.sender.clone(), self.pool.clone()))
    }

    /// Drop `stage`'s tag from every frame. Returns the handles destroyed.
    pub fn release_stage(&mut self, stage: OwnerTag) -> usize {
        let destroyed = self.pool.lock().release_all(stage);
        self.active_stages.remove(&stage);
        info!(%stage, destroyed, "stage released");
        self.emit(ControllerEvent::StageReleased { stage, destroyed });
        destroyed
    }

    // ── Command loop ──────────────────────────────────────────────

    /// Apply every queued command without blocking. Returns how many ran.
    pub fn pump(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(cmd) = self.commands.try_recv() {
            processed += 1;
            if !self.dispatch(cmd) {
                break;
            }
        }
        processed
    }

    /// Process commands until [`Command::Shutdown`], then release everything
    /// capture holds.
    pub fn run(&mut self) {
        info!("capture controller running");
        while let Ok(cmd) = self.commands.recv() {
            if !self.dispatch(cmd) {
                break;
            }
        }
        info!("capture controller exiting");
    }

    /// Returns `false` once the controller has shut down.
    fn dispatch(&mut self, cmd: Command<H>) -> bool {
        match cmd {
            Command::FrameProduced(frame) => {
                if let Err(e) = self.on_frame(frame) {
                    debug!(error = %e, "frame intake reported an error");
                }
            }
            Command::Control { action, reply } => {
                let result = match action {
                    ControlAction::Pause => self.pause(),
                    ControlAction::Resume => self.resume(),
                    ControlAction::Stop(mode) => self.stop(mode),
                    ControlAction::Reconfigure(config) => self.reconfigure(config),
                };
                let _ = reply.send(result);
            }
            Command::HandOff { stage, ids, reply } => {
                let _ = reply.send(self.hand_off(stage, ids));
            }
            Command::Snapshot {
                stage,
                max_duration_ms,
                reply,
            } => {
                let _ = reply.send(self.snapshot(stage, max_duration_ms));
            }
            Command::ReleaseStage(stage) => {
                self.release_stage(stage);
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            Command::Shutdown => {
                self.shutdown();
                return false;
            }
        }
        true
    }

    /// Stop production and release the `capture` tag everywhere.
    ///
    /// Frames leased to edit or export survive until those stages release.
    /// Further hand-offs and snapshots fail with `ControllerGone`.
    pub fn shutdown(&mut self) {
        self.shut_down = true;
        self.halt_production();
        self.discard_buffer();
        if matches!(self.state, CaptureState::Capturing | CaptureState::Paused) {
            self.transition(CaptureState::Stopped);
        }
    }

    // ── Internals ─────────────────────────────────────────────────

    fn halt_production(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
    }

    fn discard_buffer(&mut self) {
        let drained = self.ring.drain();
        let destroyed = self.pool.lock().release_all(OwnerTag::Capture);
        debug!(drained = drained.len(), destroyed, "capture buffer discarded");
    }

    /// Release a frame that will never enter the ring, through the pool.
    fn dispose(&mut self, raw: RawFrame<H>) {
        let record = FrameRecord::new(raw.handle, self.last_timestamp_us);
        self.pool.lock().release_unregistered(record);
    }

    fn transition(&mut self, to: CaptureState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        info!(%from, %to, "capture state changed");
        self.emit(ControllerEvent::StateChanged { from, to });
    }

    fn emit(&self, event: ControllerEvent) {
        // Nobody is listening once the backlog fills; drop the newest
        if self.events_tx.try_send(event).is_err() {
            trace!("event backlog full");
        }
    }
}

impl<H: FrameHandle> Drop for CaptureController<H> {
    fn drop(&mut self) {
        self.halt_production();
        // Frames produced after the last pump never reached the pool
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                Command::FrameProduced(Ok(raw)) => self.dispose(raw),
                Command::ReleaseStage(stage) => {
                    self.pool.lock().release_all(stage);
                }
                _ => {}
            }
        }
        // Only the capture tag goes; live leases keep the pool alive
        self.discard_buffer();
    }
}
