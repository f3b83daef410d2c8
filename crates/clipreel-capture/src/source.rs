//! Capture sources.
//!
//! A [`FrameSource`] produces raw frame payloads on demand; the producer
//! worker calls it once per tick. A [`SourceProvider`] is the asynchronous
//! step that obtains a source in the first place (device selection,
//! permission prompts).

use clipreel_core::{CpuFrameHandle, FrameBuffer, FrameHandle, RawFrame, ReleaseLedger};
use std::future::Future;
use std::time::Instant;
use thiserror::Error;

/// Failure to produce a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The underlying track ended; no more frames will come.
    #[error("capture track ended")]
    Ended,

    /// The device ran out of frame memory.
    #[error("source exhausted: {0}")]
    Exhausted(String),

    /// The source delivered an unusable frame.
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// Producer of raw frames, driven from the background worker thread.
pub trait FrameSource: Send + 'static {
    type Handle: FrameHandle;

    fn produce(&mut self) -> Result<RawFrame<Self::Handle>, SourceError>;
}

/// Obtains a frame source asynchronously.
pub trait SourceProvider {
    type Source: FrameSource;

    fn request(&mut self) -> impl Future<Output = Result<Self::Source, SourceError>>;
}

/// Colour-bar generator standing in for a screen.
///
/// Frames scroll by a few pixels each tick. Failures can be injected to
/// exercise the controller's exhaustion handling.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    ledger: ReleaseLedger,
    started: Instant,
    produced: u64,
    end_after: Option<u64>,
    fail_from: Option<u64>,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, ledger: &ReleaseLedger) -> Self {
        Self {
            width,
            height,
            ledger: ledger.clone(),
            started: Instant::now(),
            produced: 0,
            end_after: None,
            fail_from: None,
        }
    }

    /// Report [`SourceError::Ended`] after `frames` frames.
    pub fn end_after(mut self, frames: u64) -> Self {
        self.end_after = Some(frames);
        self
    }

    /// Fail every call once `frames` frames have been produced.
    pub fn fail_from(mut self, frames: u64) -> Self {
        self.fail_from = Some(frames);
        self
    }

    pub fn produced(&self) -> u64 {
        self.produced
    }
}

impl FrameSource for SyntheticSource {
    type Handle = CpuFrameHandle;

    fn produce(&mut self) -> Result<RawFrame<CpuFrameHandle>, SourceError> {
        if self.end_after.is_some_and(|n| self.produced >= n) {
            return Err(SourceError::Ended);
        }
        if self.fail_from.is_some_and(|n| self.produced >= n) {
            return Err(SourceError::Exhausted("synthetic frame allocation failed".into()));
        }

        let phase = (self.produced * 4 % self.width.max(1) as u64) as u32;
        let buffer = FrameBuffer::test_pattern(self.width, self.height, phase);
        self.produced += 1;

        let timestamp_us = self.started.elapsed().as_micros() as u64;
        Ok(RawFrame::with_timestamp(
            CpuFrameHandle::new(buffer, &self.ledger),
            timestamp_us,
        ))
    }
}

/// Provider that hands out a prepared source once.
pub struct ReadySource<S>(Option<S>);

impl<S> ReadySource<S> {
    pub fn new(source: S) -> Self {
        Self(Some(source))
    }
}

impl<S: FrameSource> SourceProvider for ReadySource<S> {
    type Source = S;

    async fn request(&mut self) -> Result<S, SourceError> {
        self.0
            .take()
            .ok_or_else(|| SourceError::Exhausted("source already handed out".into()))
    }
}
