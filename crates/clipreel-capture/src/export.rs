//! Export stage: feeding a leased selection to an encoder.
//!
//! The encoder itself is an external collaborator. This module owns the
//! part that must hold for every outcome: the export lease is released
//! exactly once whether encoding succeeds, fails or is cancelled.

use crate::error::{CaptureError, CaptureResult};
use crate::lease::StageLease;
use crate::pool::OwnerTag;
use clipreel_core::{FrameHandle, FrameRecord};
use std::future::Future;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{info, warn};

/// Export progress information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportProgress {
    /// Frames encoded so far.
    pub current_frame: u64,
    pub total_frames: u64,
}

impl ExportProgress {
    /// Completion percentage (0.0 to 1.0).
    pub fn fraction(&self) -> f64 {
        if self.total_frames == 0 {
            return 0.0;
        }
        self.current_frame as f64 / self.total_frames as f64
    }
}

/// What an encoder produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    /// Where the artifact was written, if it went to disk.
    pub path: Option<PathBuf>,
    pub frame_count: usize,
    pub bytes: u64,
}

/// Turns a run of frames into a shareable artifact.
pub trait FrameEncoder<H: FrameHandle> {
    fn encode(
        &mut self,
        frames: &[FrameRecord<H>],
        progress: &mut dyn FnMut(ExportProgress),
    ) -> impl Future<Output = CaptureResult<ExportArtifact>>;
}

/// Encode the frames held by an export lease.
///
/// Setting `cancel` to `true` abandons the encoder future. The lease is
/// released on every path, including rejection: a lease for another stage
/// fails with [`CaptureError::InvalidStage`] and that stage is torn down.
pub async fn run_export<H, E>(
    lease: StageLease<H>,
    encoder: &mut E,
    mut cancel: watch::Receiver<bool>,
    mut progress: impl FnMut(ExportProgress),
) -> CaptureResult<ExportArtifact>
where
    H: FrameHandle,
    E: FrameEncoder<H>,
{
    if lease.stage() != OwnerTag::Export {
        let stage = lease.stage();
        warn!(%stage, "export given a non-export lease, releasing it");
        lease.release();
        return Err(CaptureError::InvalidStage(stage));
    }
    if lease.is_empty() {
        lease.release();
        return Err(CaptureError::EmptySelection);
    }

    let total = lease.len();
    info!(frames = total, "export started");

    let cancelled = async {
        if cancel.wait_for(|c| *c).await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    let outcome = tokio::select! {
        result = encoder.encode(lease.frames(), &mut progress) => result,
        _ = cancelled => Err(CaptureError::Cancelled),
    };
    lease.release();

    match &outcome {
        Ok(artifact) => info!(frames = artifact.frame_count, bytes = artifact.bytes, "export finished"),
        Err(CaptureError::Cancelled) => info!("export cancelled"),
        Err(e) => warn!(error = %e, "export failed"),
    }
    outcome
}
