//! Error types for the capture pipeline.

use crate::controller::CaptureState;
use crate::pool::OwnerTag;
use clipreel_core::ClipError;
use thiserror::Error;

/// Errors surfaced by the capture controller and its stages.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The requested action is not valid in the current state.
    #[error("cannot {action} while {from}")]
    InvalidTransition {
        from: CaptureState,
        action: &'static str,
    },

    /// The frame source failed too many times in a row.
    #[error("frame source exhausted after {failures} consecutive failures")]
    ResourceExhausted { failures: u32 },

    /// The stage already holds a lease that has not been torn down.
    #[error("stage {0} already holds frames")]
    StageActive(OwnerTag),

    /// Hand-off requested for a stage that cannot receive one.
    #[error("stage {0} cannot receive a hand-off")]
    InvalidStage(OwnerTag),

    /// The selection handed to export contained no live frames.
    #[error("nothing to export")]
    EmptySelection,

    /// The capture source could not be obtained.
    #[error("capture source request failed: {0}")]
    SourceRequest(String),

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// The controller has shut down and no longer accepts commands.
    #[error("capture controller is gone")]
    ControllerGone,

    #[error("encoder error: {0}")]
    Encode(String),

    #[error("failed to spawn producer thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] ClipError),
}

/// Result type alias for capture operations.
pub type CaptureResult<T> = std::result::Result<T, CaptureError>;
